use crate::domain::{parse_setting_key, Setting, SettingCategory, SettingKind, SettingUpsert, SettingValue};
use crate::routes::{ok_data, ok_message, ApiError};
use crate::site_settings::{SeedMode, SiteSettings};
use crate::store::SettingsFilter;
use actix_web::{web, HttpResponse};
use serde_json::{json, Value};
use std::collections::BTreeMap;

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsQuery {
    category: Option<String>,
    is_public: Option<bool>,
}

impl TryFrom<SettingsQuery> for SettingsFilter {
    type Error = String;

    fn try_from(query: SettingsQuery) -> Result<Self, Self::Error> {
        let category = query
            .category
            .as_deref()
            .map(SettingCategory::parse)
            .transpose()?;
        Ok(Self {
            category,
            is_public: query.is_public,
        })
    }
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingBody {
    key: String,
    value: Value,
    #[serde(rename = "type")]
    kind: Option<String>,
    description: Option<String>,
    category: Option<String>,
    is_public: Option<bool>,
}

impl TryFrom<SettingBody> for SettingUpsert {
    type Error = String;

    /// Without an explicit `type` the kind is taken from the JSON value.
    fn try_from(body: SettingBody) -> Result<Self, Self::Error> {
        let key = parse_setting_key(&body.key)?;
        let value = match body.kind.as_deref() {
            Some(kind) => SettingValue::from_typed(SettingKind::parse(kind)?, body.value)?,
            None => SettingValue::infer(body.value)?,
        };
        let category = match body.category.as_deref() {
            Some(category) => SettingCategory::parse(category)?,
            None => SettingCategory::default(),
        };
        Ok(Self {
            key,
            value,
            description: body.description.unwrap_or_default(),
            category,
            is_public: body.is_public,
        })
    }
}

#[derive(serde::Deserialize)]
pub struct BulkSettingsBody {
    settings: Vec<SettingBody>,
}

#[derive(serde::Deserialize)]
pub struct InitializeQuery {
    overwrite: Option<bool>,
}

/// Settings grouped by category, each group ordered by key.
fn group_by_category(settings: Vec<Setting>) -> BTreeMap<&'static str, Vec<Setting>> {
    let mut groups: BTreeMap<&'static str, Vec<Setting>> = BTreeMap::new();
    for setting in settings {
        groups
            .entry(setting.category.as_str())
            .or_default()
            .push(setting);
    }
    groups
}

#[tracing::instrument(name = "Get public settings", skip(settings))]
pub async fn get_public_settings(
    settings: web::Data<SiteSettings>,
) -> Result<HttpResponse, ApiError> {
    let public = settings.list_public().await?;
    Ok(ok_data(public))
}

#[tracing::instrument(name = "List settings", skip(query, settings))]
pub async fn list_settings(
    query: web::Query<SettingsQuery>,
    settings: web::Data<SiteSettings>,
) -> Result<HttpResponse, ApiError> {
    let filter = SettingsFilter::try_from(query.into_inner()).map_err(ApiError::Validation)?;
    let found = settings.list(&filter).await?;
    Ok(ok_data(group_by_category(found)))
}

#[tracing::instrument(name = "Get a setting", skip(settings))]
pub async fn get_setting(
    key: web::Path<String>,
    settings: web::Data<SiteSettings>,
) -> Result<HttpResponse, ApiError> {
    let setting = settings.find(&key).await?;
    Ok(ok_data(setting))
}

#[tracing::instrument(
    name = "Create or update a setting",
    skip(body, settings),
    fields(key = %body.key)
)]
pub async fn upsert_setting(
    body: web::Json<SettingBody>,
    settings: web::Data<SiteSettings>,
) -> Result<HttpResponse, ApiError> {
    let upsert = SettingUpsert::try_from(body.into_inner()).map_err(ApiError::Validation)?;
    let setting = settings.upsert(upsert).await?;
    Ok(ok_data(setting))
}

#[tracing::instrument(name = "Bulk update settings", skip(body, settings))]
pub async fn bulk_update_settings(
    body: web::Json<BulkSettingsBody>,
    settings: web::Data<SiteSettings>,
) -> Result<HttpResponse, ApiError> {
    let mut keys = Vec::with_capacity(body.settings.len());
    let mut outcomes = Vec::with_capacity(body.settings.len());
    let mut valid = Vec::new();
    let mut positions = Vec::new();
    for (position, entry) in body.into_inner().settings.into_iter().enumerate() {
        keys.push(entry.key.clone());
        outcomes.push(None);
        match SettingUpsert::try_from(entry) {
            Ok(upsert) => {
                valid.push(upsert);
                positions.push(position);
            }
            Err(message) => outcomes[position] = Some(Err(message)),
        }
    }
    for (position, outcome) in positions
        .into_iter()
        .zip(settings.bulk_upsert(valid).await)
    {
        outcomes[position] = Some(outcome.map_err(|e| e.to_string()));
    }

    let mut updated = 0;
    let results: Vec<Value> = keys
        .into_iter()
        .zip(outcomes)
        .map(|(key, outcome)| match outcome {
            Some(Ok(setting)) => {
                updated += 1;
                json!({ "key": key, "success": true, "data": setting })
            }
            Some(Err(message)) => json!({ "key": key, "success": false, "error": message }),
            None => json!({ "key": key, "success": false }),
        })
        .collect();

    let message = if updated == results.len() {
        "Settings updated successfully".to_string()
    } else {
        format!("{updated} of {} settings updated", results.len())
    };
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": message,
        "data": results,
    })))
}

#[tracing::instrument(name = "Delete a setting", skip(settings))]
pub async fn delete_setting(
    key: web::Path<String>,
    settings: web::Data<SiteSettings>,
) -> Result<HttpResponse, ApiError> {
    settings.delete(&key).await?;
    Ok(ok_message("Setting deleted successfully"))
}

#[tracing::instrument(name = "Initialize settings", skip(query, settings))]
pub async fn initialize_settings(
    query: web::Query<InitializeQuery>,
    settings: web::Data<SiteSettings>,
) -> Result<HttpResponse, ApiError> {
    let mode = if query.overwrite.unwrap_or(false) {
        SeedMode::Overwrite
    } else {
        SeedMode::KeepExisting
    };
    let written = settings.initialize_defaults(mode).await?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Default settings initialized successfully",
        "data": { "written": written },
    })))
}
