//! Typed key/value site settings.

use crate::domain::{Setting, SettingCategory, SettingUpsert, SettingValue};
use crate::store::{SettingsFilter, SettingsStore, StoreError};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::sync::Arc;

pub const SITE_NAME: &str = "site_name";
pub const DEFAULT_SITE_NAME: &str = "Newsletter Website";
pub const MAX_NEWSLETTERS_PER_BATCH: &str = "max_newsletters_per_batch";
pub const DEFAULT_BATCH_SIZE: usize = 100;

#[derive(thiserror::Error, Debug)]
pub enum SettingsError {
    #[error("{0}")]
    Validation(String),
    #[error("Setting not found")]
    NotFound,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// How `initialize_defaults` treats keys that already exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SeedMode {
    /// Only write defaults for keys nobody has set yet.
    #[default]
    KeepExisting,
    /// Reset every default-listed key to its default.
    Overwrite,
}

#[derive(Clone)]
pub struct SiteSettings {
    store: Arc<dyn SettingsStore>,
}

impl SiteSettings {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self { store }
    }

    /// The stored value of `key`, or `default` when it is absent or unreadable.
    #[tracing::instrument(name = "Read a setting", skip(self, default))]
    pub async fn get(&self, key: &str, default: SettingValue) -> SettingValue {
        match self.store.find_by_key(key).await {
            Ok(Some(setting)) => setting.value,
            Ok(None) => default,
            Err(e) => {
                tracing::warn!(error.cause_chain = ?e, "Falling back to the default value of {key}");
                default
            }
        }
    }

    /// Read `key` as a `T`. A missing key yields `default`; so does a stored value of another
    /// shape, with a warning. Whole floats such as `50.0` read as integers. Store failures are
    /// propagated.
    #[tracing::instrument(name = "Read a typed setting", skip(self, default))]
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T, StoreError> {
        let setting = match self.store.find_by_key(key).await? {
            Some(setting) => setting,
            None => return Ok(default),
        };
        match serde_json::from_value(whole_floats_as_integers(setting.value.to_json())) {
            Ok(value) => Ok(value),
            Err(e) => {
                tracing::warn!(error.message = %e, "Setting {key} has an unexpected shape, using the default");
                Ok(default)
            }
        }
    }

    /// Display name used in outgoing emails. Never fails.
    pub async fn site_name(&self) -> String {
        match self.get(SITE_NAME, SettingValue::from(DEFAULT_SITE_NAME)).await {
            SettingValue::String(name) => name,
            _ => DEFAULT_SITE_NAME.to_string(),
        }
    }

    /// The full record for `key`.
    pub async fn find(&self, key: &str) -> Result<Setting, SettingsError> {
        self.store
            .find_by_key(key)
            .await?
            .ok_or(SettingsError::NotFound)
    }

    pub async fn list(&self, filter: &SettingsFilter) -> Result<Vec<Setting>, SettingsError> {
        Ok(self.store.find(filter).await?)
    }

    /// Create or entirely replace the setting identified by `setting.key`.
    #[tracing::instrument(name = "Create or update a setting", skip(self, setting), fields(key = %setting.key))]
    pub async fn upsert(&self, setting: SettingUpsert) -> Result<Setting, SettingsError> {
        if setting.key.trim().is_empty() {
            return Err(SettingsError::Validation(
                "The setting key cannot be empty.".into(),
            ));
        }
        Ok(self.store.upsert(&setting).await?)
    }

    /// Upsert every entry on its own. There is no transaction: the outcome of each entry is
    /// reported independently, in input order.
    #[tracing::instrument(name = "Bulk update settings", skip(self, settings))]
    pub async fn bulk_upsert(
        &self,
        settings: Vec<SettingUpsert>,
    ) -> Vec<Result<Setting, SettingsError>> {
        let mut outcomes = Vec::with_capacity(settings.len());
        for setting in settings {
            let outcome = self.upsert(setting).await;
            if let Err(e) = &outcome {
                tracing::error!(error.cause_chain = ?e, "Failed to upsert a setting");
            }
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Public settings flattened to `key -> value`.
    #[tracing::instrument(name = "List public settings", skip(self))]
    pub async fn list_public(&self) -> Result<Map<String, Value>, SettingsError> {
        let filter = SettingsFilter {
            is_public: Some(true),
            ..Default::default()
        };
        let public = self
            .store
            .find(&filter)
            .await?
            .into_iter()
            .map(|s| (s.key, s.value.to_json()))
            .collect();
        Ok(public)
    }

    pub async fn delete(&self, key: &str) -> Result<(), SettingsError> {
        if self.store.delete(key).await? {
            Ok(())
        } else {
            Err(SettingsError::NotFound)
        }
    }

    /// Seed the default settings. Returns how many keys were written.
    #[tracing::instrument(name = "Initialize default settings", skip(self))]
    pub async fn initialize_defaults(&self, mode: SeedMode) -> Result<usize, SettingsError> {
        let mut written = 0;
        for setting in default_settings() {
            let was_written = match mode {
                SeedMode::KeepExisting => self.store.insert_if_absent(&setting).await?,
                SeedMode::Overwrite => {
                    self.store.upsert(&setting).await?;
                    true
                }
            };
            if was_written {
                written += 1;
            }
        }
        tracing::info!("{written} default settings written");
        Ok(written)
    }
}

fn whole_floats_as_integers(value: Value) -> Value {
    match value.as_f64() {
        Some(f) if value.is_f64() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
            Value::from(f as i64)
        }
        _ => value,
    }
}

pub fn default_settings() -> Vec<SettingUpsert> {
    use SettingCategory::*;

    vec![
        SettingUpsert::new(SITE_NAME, DEFAULT_SITE_NAME)
            .description("Website name")
            .category(General)
            .public(true),
        SettingUpsert::new("site_description", "Stay updated with our latest news")
            .description("Website description")
            .category(General)
            .public(true),
        SettingUpsert::new("admin_email", "admin@example.com")
            .description("Admin email address")
            .category(General)
            .public(false),
        SettingUpsert::new("email_from_name", "Newsletter Team")
            .description("Email sender name")
            .category(Email)
            .public(false),
        SettingUpsert::new("email_notifications", true)
            .description("Enable email notifications")
            .category(Email)
            .public(false),
        SettingUpsert::new("newsletter_frequency", "weekly")
            .description("Newsletter frequency")
            .category(Newsletter)
            .public(true),
        SettingUpsert::new(MAX_NEWSLETTERS_PER_BATCH, DEFAULT_BATCH_SIZE as u64)
            .description("Max newsletters per batch send")
            .category(Newsletter)
            .public(false),
        SettingUpsert::new("meta_keywords", "newsletter, news, updates")
            .description("Default meta keywords")
            .category(Seo)
            .public(true),
        SettingUpsert::new("google_analytics_id", "")
            .description("Google Analytics tracking ID")
            .category(Seo)
            .public(true),
    ]
}
