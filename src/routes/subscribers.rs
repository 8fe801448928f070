use crate::directory::{DirectoryError, SubscribeOutcome, SubscriberDirectory};
use crate::domain::{
    interests_as_strings, parse_interests, Interest, NewSubscriber, PersonName, Subscriber,
    SubscriberEmail, SubscriberSource,
};
use crate::routes::{
    client_metadata, like_pattern, monthly_counts, ok_data, ok_message, split_list,
    twelve_months_ago, ApiError, ListResponse, Page,
};
use crate::store::postgres::{SubscriberRow, SUBSCRIBER_COLUMNS};
use crate::store::StoreError;
use actix_web::{web, HttpRequest, HttpResponse};
use anyhow::Context;
use chrono::Utc;
use serde_json::json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeBody {
    email: String,
    first_name: Option<String>,
    last_name: Option<String>,
    interests: Option<Vec<String>>,
    source: Option<String>,
}

impl SubscribeBody {
    fn into_new_subscriber(
        self,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Result<NewSubscriber, String> {
        let interests = match self.interests {
            Some(raw) if !raw.is_empty() => parse_interests(&raw)?,
            _ => vec![Interest::General],
        };
        Ok(NewSubscriber {
            email: SubscriberEmail::parse(self.email)?,
            first_name: self.first_name.map(PersonName::parse).transpose()?,
            last_name: self.last_name.map(PersonName::parse).transpose()?,
            interests,
            source: self
                .source
                .as_deref()
                .map(SubscriberSource::parse)
                .transpose()?
                .unwrap_or_default(),
            ip_address,
            user_agent,
        })
    }
}

/// `Subscriber` plus its derived read-only fields.
#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriberResponse {
    #[serde(flatten)]
    subscriber: Subscriber,
    full_name: String,
    engagement_rate: f64,
}

impl From<Subscriber> for SubscriberResponse {
    fn from(subscriber: Subscriber) -> Self {
        Self {
            full_name: subscriber.full_name(),
            engagement_rate: subscriber.engagement_rate(),
            subscriber,
        }
    }
}

impl From<DirectoryError> for ApiError {
    fn from(e: DirectoryError) -> Self {
        match e {
            DirectoryError::DuplicateSubscription => ApiError::Validation(e.to_string()),
            DirectoryError::InvalidToken => ApiError::NotFound(e.to_string()),
            DirectoryError::Store(e) => ApiError::Unexpected(e.into()),
        }
    }
}

#[tracing::instrument(
    name = "Subscribe to the newsletter",
    skip(body, req, directory),
    fields(subscriber_email = %body.email)
)]
pub async fn subscribe(
    body: web::Json<SubscribeBody>,
    req: HttpRequest,
    directory: web::Data<SubscriberDirectory>,
) -> Result<HttpResponse, ApiError> {
    let (ip_address, user_agent) = client_metadata(&req);
    let new_subscriber = body
        .into_inner()
        .into_new_subscriber(ip_address, user_agent)
        .map_err(ApiError::Validation)?;

    let response = match directory.subscribe(new_subscriber).await? {
        SubscribeOutcome::Created(subscriber) => HttpResponse::Created().json(json!({
            "success": true,
            "message": "Subscribed successfully! Please check your email to confirm.",
            "data": SubscriberResponse::from(subscriber),
        })),
        SubscribeOutcome::Reactivated(subscriber) => HttpResponse::Ok().json(json!({
            "success": true,
            "message": "Subscription reactivated successfully",
            "data": SubscriberResponse::from(subscriber),
        })),
    };
    Ok(response)
}

#[tracing::instrument(name = "Confirm a subscription", skip(token, directory))]
pub async fn verify_subscription(
    token: web::Path<String>,
    directory: web::Data<SubscriberDirectory>,
) -> Result<HttpResponse, ApiError> {
    directory.verify(&token).await?;
    Ok(ok_message("Email verified successfully!"))
}

#[tracing::instrument(name = "Unsubscribe from the newsletter", skip(token, directory))]
pub async fn unsubscribe(
    token: web::Path<String>,
    directory: web::Data<SubscriberDirectory>,
) -> Result<HttpResponse, ApiError> {
    directory.unsubscribe(&token).await?;
    Ok(ok_message("Successfully unsubscribed from newsletter"))
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriberListQuery {
    page: Option<i64>,
    limit: Option<i64>,
    is_active: Option<bool>,
    interests: Option<String>,
    search: Option<String>,
}

struct SubscriberFilters {
    is_active: Option<bool>,
    interests: Option<Vec<Interest>>,
    search: Option<String>,
}

impl SubscriberFilters {
    fn push(&self, builder: &mut QueryBuilder<'_, Postgres>) {
        if let Some(is_active) = self.is_active {
            builder.push(" AND is_active = ").push_bind(is_active);
        }
        if let Some(interests) = &self.interests {
            builder
                .push(" AND interests && ")
                .push_bind(interests_as_strings(interests));
        }
        if let Some(search) = &self.search {
            let pattern = like_pattern(search);
            builder
                .push(" AND (email ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR first_name ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR last_name ILIKE ")
                .push_bind(pattern)
                .push(")");
        }
    }
}

#[tracing::instrument(name = "List subscribers", skip(query, pool))]
pub async fn list_subscribers(
    query: web::Query<SubscriberListQuery>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, ApiError> {
    let SubscriberListQuery {
        page,
        limit,
        is_active,
        interests,
        search,
    } = query.into_inner();
    let page = Page::new(page, limit);
    let interests = interests
        .map(|raw| parse_interests(&split_list(&raw)))
        .transpose()
        .map_err(ApiError::Validation)?
        .filter(|i| !i.is_empty());
    let filters = SubscriberFilters {
        is_active,
        interests,
        search: search.filter(|s| !s.trim().is_empty()),
    };

    let mut select = QueryBuilder::new(format!(
        "SELECT {SUBSCRIBER_COLUMNS} FROM subscribers WHERE TRUE"
    ));
    filters.push(&mut select);
    select
        .push(" ORDER BY subscribed_at DESC LIMIT ")
        .push_bind(page.limit)
        .push(" OFFSET ")
        .push_bind(page.offset());
    let subscribers = select
        .build_query_as::<SubscriberRow>()
        .fetch_all(pool.get_ref())
        .await
        .context("Failed to fetch subscribers.")?
        .into_iter()
        .map(|row| Subscriber::try_from(row).map(SubscriberResponse::from))
        .collect::<Result<Vec<_>, StoreError>>()?;

    let mut count = QueryBuilder::new("SELECT COUNT(*) FROM subscribers WHERE TRUE");
    filters.push(&mut count);
    let (total,): (i64,) = count
        .build_query_as()
        .fetch_one(pool.get_ref())
        .await
        .context("Failed to count subscribers.")?;

    Ok(HttpResponse::Ok().json(ListResponse::new(subscribers, total, page)))
}

#[derive(Debug, serde::Serialize, sqlx::FromRow)]
pub struct InterestCount {
    interest: String,
    count: i64,
}

#[tracing::instrument(name = "Subscriber statistics", skip(pool))]
pub async fn subscriber_stats(pool: web::Data<PgPool>) -> Result<HttpResponse, ApiError> {
    let (total, active, verified): (i64, i64, i64) = sqlx::query_as(
        r#"
        SELECT COUNT(*),
               COUNT(*) FILTER (WHERE is_active),
               COUNT(*) FILTER (WHERE is_verified)
        FROM subscribers
        "#,
    )
    .fetch_one(pool.get_ref())
    .await
    .context("Failed to count subscribers.")?;

    let by_interests: Vec<InterestCount> = sqlx::query_as(
        r#"
        SELECT interest, COUNT(*) AS count
        FROM subscribers, UNNEST(interests) AS interest
        WHERE is_active
        GROUP BY interest
        ORDER BY count DESC
        "#,
    )
    .fetch_all(pool.get_ref())
    .await
    .context("Failed to count subscribers by interest.")?;

    let monthly_data = monthly_counts(
        &pool,
        "subscribers",
        "subscribed_at",
        twelve_months_ago(Utc::now()),
    )
    .await
    .context("Failed to count subscribers by month.")?;

    Ok(ok_data(json!({
        "total": total,
        "active": active,
        "verified": verified,
        "byInterests": by_interests,
        "monthlyData": monthly_data,
    })))
}

/// The fields an administrator may change on a subscriber.
#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriberUpdate {
    first_name: Option<String>,
    last_name: Option<String>,
    interests: Option<Vec<String>>,
    is_active: Option<bool>,
}

#[tracing::instrument(name = "Update a subscriber", skip(body, pool))]
pub async fn update_subscriber(
    id: web::Path<Uuid>,
    body: web::Json<SubscriberUpdate>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, ApiError> {
    let SubscriberUpdate {
        first_name,
        last_name,
        interests,
        is_active,
    } = body.into_inner();
    let first_name = first_name
        .map(PersonName::parse)
        .transpose()
        .map_err(ApiError::Validation)?;
    let last_name = last_name
        .map(PersonName::parse)
        .transpose()
        .map_err(ApiError::Validation)?;
    let interests = interests
        .map(|raw| parse_interests(&raw))
        .transpose()
        .map_err(ApiError::Validation)?;

    let sql = format!(
        r#"
        UPDATE subscribers SET
            first_name = COALESCE($2, first_name),
            last_name = COALESCE($3, last_name),
            interests = COALESCE($4, interests),
            is_active = COALESCE($5, is_active),
            unsubscribed_at = CASE
                WHEN $5 = FALSE AND is_active THEN now()
                WHEN $5 = TRUE THEN NULL
                ELSE unsubscribed_at
            END,
            updated_at = now()
        WHERE id = $1
        RETURNING {SUBSCRIBER_COLUMNS}
        "#
    );
    let row = sqlx::query_as::<_, SubscriberRow>(&sql)
        .bind(id.into_inner())
        .bind(first_name.as_ref().map(|n| -> &str { n.as_ref() }))
        .bind(last_name.as_ref().map(|n| -> &str { n.as_ref() }))
        .bind(interests.as_deref().map(interests_as_strings))
        .bind(is_active)
        .fetch_optional(pool.get_ref())
        .await
        .context("Failed to update a subscriber.")?
        .ok_or_else(|| ApiError::NotFound("Subscriber not found".into()))?;

    Ok(ok_data(SubscriberResponse::from(Subscriber::try_from(row)?)))
}

#[tracing::instrument(name = "Delete a subscriber", skip(pool))]
pub async fn delete_subscriber(
    id: web::Path<Uuid>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, ApiError> {
    let result = sqlx::query("DELETE FROM subscribers WHERE id = $1")
        .bind(id.into_inner())
        .execute(pool.get_ref())
        .await
        .context("Failed to delete a subscriber.")?;
    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound("Subscriber not found".into()));
    }
    Ok(ok_message("Subscriber deleted successfully"))
}
