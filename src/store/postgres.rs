use crate::domain::{
    interests_as_strings, parse_interests, Interest, NewSubscriber, Setting, SettingCategory, SettingKind,
    SettingUpsert, SettingValue, Subscriber, SubscriberEmail, SubscriberSource,
};
use crate::store::{
    SettingsFilter, SettingsStore, StoreError, SubscriberInsert, SubscriberStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

/// Postgres-backed implementation of every store trait.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const UNIQUE_VIOLATION: &str = "23505";

pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => db.code().as_deref() == Some(UNIQUE_VIOLATION),
        _ => false,
    }
}

pub(crate) const SETTING_COLUMNS: &str =
    "key, value, value_type, description, category, is_public, created_at, updated_at";

#[derive(sqlx::FromRow)]
pub(crate) struct SettingRow {
    key: String,
    value: serde_json::Value,
    value_type: String,
    description: String,
    category: String,
    is_public: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SettingRow> for Setting {
    type Error = StoreError;

    fn try_from(row: SettingRow) -> Result<Self, Self::Error> {
        let kind = SettingKind::parse(&row.value_type).map_err(StoreError::Corrupted)?;
        let value = SettingValue::from_typed(kind, row.value).map_err(StoreError::Corrupted)?;
        let category = SettingCategory::parse(&row.category).map_err(StoreError::Corrupted)?;
        Ok(Setting {
            key: row.key,
            value,
            kind,
            description: row.description,
            category,
            is_public: row.is_public,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

pub(crate) const SUBSCRIBER_COLUMNS: &str = "id, email, first_name, last_name, interests, \
    is_active, is_verified, verification_token, unsubscribe_token, source, ip_address, \
    user_agent, subscribed_at, unsubscribed_at, last_email_sent, emails_sent, emails_opened, \
    emails_clicked";

#[derive(sqlx::FromRow)]
pub(crate) struct SubscriberRow {
    id: Uuid,
    email: String,
    first_name: Option<String>,
    last_name: Option<String>,
    interests: Vec<String>,
    is_active: bool,
    is_verified: bool,
    verification_token: Option<String>,
    unsubscribe_token: String,
    source: String,
    ip_address: Option<String>,
    user_agent: Option<String>,
    subscribed_at: DateTime<Utc>,
    unsubscribed_at: Option<DateTime<Utc>>,
    last_email_sent: Option<DateTime<Utc>>,
    emails_sent: i32,
    emails_opened: i32,
    emails_clicked: i32,
}

impl TryFrom<SubscriberRow> for Subscriber {
    type Error = StoreError;

    fn try_from(row: SubscriberRow) -> Result<Self, Self::Error> {
        Ok(Subscriber {
            id: row.id,
            email: SubscriberEmail::parse(row.email).map_err(StoreError::Corrupted)?,
            first_name: row.first_name,
            last_name: row.last_name,
            interests: parse_interests(&row.interests).map_err(StoreError::Corrupted)?,
            is_active: row.is_active,
            is_verified: row.is_verified,
            verification_token: row.verification_token,
            unsubscribe_token: row.unsubscribe_token,
            source: SubscriberSource::parse(&row.source).map_err(StoreError::Corrupted)?,
            ip_address: row.ip_address,
            user_agent: row.user_agent,
            subscribed_at: row.subscribed_at,
            unsubscribed_at: row.unsubscribed_at,
            last_email_sent: row.last_email_sent,
            emails_sent: row.emails_sent,
            emails_opened: row.emails_opened,
            emails_clicked: row.emails_clicked,
        })
    }
}

#[async_trait]
impl SettingsStore for PgStore {
    #[tracing::instrument(name = "Fetch a setting by key", skip(self))]
    async fn find_by_key(&self, key: &str) -> Result<Option<Setting>, StoreError> {
        let sql = format!("SELECT {SETTING_COLUMNS} FROM settings WHERE key = $1");
        sqlx::query_as::<_, SettingRow>(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?
            .map(Setting::try_from)
            .transpose()
    }

    #[tracing::instrument(name = "Fetch settings", skip(self))]
    async fn find(&self, filter: &SettingsFilter) -> Result<Vec<Setting>, StoreError> {
        let mut query: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {SETTING_COLUMNS} FROM settings WHERE TRUE"));
        if let Some(category) = filter.category {
            query.push(" AND category = ").push_bind(category.as_str());
        }
        if let Some(is_public) = filter.is_public {
            query.push(" AND is_public = ").push_bind(is_public);
        }
        query.push(" ORDER BY category, key");

        query
            .build_query_as::<SettingRow>()
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Setting::try_from)
            .collect()
    }

    #[tracing::instrument(name = "Upsert a setting", skip(self, setting), fields(key = %setting.key))]
    async fn upsert(&self, setting: &SettingUpsert) -> Result<Setting, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO settings (key, value, value_type, description, category, is_public, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, COALESCE($6, FALSE), now(), now())
            ON CONFLICT (key) DO UPDATE SET
                value = EXCLUDED.value,
                value_type = EXCLUDED.value_type,
                description = EXCLUDED.description,
                category = EXCLUDED.category,
                is_public = COALESCE($6, settings.is_public),
                updated_at = now()
            RETURNING {SETTING_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, SettingRow>(&sql)
            .bind(&setting.key)
            .bind(setting.value.to_json())
            .bind(setting.value.kind().as_str())
            .bind(&setting.description)
            .bind(setting.category.as_str())
            .bind(setting.is_public)
            .fetch_one(&self.pool)
            .await?;
        Setting::try_from(row)
    }

    #[tracing::instrument(name = "Insert a setting if absent", skip(self, setting), fields(key = %setting.key))]
    async fn insert_if_absent(&self, setting: &SettingUpsert) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO settings (key, value, value_type, description, category, is_public, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, COALESCE($6, FALSE), now(), now())
            ON CONFLICT (key) DO NOTHING
            "#,
        )
        .bind(&setting.key)
        .bind(setting.value.to_json())
        .bind(setting.value.kind().as_str())
        .bind(&setting.description)
        .bind(setting.category.as_str())
        .bind(setting.is_public)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(name = "Delete a setting", skip(self))]
    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM settings WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

impl PgStore {
    async fn find_subscriber_by(
        &self,
        column: &str,
        value: &str,
    ) -> Result<Option<Subscriber>, StoreError> {
        let sql = format!("SELECT {SUBSCRIBER_COLUMNS} FROM subscribers WHERE {column} = $1");
        sqlx::query_as::<_, SubscriberRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?
            .map(Subscriber::try_from)
            .transpose()
    }
}

#[async_trait]
impl SubscriberStore for PgStore {
    #[tracing::instrument(name = "Fetch a subscriber by email", skip(self))]
    async fn find_by_email(&self, email: &str) -> Result<Option<Subscriber>, StoreError> {
        self.find_subscriber_by("email", email).await
    }

    #[tracing::instrument(
        name = "Saving new subscriber details in the database",
        skip(self, new),
        fields(subscriber_email = %new.subscriber.email)
    )]
    async fn insert(&self, new: &SubscriberInsert) -> Result<Subscriber, StoreError> {
        let subscriber = &new.subscriber;
        let sql = format!(
            r#"
            INSERT INTO subscribers (
                id, email, first_name, last_name, interests, is_active, is_verified,
                verification_token, unsubscribe_token, source, ip_address, user_agent,
                subscribed_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, TRUE, FALSE, $6, $7, $8, $9, $10, $11, now(), now())
            RETURNING {SUBSCRIBER_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, SubscriberRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(subscriber.email.as_ref())
            .bind(subscriber.first_name.as_ref().map(|n| -> &str { n.as_ref() }))
            .bind(subscriber.last_name.as_ref().map(|n| -> &str { n.as_ref() }))
            .bind(interests_as_strings(&subscriber.interests))
            .bind(&new.verification_token)
            .bind(&new.unsubscribe_token)
            .bind(subscriber.source.as_str())
            .bind(subscriber.ip_address.as_deref())
            .bind(subscriber.user_agent.as_deref())
            .bind(new.subscribed_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    return StoreError::Conflict;
                }
                tracing::error!("Failed to execute query: {:?}", e);
                StoreError::Database(e)
            })?;
        Subscriber::try_from(row)
    }

    #[tracing::instrument(name = "Verify a subscriber by token", skip(self, token))]
    async fn verify_by_token(&self, token: &str) -> Result<Option<Subscriber>, StoreError> {
        let sql = format!(
            r#"
            UPDATE subscribers
            SET is_verified = TRUE, verification_token = NULL, updated_at = now()
            WHERE verification_token = $1
            RETURNING {SUBSCRIBER_COLUMNS}
            "#
        );
        sqlx::query_as::<_, SubscriberRow>(&sql)
            .bind(token)
            .fetch_optional(&self.pool)
            .await?
            .map(Subscriber::try_from)
            .transpose()
    }

    #[tracing::instrument(name = "Deactivate a subscriber by token", skip(self, token))]
    async fn deactivate_by_token(
        &self,
        token: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Subscriber>, StoreError> {
        let sql = format!(
            r#"
            UPDATE subscribers
            SET is_active = FALSE, unsubscribed_at = $2, updated_at = now()
            WHERE unsubscribe_token = $1
            RETURNING {SUBSCRIBER_COLUMNS}
            "#
        );
        sqlx::query_as::<_, SubscriberRow>(&sql)
            .bind(token)
            .bind(at)
            .fetch_optional(&self.pool)
            .await?
            .map(Subscriber::try_from)
            .transpose()
    }

    #[tracing::instrument(name = "Reactivate a subscriber", skip(self, subscriber))]
    async fn reactivate(
        &self,
        id: Uuid,
        subscriber: &NewSubscriber,
        at: DateTime<Utc>,
    ) -> Result<Option<Subscriber>, StoreError> {
        let sql = format!(
            r#"
            UPDATE subscribers SET
                is_active = TRUE,
                unsubscribed_at = NULL,
                subscribed_at = $2,
                interests = $3,
                first_name = COALESCE($4, first_name),
                last_name = COALESCE($5, last_name),
                ip_address = $6,
                user_agent = $7,
                updated_at = now()
            WHERE id = $1 AND NOT is_active
            RETURNING {SUBSCRIBER_COLUMNS}
            "#
        );
        sqlx::query_as::<_, SubscriberRow>(&sql)
            .bind(id)
            .bind(at)
            .bind(interests_as_strings(&subscriber.interests))
            .bind(subscriber.first_name.as_ref().map(|n| -> &str { n.as_ref() }))
            .bind(subscriber.last_name.as_ref().map(|n| -> &str { n.as_ref() }))
            .bind(subscriber.ip_address.as_deref())
            .bind(subscriber.user_agent.as_deref())
            .fetch_optional(&self.pool)
            .await?
            .map(Subscriber::try_from)
            .transpose()
    }

    #[tracing::instrument(name = "Fetch subscribers eligible for a newsletter", skip(self))]
    async fn find_eligible(&self, interests: &[Interest]) -> Result<Vec<Subscriber>, StoreError> {
        let sql = format!(
            r#"
            SELECT {SUBSCRIBER_COLUMNS} FROM subscribers
            WHERE is_active AND is_verified AND interests && $1
            ORDER BY subscribed_at, id
            "#
        );
        sqlx::query_as::<_, SubscriberRow>(&sql)
            .bind(interests_as_strings(interests))
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Subscriber::try_from)
            .collect()
    }

    #[tracing::instrument(name = "Record a sent newsletter email", skip(self))]
    async fn record_email_sent(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE subscribers
            SET emails_sent = emails_sent + 1, last_email_sent = $2, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
