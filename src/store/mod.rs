//! Persistence collaborators.
//!
//! The settings store, the subscriber directory and the dispatch workflow only ever talk to the
//! database through these traits. `postgres::PgStore` backs the running application, `fake`
//! keeps everything in memory for unit tests.

#[cfg(test)]
pub mod fake;
pub mod postgres;

use crate::domain::{Interest, NewSubscriber, Setting, SettingCategory, SettingUpsert, Subscriber};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use postgres::PgStore;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("A database operation failed.")]
    Database(#[from] sqlx::Error),
    #[error("A stored record could not be read back: {0}")]
    Corrupted(String),
    #[error("A record with the same unique key already exists.")]
    Conflict,
}

#[derive(Debug, Clone, Default)]
pub struct SettingsFilter {
    pub category: Option<SettingCategory>,
    pub is_public: Option<bool>,
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn find_by_key(&self, key: &str) -> Result<Option<Setting>, StoreError>;

    /// Settings matching `filter`, ordered by category then key.
    async fn find(&self, filter: &SettingsFilter) -> Result<Vec<Setting>, StoreError>;

    /// Create the setting or replace value, type, description and category of the existing one.
    async fn upsert(&self, setting: &SettingUpsert) -> Result<Setting, StoreError>;

    /// Create the setting only if `key` is unknown. Returns whether a row was written.
    async fn insert_if_absent(&self, setting: &SettingUpsert) -> Result<bool, StoreError>;

    /// Hard delete. Returns whether a setting was removed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;
}

/// The stored record for a subscriber that is about to be created.
#[derive(Debug, Clone)]
pub struct SubscriberInsert {
    pub subscriber: NewSubscriber,
    pub verification_token: String,
    pub unsubscribe_token: String,
    pub subscribed_at: DateTime<Utc>,
}

#[async_trait]
pub trait SubscriberStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<Subscriber>, StoreError>;

    /// Fails with `StoreError::Conflict` when the email is already taken.
    async fn insert(&self, new: &SubscriberInsert) -> Result<Subscriber, StoreError>;

    /// Consume a verification token. `None` if no subscriber holds it.
    async fn verify_by_token(&self, token: &str) -> Result<Option<Subscriber>, StoreError>;

    /// Deactivate the holder of an unsubscribe token. `None` if no subscriber holds it.
    async fn deactivate_by_token(
        &self,
        token: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Subscriber>, StoreError>;

    /// Turn an inactive subscriber back on with fresh interests and contact details.
    /// `None` if the subscriber is gone or already active.
    async fn reactivate(
        &self,
        id: Uuid,
        subscriber: &NewSubscriber,
        at: DateTime<Utc>,
    ) -> Result<Option<Subscriber>, StoreError>;

    /// Active, verified subscribers holding at least one of `interests`.
    async fn find_eligible(&self, interests: &[Interest]) -> Result<Vec<Subscriber>, StoreError>;

    /// Bump `emails_sent` and stamp `last_email_sent` for a single subscriber.
    async fn record_email_sent(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;
}
