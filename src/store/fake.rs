//! In-memory stores with failure injection, used by unit tests.

use crate::domain::{Interest, NewSubscriber, Setting, SettingUpsert, Subscriber};
use crate::store::{
    SettingsFilter, SettingsStore, StoreError, SubscriberInsert, SubscriberStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

fn unavailable() -> StoreError {
    StoreError::Corrupted("the fake store is unavailable".into())
}

#[derive(Default)]
pub struct FakeSettingsStore {
    pub settings: Mutex<BTreeMap<String, Setting>>,
    pub unavailable: AtomicBool,
}

impl FakeSettingsStore {
    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::Relaxed) {
            Err(unavailable())
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SettingsStore for FakeSettingsStore {
    async fn find_by_key(&self, key: &str) -> Result<Option<Setting>, StoreError> {
        self.check()?;
        Ok(self.settings.lock().await.get(key).cloned())
    }

    async fn find(&self, filter: &SettingsFilter) -> Result<Vec<Setting>, StoreError> {
        self.check()?;
        let mut found: Vec<Setting> = self
            .settings
            .lock()
            .await
            .values()
            .filter(|s| filter.category.map_or(true, |c| s.category == c))
            .filter(|s| filter.is_public.map_or(true, |p| s.is_public == p))
            .cloned()
            .collect();
        found.sort_by(|a, b| (a.category, &a.key).cmp(&(b.category, &b.key)));
        Ok(found)
    }

    async fn upsert(&self, upsert: &SettingUpsert) -> Result<Setting, StoreError> {
        self.check()?;
        let now = Utc::now();
        let mut settings = self.settings.lock().await;
        let previous = settings.get(&upsert.key);
        let setting = Setting {
            key: upsert.key.clone(),
            value: upsert.value.clone(),
            kind: upsert.value.kind(),
            description: upsert.description.clone(),
            category: upsert.category,
            is_public: upsert
                .is_public
                .or_else(|| previous.map(|p| p.is_public))
                .unwrap_or(false),
            created_at: previous.map_or(now, |p| p.created_at),
            updated_at: now,
        };
        settings.insert(setting.key.clone(), setting.clone());
        Ok(setting)
    }

    async fn insert_if_absent(&self, upsert: &SettingUpsert) -> Result<bool, StoreError> {
        self.check()?;
        if self.settings.lock().await.contains_key(&upsert.key) {
            return Ok(false);
        }
        self.upsert(upsert).await?;
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.check()?;
        Ok(self.settings.lock().await.remove(key).is_some())
    }
}

#[derive(Default)]
pub struct FakeSubscriberStore {
    pub subscribers: Mutex<Vec<Subscriber>>,
    pub unavailable: AtomicBool,
    /// Only `record_email_sent` fails while set.
    pub fail_stat_updates: AtomicBool,
    /// `find_by_email` misses every record while set, like a lookup racing a concurrent insert.
    pub stale_email_lookups: AtomicBool,
}

impl FakeSubscriberStore {
    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::Relaxed) {
            Err(unavailable())
        } else {
            Ok(())
        }
    }

    pub async fn all(&self) -> Vec<Subscriber> {
        self.subscribers.lock().await.clone()
    }

    async fn modify_where(
        &self,
        predicate: impl Fn(&Subscriber) -> bool,
        change: impl FnOnce(&mut Subscriber),
    ) -> Result<Option<Subscriber>, StoreError> {
        self.check()?;
        let mut subscribers = self.subscribers.lock().await;
        Ok(subscribers.iter_mut().find(|s| predicate(s)).map(|stored| {
            change(stored);
            stored.clone()
        }))
    }
}

#[async_trait]
impl SubscriberStore for FakeSubscriberStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<Subscriber>, StoreError> {
        self.check()?;
        if self.stale_email_lookups.load(Ordering::Relaxed) {
            return Ok(None);
        }
        Ok(self
            .subscribers
            .lock()
            .await
            .iter()
            .find(|s| s.email.as_ref() == email)
            .cloned())
    }

    async fn insert(&self, new: &SubscriberInsert) -> Result<Subscriber, StoreError> {
        self.check()?;
        let mut subscribers = self.subscribers.lock().await;
        if subscribers
            .iter()
            .any(|s| s.email == new.subscriber.email)
        {
            return Err(StoreError::Conflict);
        }
        let subscriber = Subscriber {
            id: Uuid::new_v4(),
            email: new.subscriber.email.clone(),
            first_name: new.subscriber.first_name.as_ref().map(|n| n.to_string()),
            last_name: new.subscriber.last_name.as_ref().map(|n| n.to_string()),
            interests: new.subscriber.interests.clone(),
            is_active: true,
            is_verified: false,
            verification_token: Some(new.verification_token.clone()),
            unsubscribe_token: new.unsubscribe_token.clone(),
            source: new.subscriber.source,
            ip_address: new.subscriber.ip_address.clone(),
            user_agent: new.subscriber.user_agent.clone(),
            subscribed_at: new.subscribed_at,
            unsubscribed_at: None,
            last_email_sent: None,
            emails_sent: 0,
            emails_opened: 0,
            emails_clicked: 0,
        };
        subscribers.push(subscriber.clone());
        Ok(subscriber)
    }

    async fn verify_by_token(&self, token: &str) -> Result<Option<Subscriber>, StoreError> {
        self.modify_where(
            |s| s.verification_token.as_deref() == Some(token),
            |s| {
                s.is_verified = true;
                s.verification_token = None;
            },
        )
        .await
    }

    async fn deactivate_by_token(
        &self,
        token: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Subscriber>, StoreError> {
        self.modify_where(
            |s| s.unsubscribe_token == token,
            |s| {
                s.is_active = false;
                s.unsubscribed_at = Some(at);
            },
        )
        .await
    }

    async fn reactivate(
        &self,
        id: Uuid,
        subscriber: &NewSubscriber,
        at: DateTime<Utc>,
    ) -> Result<Option<Subscriber>, StoreError> {
        self.modify_where(
            |s| s.id == id && !s.is_active,
            |s| {
                s.is_active = true;
                s.unsubscribed_at = None;
                s.subscribed_at = at;
                s.interests = subscriber.interests.clone();
                if let Some(first_name) = &subscriber.first_name {
                    s.first_name = Some(first_name.to_string());
                }
                if let Some(last_name) = &subscriber.last_name {
                    s.last_name = Some(last_name.to_string());
                }
                s.ip_address = subscriber.ip_address.clone();
                s.user_agent = subscriber.user_agent.clone();
            },
        )
        .await
    }

    async fn find_eligible(&self, interests: &[Interest]) -> Result<Vec<Subscriber>, StoreError> {
        self.check()?;
        Ok(self
            .subscribers
            .lock()
            .await
            .iter()
            .filter(|s| s.is_active && s.is_verified && s.is_interested_in_any(interests))
            .cloned()
            .collect())
    }

    async fn record_email_sent(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.check()?;
        if self.fail_stat_updates.load(Ordering::Relaxed) {
            return Err(unavailable());
        }
        let mut subscribers = self.subscribers.lock().await;
        if let Some(stored) = subscribers.iter_mut().find(|s| s.id == id) {
            stored.emails_sent += 1;
            stored.last_email_sent = Some(at);
        }
        Ok(())
    }
}
