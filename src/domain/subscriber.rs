use crate::domain::{Interest, PersonName, SubscriberEmail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a subscription came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SubscriberSource {
    #[default]
    Website,
    Mobile,
    Import,
    Api,
}

impl SubscriberSource {
    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "website" => Ok(Self::Website),
            "mobile" => Ok(Self::Mobile),
            "import" => Ok(Self::Import),
            "api" => Ok(Self::Api),
            other => Err(format!("{other} is not a valid subscription source.")),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Website => "website",
            Self::Mobile => "mobile",
            Self::Import => "import",
            Self::Api => "api",
        }
    }
}

/// Everything we need to create or reactivate a subscription, already validated.
#[derive(Debug, Clone)]
pub struct NewSubscriber {
    pub email: SubscriberEmail,
    pub first_name: Option<PersonName>,
    pub last_name: Option<PersonName>,
    pub interests: Vec<Interest>,
    pub source: SubscriberSource,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// A stored subscriber.
///
/// Exactly one record exists per email. `unsubscribe_token` is assigned at creation and never
/// changes; `verification_token` is cleared once the address has been verified.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscriber {
    pub id: Uuid,
    pub email: SubscriberEmail,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub interests: Vec<Interest>,
    pub is_active: bool,
    pub is_verified: bool,
    #[serde(skip_serializing)]
    pub verification_token: Option<String>,
    #[serde(skip_serializing)]
    pub unsubscribe_token: String,
    pub source: SubscriberSource,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub subscribed_at: DateTime<Utc>,
    pub unsubscribed_at: Option<DateTime<Utc>>,
    pub last_email_sent: Option<DateTime<Utc>>,
    pub emails_sent: i32,
    pub emails_opened: i32,
    pub emails_clicked: i32,
}

impl Subscriber {
    /// "First Last" when both are known, otherwise whatever we have, falling back to the email.
    pub fn full_name(&self) -> String {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => format!("{first} {last}"),
            (Some(first), None) => first.clone(),
            _ => self.email.to_string(),
        }
    }

    /// Share of sent emails that were opened or clicked, as a percentage.
    pub fn engagement_rate(&self) -> f64 {
        if self.emails_sent == 0 {
            return 0.0;
        }
        f64::from(self.emails_opened + self.emails_clicked) / (f64::from(self.emails_sent) * 2.0)
            * 100.0
    }

    pub fn is_interested_in_any(&self, interests: &[Interest]) -> bool {
        self.interests.iter().any(|i| interests.contains(i))
    }
}
