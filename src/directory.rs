//! Subscriber directory: opt-in, verification, opt-out and newsletter targeting.

use crate::domain::{NewSubscriber, NewsletterType, Subscriber, SubscriptionToken};
use crate::email_client::EmailSender;
use crate::site_settings::SiteSettings;
use crate::store::{StoreError, SubscriberInsert, SubscriberStore};
use chrono::Utc;
use htmlescape::encode_minimal;
use std::sync::Arc;
use uuid::Uuid;

#[derive(thiserror::Error, Debug)]
pub enum DirectoryError {
    #[error("Email already subscribed")]
    DuplicateSubscription,
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug)]
pub enum SubscribeOutcome {
    Created(Subscriber),
    Reactivated(Subscriber),
}

impl SubscribeOutcome {
    pub fn subscriber(&self) -> &Subscriber {
        match self {
            SubscribeOutcome::Created(s) | SubscribeOutcome::Reactivated(s) => s,
        }
    }
}

#[derive(Clone)]
pub struct SubscriberDirectory {
    store: Arc<dyn SubscriberStore>,
    settings: SiteSettings,
    email_sender: Arc<dyn EmailSender>,
    frontend_url: String,
}

impl SubscriberDirectory {
    pub fn new(
        store: Arc<dyn SubscriberStore>,
        settings: SiteSettings,
        email_sender: Arc<dyn EmailSender>,
        frontend_url: String,
    ) -> Self {
        Self {
            store,
            settings,
            email_sender,
            frontend_url,
        }
    }

    #[tracing::instrument(
        name = "Adding a new subscriber",
        skip(self, new_subscriber),
        fields(subscriber_email = %new_subscriber.email)
    )]
    pub async fn subscribe(
        &self,
        new_subscriber: NewSubscriber,
    ) -> Result<SubscribeOutcome, DirectoryError> {
        let outcome = match self
            .store
            .find_by_email(new_subscriber.email.as_ref())
            .await?
        {
            Some(existing) if existing.is_active => {
                return Err(DirectoryError::DuplicateSubscription)
            }
            Some(existing) => {
                // Another request may have reactivated the record since it was read.
                let reactivated = self
                    .store
                    .reactivate(existing.id, &new_subscriber, Utc::now())
                    .await?
                    .ok_or(DirectoryError::DuplicateSubscription)?;
                SubscribeOutcome::Reactivated(reactivated)
            }
            None => {
                let insert = SubscriberInsert {
                    subscriber: new_subscriber,
                    verification_token: SubscriptionToken::generate().into_inner(),
                    unsubscribe_token: SubscriptionToken::generate().into_inner(),
                    subscribed_at: Utc::now(),
                };
                match self.store.insert(&insert).await {
                    Ok(created) => SubscribeOutcome::Created(created),
                    // A concurrent subscribe for the same email won the insert.
                    Err(StoreError::Conflict) => return Err(DirectoryError::DuplicateSubscription),
                    Err(e) => return Err(e.into()),
                }
            }
        };

        // The subscription stands even if the confirmation never leaves the building.
        if let Err(e) = self.send_confirmation_email(outcome.subscriber()).await {
            tracing::error!(
                error.cause_chain = ?e,
                "Subscription confirmation email to {} failed",
                outcome.subscriber().email
            );
        }

        Ok(outcome)
    }

    /// Mark the owner of `token` as verified. Verification tokens are single use.
    #[tracing::instrument(name = "Verify a subscriber", skip(self, token))]
    pub async fn verify(&self, token: &str) -> Result<Subscriber, DirectoryError> {
        let token = SubscriptionToken::parse(token.to_string())
            .map_err(|_| DirectoryError::InvalidToken)?;
        self.store
            .verify_by_token(token.as_ref())
            .await?
            .ok_or(DirectoryError::InvalidToken)
    }

    /// Deactivate the owner of `token`. The token stays valid, so repeating the call is harmless.
    #[tracing::instrument(name = "Unsubscribe a subscriber", skip(self, token))]
    pub async fn unsubscribe(&self, token: &str) -> Result<Subscriber, DirectoryError> {
        let token = SubscriptionToken::parse(token.to_string())
            .map_err(|_| DirectoryError::InvalidToken)?;
        self.store
            .deactivate_by_token(token.as_ref(), Utc::now())
            .await?
            .ok_or(DirectoryError::InvalidToken)
    }

    /// Active, verified subscribers interested in `newsletter_type` or in `general`.
    #[tracing::instrument(name = "Find subscribers eligible for a newsletter", skip(self))]
    pub async fn find_eligible_for_newsletter(
        &self,
        newsletter_type: NewsletterType,
    ) -> Result<Vec<Subscriber>, StoreError> {
        self.store.find_eligible(&newsletter_type.audience()).await
    }

    /// Engagement bookkeeping after a newsletter reached `subscriber_id`.
    pub async fn record_email_sent(&self, subscriber_id: Uuid) -> Result<(), StoreError> {
        self.store.record_email_sent(subscriber_id, Utc::now()).await
    }

    #[tracing::instrument(
        name = "Send a confirmation email to a new subscriber",
        skip(self, subscriber),
        fields(subscriber_email = %subscriber.email)
    )]
    async fn send_confirmation_email(
        &self,
        subscriber: &Subscriber,
    ) -> Result<(), crate::email_client::TransportError> {
        let site_name = self.settings.site_name().await;
        let (subject, html_body) =
            confirmation_email(subscriber, &site_name, &self.frontend_url);
        self.email_sender
            .send_email(&subscriber.email, &subject, &html_body)
            .await
    }
}

/// Subject and HTML body of the email sent on (re)subscription.
fn confirmation_email(subscriber: &Subscriber, site_name: &str, frontend_url: &str) -> (String, String) {
    let escaped_site_name = encode_minimal(site_name);
    let greeting = match &subscriber.first_name {
        Some(_) => encode_minimal(&subscriber.full_name()),
        None => "there".to_string(),
    };
    let interests = if subscriber.interests.is_empty() {
        "All topics".to_string()
    } else {
        subscriber
            .interests
            .iter()
            .map(|i| i.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    };
    let call_to_action = match &subscriber.verification_token {
        Some(token) => {
            let verify_url = format!("{frontend_url}/verify/{token}");
            format!(
                r#"<p>To complete your subscription, please confirm your email address by clicking the button below:</p>
          <div style="text-align: center; margin: 30px 0;">
            <a href="{verify_url}" style="background-color: #007bff; color: white; padding: 12px 24px; text-decoration: none; border-radius: 5px; display: inline-block;">Confirm Subscription</a>
          </div>
          <p>If the button doesn't work, copy and paste this link into your browser:</p>
          <p style="word-break: break-all; color: #007bff;">{verify_url}</p>"#
            )
        }
        None => "<p>Your subscription is active again.</p>".to_string(),
    };

    let subject = format!("Welcome to {site_name}! Please confirm your subscription");
    let html_body = format!(
        r#"<div style="max-width: 600px; margin: 0 auto; font-family: Arial, sans-serif;">
          <h2>Welcome to {escaped_site_name}!</h2>
          <p>Hi {greeting},</p>
          <p>Thank you for subscribing to our newsletter.</p>
          {call_to_action}
          <div style="margin: 20px 0; padding: 20px; background-color: #f8f9fa; border-radius: 5px;">
            <p><strong>Your Subscription Details:</strong></p>
            <ul>
              <li>Email: {email}</li>
              <li>Interests: {interests}</li>
              <li>Subscribed: {subscribed}</li>
            </ul>
          </div>
          <p>Best regards,<br>The {escaped_site_name} Team</p>
          <hr style="margin: 20px 0;">
          <p style="font-size: 12px; color: #666;">If you didn't subscribe to this newsletter, please ignore this email.</p>
        </div>"#,
        email = subscriber.email,
        subscribed = subscriber.subscribed_at.format("%Y-%m-%d"),
    );
    (subject, html_body)
}
