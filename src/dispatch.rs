//! Batched delivery of a published newsletter to every eligible subscriber.

use crate::directory::SubscriberDirectory;
use crate::domain::{plain_text, preview, reading_time, NewsletterType, Subscriber};
use crate::email_client::EmailSender;
use crate::site_settings::{
    SiteSettings, DEFAULT_BATCH_SIZE, DEFAULT_SITE_NAME, MAX_NEWSLETTERS_PER_BATCH, SITE_NAME,
};
use crate::store::StoreError;
use chrono::{DateTime, Datelike, Utc};
use futures::future::join_all;
use htmlescape::encode_minimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

const PREVIEW_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct DispatchResult {
    pub sent: usize,
    pub failed: usize,
    pub total: usize,
}

#[derive(thiserror::Error, Debug)]
pub enum DispatchError {
    #[error("Failed to prepare the newsletter dispatch.")]
    Store(#[from] StoreError),
}

/// What the email needs to know about the newsletter being sent.
#[derive(Debug, Clone)]
pub struct NewsletterIssue {
    pub title: String,
    pub slug: String,
    pub content: String,
    pub excerpt: Option<String>,
    pub newsletter_type: NewsletterType,
    pub publish_date: DateTime<Utc>,
    pub featured_image: Option<String>,
    pub tags: Vec<String>,
}

#[derive(Clone)]
pub struct NewsletterDispatcher {
    directory: SubscriberDirectory,
    settings: SiteSettings,
    email_sender: Arc<dyn EmailSender>,
    frontend_url: String,
    batch_delay: Duration,
}

impl NewsletterDispatcher {
    pub fn new(
        directory: SubscriberDirectory,
        settings: SiteSettings,
        email_sender: Arc<dyn EmailSender>,
        frontend_url: String,
        batch_delay: Duration,
    ) -> Self {
        Self {
            directory,
            settings,
            email_sender,
            frontend_url,
            batch_delay,
        }
    }

    /// Send `issue` to every eligible subscriber.
    ///
    /// Batches go out one after the other, sends within a batch run concurrently and a failed send
    /// only bumps `failed`. Only the initial subscriber and settings reads can fail the dispatch.
    /// The caller is expected to have checked that the newsletter is published.
    #[tracing::instrument(
        name = "Dispatch a newsletter",
        skip(self, issue),
        fields(slug = %issue.slug, newsletter_type = %issue.newsletter_type)
    )]
    pub async fn dispatch(&self, issue: &NewsletterIssue) -> Result<DispatchResult, DispatchError> {
        let subscribers = self
            .directory
            .find_eligible_for_newsletter(issue.newsletter_type)
            .await?;
        if subscribers.is_empty() {
            tracing::info!("No eligible subscribers, nothing to send");
            return Ok(DispatchResult::default());
        }

        let batch_size = self
            .settings
            .get_as::<usize>(MAX_NEWSLETTERS_PER_BATCH, DEFAULT_BATCH_SIZE)
            .await?
            .max(1);
        let site_name = self
            .settings
            .get_as::<String>(SITE_NAME, DEFAULT_SITE_NAME.to_string())
            .await?;

        let mut result = DispatchResult {
            total: subscribers.len(),
            ..Default::default()
        };
        let mut stat_updates: Vec<JoinHandle<()>> = Vec::with_capacity(subscribers.len());
        let batches: Vec<&[Subscriber]> = subscribers.chunks(batch_size).collect();
        let site_name = site_name.as_str();
        let frontend_url = self.frontend_url.as_str();

        for (index, batch) in batches.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.batch_delay).await;
            }

            let outcomes = join_all(batch.iter().map(|subscriber| async move {
                let (subject, html_body) =
                    newsletter_email(issue, subscriber, site_name, frontend_url);
                let outcome = self
                    .email_sender
                    .send_email(&subscriber.email, &subject, &html_body)
                    .await;
                (subscriber, outcome)
            }))
            .await;

            for (subscriber, outcome) in outcomes {
                match outcome {
                    Ok(()) => {
                        result.sent += 1;
                        let directory = self.directory.clone();
                        let subscriber_id = subscriber.id;
                        stat_updates.push(tokio::spawn(async move {
                            if let Err(e) = directory.record_email_sent(subscriber_id).await {
                                tracing::warn!(
                                    error.cause_chain = ?e,
                                    %subscriber_id,
                                    "Failed to update subscriber email stats"
                                );
                            }
                        }));
                    }
                    Err(e) => {
                        result.failed += 1;
                        tracing::error!(
                            error.cause_chain = ?e,
                            error.message = %e,
                            "Failed to send newsletter to {}",
                            subscriber.email
                        );
                    }
                }
            }
            tracing::info!(
                "Batch {}/{} done: {} sent, {} failed so far",
                index + 1,
                batches.len(),
                result.sent,
                result.failed
            );
        }

        for handle in join_all(stat_updates).await {
            if let Err(e) = handle {
                tracing::warn!(error.message = %e, "A subscriber stats update task did not finish");
            }
        }

        Ok(result)
    }
}

fn newsletter_email(
    issue: &NewsletterIssue,
    subscriber: &Subscriber,
    site_name: &str,
    frontend_url: &str,
) -> (String, String) {
    let subject = issue.title.clone();
    let site_name = encode_minimal(site_name);
    let title = encode_minimal(&issue.title);
    let read_more_url = format!("{frontend_url}/newsletters/{}", issue.slug);
    let unsubscribe_url = format!(
        "{frontend_url}/unsubscribe/{}",
        subscriber.unsubscribe_token
    );

    let featured_image = issue
        .featured_image
        .as_ref()
        .map(|src| {
            format!(
                r#"<img src="{}" alt="{title}" style="width: 100%; max-height: 300px; object-fit: cover; border-radius: 8px; margin-bottom: 20px;">"#,
                encode_minimal(src)
            )
        })
        .unwrap_or_default();
    let excerpt = issue
        .excerpt
        .as_ref()
        .map(|e| {
            format!(
                r#"<p style="font-size: 18px; color: #555; font-style: italic;">{}</p>"#,
                encode_minimal(e)
            )
        })
        .unwrap_or_default();
    let tags = if issue.tags.is_empty() {
        String::new()
    } else {
        let chips: String = issue
            .tags
            .iter()
            .map(|tag| {
                format!(
                    r#"<span style="background-color: #e9ecef; padding: 4px 8px; border-radius: 4px; margin-right: 8px; font-size: 12px;">{}</span>"#,
                    encode_minimal(tag)
                )
            })
            .collect();
        format!(r#"<div style="margin: 20px 0;">{chips}</div>"#)
    };

    let html_body = format!(
        r#"<div style="max-width: 600px; margin: 0 auto; font-family: Arial, sans-serif;">
          <div style="background-color: #007bff; color: white; padding: 20px; text-align: center;">
            <h1>{site_name}</h1>
          </div>
          <div style="padding: 20px;">
            <h2>{title}</h2>
            {featured_image}
            <p style="color: #666;">{label} | {published} | {minutes} min read</p>
            {excerpt}
            <div style="line-height: 1.6;">{body}</div>
            <div style="text-align: center; margin: 30px 0;">
              <a href="{read_more_url}" style="background-color: #007bff; color: white; padding: 12px 24px; text-decoration: none; border-radius: 5px; display: inline-block;">Read Full Newsletter</a>
            </div>
            {tags}
          </div>
          <div style="background-color: #f8f9fa; padding: 20px; text-align: center; font-size: 12px; color: #666;">
            <p>You're receiving this because you subscribed to {site_name} newsletters.</p>
            <p><a href="{unsubscribe_url}" style="color: #666;">Unsubscribe</a></p>
            <p>&copy; {year} {site_name}. All rights reserved.</p>
          </div>
        </div>"#,
        label = issue.newsletter_type.label(),
        published = issue.publish_date.format("%Y-%m-%d"),
        minutes = reading_time(&issue.content),
        body = encode_minimal(&preview(&plain_text(&issue.content), PREVIEW_CHARS)),
        year = Utc::now().year(),
    );
    (subject, html_body)
}
