use crate::domain::{ContactStatus, PersonName, SubscriberEmail};
use crate::email_client::EmailSender;
use crate::routes::{
    client_metadata, like_pattern, monthly_counts, ok_data, ok_message, twelve_months_ago,
    ApiError, ListResponse, Page,
};
use crate::site_settings::SiteSettings;
use actix_web::{web, HttpRequest, HttpResponse};
use anyhow::Context;
use chrono::{DateTime, Utc};
use htmlescape::encode_minimal;
use serde_json::{json, Map, Value};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

const MAX_MESSAGE_CHARS: usize = 3000;
pub(crate) const CONTACT_COLUMNS: &str = "id, first_name, last_name, email, title, file, survey, \
    organization, advise, message, status, ip_address, user_agent, created_at, updated_at";

#[derive(Debug, serde::Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub title: Option<String>,
    pub file: Option<String>,
    pub survey: Option<String>,
    pub organization: Option<String>,
    pub advise: Option<String>,
    pub message: String,
    pub status: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contact {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// `Contact` plus its derived `fullName`.
#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactResponse {
    #[serde(flatten)]
    contact: Contact,
    full_name: String,
}

impl From<Contact> for ContactResponse {
    fn from(contact: Contact) -> Self {
        Self {
            full_name: contact.full_name(),
            contact,
        }
    }
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactSubmission {
    first_name: String,
    last_name: String,
    email: String,
    message: String,
    title: Option<String>,
    file: Option<String>,
    survey: Option<String>,
    organization: Option<String>,
    advise: Option<String>,
}

struct NewContact {
    first_name: PersonName,
    last_name: PersonName,
    email: SubscriberEmail,
    message: String,
}

impl TryFrom<&ContactSubmission> for NewContact {
    type Error = String;

    fn try_from(body: &ContactSubmission) -> Result<Self, Self::Error> {
        let message = body.message.trim();
        if message.is_empty() {
            return Err("The message cannot be empty.".into());
        }
        if message.chars().count() > MAX_MESSAGE_CHARS {
            return Err(format!(
                "The message cannot be longer than {MAX_MESSAGE_CHARS} characters."
            ));
        }
        Ok(Self {
            first_name: PersonName::parse(body.first_name.clone())?,
            last_name: PersonName::parse(body.last_name.clone())?,
            email: SubscriberEmail::parse(body.email.clone())?,
            message: message.to_string(),
        })
    }
}

#[tracing::instrument(
    name = "Submit a contact form",
    skip(body, req, pool, settings, email_sender),
    fields(contact_email = %body.email)
)]
pub async fn submit_contact(
    body: web::Json<ContactSubmission>,
    req: HttpRequest,
    pool: web::Data<PgPool>,
    settings: web::Data<SiteSettings>,
    email_sender: web::Data<dyn EmailSender>,
) -> Result<HttpResponse, ApiError> {
    let new_contact = NewContact::try_from(&body.0).map_err(ApiError::Validation)?;
    let (ip_address, user_agent) = client_metadata(&req);

    let sql = format!(
        r#"
        INSERT INTO contacts (
            id, first_name, last_name, email, title, file, survey, organization, advise,
            message, status, ip_address, user_agent, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'new', $11, $12, now(), now())
        RETURNING {CONTACT_COLUMNS}
        "#
    );
    let contact = sqlx::query_as::<_, Contact>(&sql)
        .bind(Uuid::new_v4())
        .bind(new_contact.first_name.as_ref())
        .bind(new_contact.last_name.as_ref())
        .bind(new_contact.email.as_ref())
        .bind(body.title.as_deref())
        .bind(body.file.as_deref())
        .bind(body.survey.as_deref())
        .bind(body.organization.as_deref())
        .bind(body.advise.as_deref())
        .bind(&new_contact.message)
        .bind(ip_address)
        .bind(user_agent)
        .fetch_one(pool.get_ref())
        .await
        .context("Failed to store a new contact.")?;

    let site_name = settings.site_name().await;
    let (subject, html_body) = contact_confirmation_email(&contact, &site_name);
    if let Err(e) = email_sender
        .send_email(&new_contact.email, &subject, &html_body)
        .await
    {
        tracing::error!(error.cause_chain = ?e, "Contact confirmation email failed");
    }

    Ok(HttpResponse::Created().json(json!({
        "success": true,
        "message": "Contact form submitted successfully",
        "data": ContactResponse::from(contact),
    })))
}

fn contact_confirmation_email(contact: &Contact, site_name: &str) -> (String, String) {
    let subject = format!("Thank you for contacting {site_name}");
    let html_body = format!(
        r#"<div style="max-width: 600px; margin: 0 auto; font-family: Arial, sans-serif;">
          <h2>Thank you for contacting us!</h2>
          <p>Hi {name},</p>
          <p>We've received your message and will get back to you as soon as possible.</p>
          <div style="margin: 20px 0; padding: 20px; background-color: #f8f9fa; border-radius: 5px;">
            <p><strong>Your Message Details:</strong></p>
            <div style="margin: 10px 0; padding: 15px; background-color: white; border-left: 4px solid #007bff;">{message}</div>
            <ul>
              <li><strong>Submitted:</strong> {submitted}</li>
              <li><strong>Reference ID:</strong> {id}</li>
            </ul>
          </div>
          <p>We typically respond within 24-48 hours during business days.</p>
          <p>Best regards,<br>The {site_name} Team</p>
        </div>"#,
        name = encode_minimal(&contact.full_name()),
        message = encode_minimal(&contact.message),
        submitted = contact.created_at.format("%Y-%m-%d"),
        id = contact.id,
        site_name = encode_minimal(site_name),
    );
    (subject, html_body)
}

#[derive(serde::Deserialize)]
pub struct ContactListQuery {
    page: Option<i64>,
    limit: Option<i64>,
    status: Option<String>,
    search: Option<String>,
}

fn push_contact_filters(
    builder: &mut QueryBuilder<'_, Postgres>,
    status: Option<ContactStatus>,
    search: Option<String>,
) {
    if let Some(status) = status {
        builder.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(search) = search {
        let pattern = like_pattern(&search);
        builder.push(" AND (");
        for (i, column) in ["first_name", "last_name", "email", "title", "organization"]
            .iter()
            .enumerate()
        {
            if i > 0 {
                builder.push(" OR ");
            }
            builder
                .push(*column)
                .push(" ILIKE ")
                .push_bind(pattern.clone());
        }
        builder.push(")");
    }
}

#[tracing::instrument(name = "List contacts", skip(query, pool))]
pub async fn list_contacts(
    query: web::Query<ContactListQuery>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, ApiError> {
    let ContactListQuery {
        page,
        limit,
        status,
        search,
    } = query.into_inner();
    let page = Page::new(page, limit);
    let status = status
        .as_deref()
        .map(ContactStatus::parse)
        .transpose()
        .map_err(ApiError::Validation)?;
    let search = search.filter(|s| !s.trim().is_empty());

    let mut select = QueryBuilder::new(format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE TRUE"));
    push_contact_filters(&mut select, status, search.clone());
    select
        .push(" ORDER BY created_at DESC LIMIT ")
        .push_bind(page.limit)
        .push(" OFFSET ")
        .push_bind(page.offset());
    let contacts: Vec<ContactResponse> = select
        .build_query_as::<Contact>()
        .fetch_all(pool.get_ref())
        .await
        .context("Failed to fetch contacts.")?
        .into_iter()
        .map(ContactResponse::from)
        .collect();

    let mut count = QueryBuilder::new("SELECT COUNT(*) FROM contacts WHERE TRUE");
    push_contact_filters(&mut count, status, search);
    let (total,): (i64,) = count
        .build_query_as()
        .fetch_one(pool.get_ref())
        .await
        .context("Failed to count contacts.")?;

    Ok(HttpResponse::Ok().json(ListResponse::new(contacts, total, page)))
}

async fn fetch_contact(pool: &PgPool, id: Uuid) -> Result<Contact, ApiError> {
    let sql = format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE id = $1");
    sqlx::query_as::<_, Contact>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch a contact.")?
        .ok_or_else(|| ApiError::NotFound("Contact not found".into()))
}

#[tracing::instrument(name = "Get a contact", skip(pool))]
pub async fn get_contact(
    id: web::Path<Uuid>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, ApiError> {
    let contact = fetch_contact(&pool, id.into_inner()).await?;
    Ok(ok_data(ContactResponse::from(contact)))
}

#[derive(serde::Deserialize)]
pub struct ContactUpdate {
    status: String,
}

/// Only the handling status of a contact can change.
#[tracing::instrument(name = "Update a contact", skip(body, pool))]
pub async fn update_contact(
    id: web::Path<Uuid>,
    body: web::Json<ContactUpdate>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, ApiError> {
    let status = ContactStatus::parse(&body.status).map_err(ApiError::Validation)?;
    let sql = format!(
        "UPDATE contacts SET status = $2, updated_at = now() WHERE id = $1 RETURNING {CONTACT_COLUMNS}"
    );
    let contact = sqlx::query_as::<_, Contact>(&sql)
        .bind(id.into_inner())
        .bind(status.as_str())
        .fetch_optional(pool.get_ref())
        .await
        .context("Failed to update a contact.")?
        .ok_or_else(|| ApiError::NotFound("Contact not found".into()))?;
    Ok(ok_data(ContactResponse::from(contact)))
}

#[tracing::instrument(name = "Delete a contact", skip(pool))]
pub async fn delete_contact(
    id: web::Path<Uuid>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, ApiError> {
    let result = sqlx::query("DELETE FROM contacts WHERE id = $1")
        .bind(id.into_inner())
        .execute(pool.get_ref())
        .await
        .context("Failed to delete a contact.")?;
    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound("Contact not found".into()));
    }
    Ok(ok_message("Contact deleted successfully"))
}

#[tracing::instrument(name = "Contact statistics", skip(pool))]
pub async fn contact_stats(pool: web::Data<PgPool>) -> Result<HttpResponse, ApiError> {
    let counts: Vec<(String, i64)> =
        sqlx::query_as("SELECT status, COUNT(*) FROM contacts GROUP BY status")
            .fetch_all(pool.get_ref())
            .await
            .context("Failed to count contacts by status.")?;

    let mut by_status = Map::new();
    for status in ContactStatus::ALL {
        let count = counts
            .iter()
            .find(|(s, _)| s == status.as_str())
            .map_or(0, |(_, c)| *c);
        by_status.insert(status.as_str().to_string(), Value::from(count));
    }
    let total: i64 = counts.iter().map(|(_, c)| c).sum();
    let monthly_data = monthly_counts(&pool, "contacts", "created_at", twelve_months_ago(Utc::now()))
        .await
        .context("Failed to count contacts by month.")?;

    Ok(ok_data(json!({
        "total": total,
        "byStatus": by_status,
        "monthlyData": monthly_data,
    })))
}
