use crate::dispatch::{DispatchError, NewsletterDispatcher, NewsletterIssue};
use crate::domain::{generate_slug, reading_time, NewsletterStatus, NewsletterType};
use crate::routes::{like_pattern, ok_data, ok_message, ApiError, ListResponse, Page};
use crate::store::StoreError;
use actix_web::{web, HttpResponse};
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;
use validator::validate_url;

const TITLE_MIN_CHARS: usize = 5;
const TITLE_MAX_CHARS: usize = 200;
const CONTENT_MIN_CHARS: usize = 10;
const EXCERPT_MAX_CHARS: usize = 500;

const NEWSLETTER_SELECT: &str = r#"
    SELECT n.id, n.title, n.slug, n.content, n.excerpt, n.newsletter_type, n.featured_image,
           n.video_url, n.tags, n.author_id, n.status, n.publish_date, n.views, n.featured,
           n.email_sent, n.email_sent_at, n.created_at, n.updated_at,
           u.first_name AS author_first_name, u.last_name AS author_last_name,
           u.avatar AS author_avatar
    FROM newsletters n
    LEFT JOIN users u ON u.id = n.author_id
    WHERE TRUE"#;

#[derive(sqlx::FromRow)]
struct NewsletterRow {
    id: Uuid,
    title: String,
    slug: String,
    content: String,
    excerpt: Option<String>,
    newsletter_type: String,
    featured_image: Option<String>,
    video_url: Option<String>,
    tags: Vec<String>,
    author_id: Option<Uuid>,
    status: String,
    publish_date: Option<DateTime<Utc>>,
    views: i32,
    featured: bool,
    email_sent: bool,
    email_sent_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    author_first_name: Option<String>,
    author_last_name: Option<String>,
    author_avatar: Option<String>,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    id: Uuid,
    first_name: String,
    last_name: String,
    full_name: String,
    avatar: Option<String>,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Newsletter {
    pub id: Uuid,
    pub title: String,
    pub slug: String,
    pub content: String,
    pub excerpt: Option<String>,
    #[serde(rename = "type")]
    pub newsletter_type: NewsletterType,
    pub featured_image: Option<String>,
    pub video_url: Option<String>,
    pub tags: Vec<String>,
    #[serde(skip_serializing)]
    pub author_id: Option<Uuid>,
    pub author: Option<Author>,
    pub status: NewsletterStatus,
    pub publish_date: Option<DateTime<Utc>>,
    pub views: i32,
    pub featured: bool,
    pub email_sent: bool,
    pub email_sent_at: Option<DateTime<Utc>>,
    pub reading_time: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<NewsletterRow> for Newsletter {
    type Error = StoreError;

    fn try_from(row: NewsletterRow) -> Result<Self, Self::Error> {
        // The author account may have been deleted since
        let author = match (row.author_id, row.author_first_name, row.author_last_name) {
            (Some(id), Some(first_name), Some(last_name)) => Some(Author {
                id,
                full_name: format!("{first_name} {last_name}"),
                first_name,
                last_name,
                avatar: row.author_avatar,
            }),
            _ => None,
        };
        Ok(Newsletter {
            id: row.id,
            reading_time: reading_time(&row.content),
            title: row.title,
            slug: row.slug,
            content: row.content,
            excerpt: row.excerpt,
            newsletter_type: NewsletterType::parse(&row.newsletter_type)
                .map_err(StoreError::Corrupted)?,
            featured_image: row.featured_image,
            video_url: row.video_url,
            tags: row.tags,
            author_id: row.author_id,
            author,
            status: NewsletterStatus::parse(&row.status).map_err(StoreError::Corrupted)?,
            publish_date: row.publish_date,
            views: row.views,
            featured: row.featured,
            email_sent: row.email_sent,
            email_sent_at: row.email_sent_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl Newsletter {
    fn issue(&self) -> NewsletterIssue {
        NewsletterIssue {
            title: self.title.clone(),
            slug: self.slug.clone(),
            content: self.content.clone(),
            excerpt: self.excerpt.clone(),
            newsletter_type: self.newsletter_type,
            publish_date: self.publish_date.unwrap_or(self.created_at),
            featured_image: self.featured_image.clone(),
            tags: self.tags.clone(),
        }
    }
}

/// Body of both create and update requests. On update every field is optional.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsletterBody {
    title: Option<String>,
    content: Option<String>,
    author: Option<Uuid>,
    excerpt: Option<String>,
    #[serde(rename = "type")]
    newsletter_type: Option<String>,
    featured_image: Option<String>,
    video_url: Option<String>,
    tags: Option<Vec<String>>,
    status: Option<String>,
    featured: Option<bool>,
    publish_date: Option<DateTime<Utc>>,
}

/// Every stored field of a newsletter, validated and ready to be written.
#[derive(Debug, Clone, PartialEq)]
struct NewsletterFields {
    title: String,
    slug: String,
    content: String,
    excerpt: Option<String>,
    newsletter_type: NewsletterType,
    featured_image: Option<String>,
    video_url: Option<String>,
    tags: Vec<String>,
    author_id: Option<Uuid>,
    status: NewsletterStatus,
    publish_date: Option<DateTime<Utc>>,
    featured: bool,
}

fn parse_title(title: &str) -> Result<String, String> {
    let title = title.trim();
    let length = title.chars().count();
    if !(TITLE_MIN_CHARS..=TITLE_MAX_CHARS).contains(&length) {
        return Err(format!(
            "The title must be between {TITLE_MIN_CHARS} and {TITLE_MAX_CHARS} characters long."
        ));
    }
    Ok(title.to_string())
}

fn parse_content(content: String) -> Result<String, String> {
    if content.chars().count() < CONTENT_MIN_CHARS {
        return Err(format!(
            "The content must be at least {CONTENT_MIN_CHARS} characters long."
        ));
    }
    Ok(content)
}

fn parse_excerpt(excerpt: &str) -> Result<String, String> {
    let excerpt = excerpt.trim();
    if excerpt.chars().count() > EXCERPT_MAX_CHARS {
        return Err(format!(
            "The excerpt cannot be longer than {EXCERPT_MAX_CHARS} characters."
        ));
    }
    Ok(excerpt.to_string())
}

fn parse_url(field: &str, url: String) -> Result<String, String> {
    if validate_url(&url) {
        Ok(url)
    } else {
        Err(format!("{field} must be a valid URL."))
    }
}

fn clean_tags(tags: Vec<String>) -> Vec<String> {
    tags.into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

impl NewsletterFields {
    fn for_creation(body: NewsletterBody, now: DateTime<Utc>) -> Result<Self, String> {
        let title = parse_title(body.title.as_deref().ok_or("A title is required.")?)?;
        let content = parse_content(body.content.ok_or("Content is required.")?)?;
        let author_id = Some(body.author.ok_or("An author is required.")?);
        let status = body
            .status
            .as_deref()
            .map(NewsletterStatus::parse)
            .transpose()?
            .unwrap_or_default();
        let publish_date = match (status, body.publish_date) {
            (NewsletterStatus::Published, None) => Some(now),
            (_, publish_date) => publish_date,
        };
        Ok(Self {
            slug: generate_slug(&title, now),
            title,
            content,
            excerpt: body.excerpt.as_deref().map(parse_excerpt).transpose()?,
            newsletter_type: body
                .newsletter_type
                .as_deref()
                .map(NewsletterType::parse)
                .transpose()?
                .unwrap_or(NewsletterType::General),
            featured_image: body
                .featured_image
                .map(|u| parse_url("featuredImage", u))
                .transpose()?,
            video_url: body.video_url.map(|u| parse_url("videoUrl", u)).transpose()?,
            tags: clean_tags(body.tags.unwrap_or_default()),
            author_id,
            status,
            publish_date,
            featured: body.featured.unwrap_or(false),
        })
    }

    /// Apply a partial update. The slug follows the title; the status follows the lifecycle table.
    fn apply(mut self, body: NewsletterBody, now: DateTime<Utc>) -> Result<Self, String> {
        if let Some(title) = body.title {
            let title = parse_title(&title)?;
            if title != self.title {
                self.slug = generate_slug(&title, now);
                self.title = title;
            }
        }
        if let Some(content) = body.content {
            self.content = parse_content(content)?;
        }
        if let Some(author_id) = body.author {
            self.author_id = Some(author_id);
        }
        if let Some(excerpt) = body.excerpt {
            self.excerpt = Some(parse_excerpt(&excerpt)?);
        }
        if let Some(newsletter_type) = body.newsletter_type {
            self.newsletter_type = NewsletterType::parse(&newsletter_type)?;
        }
        if let Some(url) = body.featured_image {
            self.featured_image = Some(parse_url("featuredImage", url)?);
        }
        if let Some(url) = body.video_url {
            self.video_url = Some(parse_url("videoUrl", url)?);
        }
        if let Some(tags) = body.tags {
            self.tags = clean_tags(tags);
        }
        if let Some(featured) = body.featured {
            self.featured = featured;
        }
        if let Some(publish_date) = body.publish_date {
            self.publish_date = Some(publish_date);
        }
        if let Some(status) = body.status {
            let next = NewsletterStatus::parse(&status)?;
            self.status = self.status.transition_to(next)?;
        }
        if self.status == NewsletterStatus::Published && self.publish_date.is_none() {
            self.publish_date = Some(now);
        }
        Ok(self)
    }
}

impl From<&Newsletter> for NewsletterFields {
    fn from(n: &Newsletter) -> Self {
        Self {
            title: n.title.clone(),
            slug: n.slug.clone(),
            content: n.content.clone(),
            excerpt: n.excerpt.clone(),
            newsletter_type: n.newsletter_type,
            featured_image: n.featured_image.clone(),
            video_url: n.video_url.clone(),
            tags: n.tags.clone(),
            author_id: n.author_id,
            status: n.status,
            publish_date: n.publish_date,
            featured: n.featured,
        }
    }
}

async fn author_exists(pool: &PgPool, author_id: Option<Uuid>) -> Result<bool, sqlx::Error> {
    let Some(author_id) = author_id else {
        return Ok(false);
    };
    let (exists,): (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
        .bind(author_id)
        .fetch_one(pool)
        .await?;
    Ok(exists)
}

async fn fetch_newsletter(pool: &PgPool, id: Uuid) -> Result<Option<Newsletter>, anyhow::Error> {
    let sql = format!("{NEWSLETTER_SELECT} AND n.id = $1");
    let row = sqlx::query_as::<_, NewsletterRow>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch a newsletter.")?;
    Ok(row.map(Newsletter::try_from).transpose()?)
}

fn newsletter_not_found() -> ApiError {
    ApiError::NotFound("Newsletter not found".into())
}

#[tracing::instrument(name = "Create a newsletter", skip(body, pool))]
pub async fn create_newsletter(
    body: web::Json<NewsletterBody>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, ApiError> {
    let fields =
        NewsletterFields::for_creation(body.into_inner(), Utc::now()).map_err(ApiError::Validation)?;
    if !author_exists(&pool, fields.author_id)
        .await
        .context("Failed to look up the newsletter author.")?
    {
        return Err(ApiError::Validation("Author not found".into()));
    }

    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO newsletters (
            id, title, slug, content, excerpt, newsletter_type, featured_image, video_url, tags,
            author_id, status, publish_date, featured, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, now(), now())
        "#,
    )
    .bind(id)
    .bind(&fields.title)
    .bind(&fields.slug)
    .bind(&fields.content)
    .bind(fields.excerpt.as_deref())
    .bind(fields.newsletter_type.as_str())
    .bind(fields.featured_image.as_deref())
    .bind(fields.video_url.as_deref())
    .bind(&fields.tags)
    .bind(fields.author_id)
    .bind(fields.status.as_str())
    .bind(fields.publish_date)
    .bind(fields.featured)
    .execute(pool.get_ref())
    .await
    .context("Failed to store a new newsletter.")?;

    let newsletter = fetch_newsletter(&pool, id)
        .await?
        .ok_or_else(newsletter_not_found)?;
    Ok(HttpResponse::Created().json(json!({ "success": true, "data": newsletter })))
}

#[derive(serde::Deserialize)]
pub struct NewsletterListQuery {
    page: Option<i64>,
    limit: Option<i64>,
    #[serde(rename = "type")]
    newsletter_type: Option<String>,
    status: Option<String>,
    featured: Option<bool>,
    author: Option<Uuid>,
    search: Option<String>,
}

#[derive(Default)]
struct NewsletterFilters {
    newsletter_type: Option<NewsletterType>,
    status: Option<NewsletterStatus>,
    featured: Option<bool>,
    author: Option<Uuid>,
    search: Option<String>,
}

impl NewsletterFilters {
    fn push(&self, builder: &mut QueryBuilder<'_, Postgres>) {
        if let Some(newsletter_type) = self.newsletter_type {
            builder
                .push(" AND n.newsletter_type = ")
                .push_bind(newsletter_type.as_str());
        }
        if let Some(status) = self.status {
            builder.push(" AND n.status = ").push_bind(status.as_str());
        }
        if let Some(featured) = self.featured {
            builder.push(" AND n.featured = ").push_bind(featured);
        }
        if let Some(author) = self.author {
            builder.push(" AND n.author_id = ").push_bind(author);
        }
        if let Some(search) = &self.search {
            let pattern = like_pattern(search);
            builder
                .push(" AND (n.title ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR n.content ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR EXISTS (SELECT 1 FROM UNNEST(n.tags) AS tag WHERE tag ILIKE ")
                .push_bind(pattern)
                .push("))");
        }
    }
}

async fn paginated_newsletters(
    pool: &PgPool,
    filters: NewsletterFilters,
    page: Page,
) -> Result<ListResponse<Newsletter>, ApiError> {
    let mut select = QueryBuilder::new(NEWSLETTER_SELECT);
    filters.push(&mut select);
    select
        .push(" ORDER BY n.publish_date DESC NULLS LAST, n.created_at DESC LIMIT ")
        .push_bind(page.limit)
        .push(" OFFSET ")
        .push_bind(page.offset());
    let newsletters = select
        .build_query_as::<NewsletterRow>()
        .fetch_all(pool)
        .await
        .context("Failed to fetch newsletters.")?
        .into_iter()
        .map(Newsletter::try_from)
        .collect::<Result<Vec<_>, StoreError>>()?;

    let mut count = QueryBuilder::new("SELECT COUNT(*) FROM newsletters n WHERE TRUE");
    filters.push(&mut count);
    let (total,): (i64,) = count
        .build_query_as()
        .fetch_one(pool)
        .await
        .context("Failed to count newsletters.")?;

    Ok(ListResponse::new(newsletters, total, page))
}

#[tracing::instrument(name = "List newsletters", skip(query, pool))]
pub async fn list_newsletters(
    query: web::Query<NewsletterListQuery>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, ApiError> {
    let query = query.into_inner();
    let filters = NewsletterFilters {
        newsletter_type: query
            .newsletter_type
            .as_deref()
            .map(NewsletterType::parse)
            .transpose()
            .map_err(ApiError::Validation)?,
        status: query
            .status
            .as_deref()
            .map(NewsletterStatus::parse)
            .transpose()
            .map_err(ApiError::Validation)?,
        featured: query.featured,
        author: query.author,
        search: query.search.filter(|s| !s.trim().is_empty()),
    };
    let page = Page::new(query.page, query.limit);
    let response = paginated_newsletters(&pool, filters, page).await?;
    Ok(HttpResponse::Ok().json(response))
}

#[derive(serde::Deserialize)]
pub struct PageQuery {
    page: Option<i64>,
    limit: Option<i64>,
}

/// Published newsletters of one type, newest first.
#[tracing::instrument(name = "List newsletters by type", skip(query, pool))]
pub async fn list_newsletters_by_type(
    newsletter_type: web::Path<String>,
    query: web::Query<PageQuery>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, ApiError> {
    let newsletter_type =
        NewsletterType::parse(&newsletter_type).map_err(ApiError::Validation)?;
    let filters = NewsletterFilters {
        newsletter_type: Some(newsletter_type),
        status: Some(NewsletterStatus::Published),
        ..Default::default()
    };
    let page = Page::new(query.page, query.limit);
    let response = paginated_newsletters(&pool, filters, page).await?;
    Ok(HttpResponse::Ok().json(response))
}

/// Look a newsletter up by id or slug and count the view.
#[tracing::instrument(name = "Get a newsletter", skip(pool))]
pub async fn get_newsletter(
    id_or_slug: web::Path<String>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, ApiError> {
    let viewed: Option<(Uuid,)> = match Uuid::parse_str(&id_or_slug) {
        Ok(id) => {
            sqlx::query_as("UPDATE newsletters SET views = views + 1 WHERE id = $1 RETURNING id")
                .bind(id)
                .fetch_optional(pool.get_ref())
                .await
        }
        Err(_) => {
            sqlx::query_as("UPDATE newsletters SET views = views + 1 WHERE slug = $1 RETURNING id")
                .bind(id_or_slug.as_str())
                .fetch_optional(pool.get_ref())
                .await
        }
    }
    .context("Failed to record a newsletter view.")?;
    let (id,) = viewed.ok_or_else(newsletter_not_found)?;

    let newsletter = fetch_newsletter(&pool, id)
        .await?
        .ok_or_else(newsletter_not_found)?;
    Ok(ok_data(newsletter))
}

#[tracing::instrument(name = "Update a newsletter", skip(body, pool))]
pub async fn update_newsletter(
    id: web::Path<Uuid>,
    body: web::Json<NewsletterBody>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, ApiError> {
    let id = id.into_inner();
    let current = fetch_newsletter(&pool, id)
        .await?
        .ok_or_else(newsletter_not_found)?;
    let author_changed = body.author.is_some();
    let fields = NewsletterFields::from(&current)
        .apply(body.into_inner(), Utc::now())
        .map_err(ApiError::Validation)?;
    if author_changed
        && !author_exists(&pool, fields.author_id)
            .await
            .context("Failed to look up the newsletter author.")?
    {
        return Err(ApiError::Validation("Author not found".into()));
    }

    sqlx::query(
        r#"
        UPDATE newsletters SET
            title = $2, slug = $3, content = $4, excerpt = $5, newsletter_type = $6,
            featured_image = $7, video_url = $8, tags = $9, author_id = $10, status = $11,
            publish_date = $12, featured = $13, updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(&fields.title)
    .bind(&fields.slug)
    .bind(&fields.content)
    .bind(fields.excerpt.as_deref())
    .bind(fields.newsletter_type.as_str())
    .bind(fields.featured_image.as_deref())
    .bind(fields.video_url.as_deref())
    .bind(&fields.tags)
    .bind(fields.author_id)
    .bind(fields.status.as_str())
    .bind(fields.publish_date)
    .bind(fields.featured)
    .execute(pool.get_ref())
    .await
    .context("Failed to update a newsletter.")?;

    let newsletter = fetch_newsletter(&pool, id)
        .await?
        .ok_or_else(newsletter_not_found)?;
    Ok(ok_data(newsletter))
}

#[tracing::instrument(name = "Delete a newsletter", skip(pool))]
pub async fn delete_newsletter(
    id: web::Path<Uuid>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, ApiError> {
    let result = sqlx::query("DELETE FROM newsletters WHERE id = $1")
        .bind(id.into_inner())
        .execute(pool.get_ref())
        .await
        .context("Failed to delete a newsletter.")?;
    if result.rows_affected() == 0 {
        return Err(newsletter_not_found());
    }
    Ok(ok_message("Newsletter deleted successfully"))
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        ApiError::Unexpected(e.into())
    }
}

/// Email a published newsletter to its audience.
#[tracing::instrument(name = "Send a newsletter", skip(pool, dispatcher))]
pub async fn send_newsletter(
    id: web::Path<Uuid>,
    pool: web::Data<PgPool>,
    dispatcher: web::Data<NewsletterDispatcher>,
) -> Result<HttpResponse, ApiError> {
    let id = id.into_inner();
    let newsletter = fetch_newsletter(&pool, id)
        .await?
        .ok_or_else(newsletter_not_found)?;
    if newsletter.status != NewsletterStatus::Published {
        return Err(ApiError::Validation(
            "Newsletter must be published before sending".into(),
        ));
    }

    let result = dispatcher.dispatch(&newsletter.issue()).await?;

    sqlx::query(
        "UPDATE newsletters SET email_sent = TRUE, email_sent_at = now(), updated_at = now() WHERE id = $1",
    )
    .bind(id)
    .execute(pool.get_ref())
    .await
    .context("Failed to mark the newsletter as sent.")?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Newsletter sent successfully",
        "data": result,
    })))
}
