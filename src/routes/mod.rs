mod contacts;
mod health_check;
mod newsletters;
mod settings;
mod subscribers;
mod users;

pub use contacts::*;
pub use health_check::*;
pub use newsletters::*;
pub use settings::*;
pub use subscribers::*;
pub use users::*;

use crate::site_settings::SettingsError;
use crate::store::StoreError;
use actix_web::http::StatusCode;
use actix_web::{HttpRequest, HttpResponse, ResponseError};
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use serde::Serialize;
use serde_json::json;
use sqlx::PgPool;

const DEFAULT_PAGE_SIZE: i64 = 10;
const MAX_PAGE_SIZE: i64 = 100;

/// Every failure a handler can report. Renders the `{success: false, ...}` envelope.
#[derive(thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl std::fmt::Debug for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self {
            ApiError::Validation(message) | ApiError::NotFound(message) => json!({
                "success": false,
                "message": message,
            }),
            ApiError::Unexpected(e) => json!({
                "success": false,
                "message": "Server error",
                "error": e.to_string(),
            }),
        };
        HttpResponse::build(self.status_code()).json(body)
    }
}

impl From<SettingsError> for ApiError {
    fn from(e: SettingsError) -> Self {
        match e {
            SettingsError::Validation(message) => ApiError::Validation(message),
            SettingsError::NotFound => ApiError::NotFound("Setting not found".into()),
            SettingsError::Store(e) => ApiError::Unexpected(e.into()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Unexpected(e.into())
    }
}

pub fn error_chain_fmt(
    e: &impl std::error::Error,
    f: &mut std::fmt::Formatter<'_>,
) -> std::fmt::Result {
    writeln!(f, "{}\n", e)?;
    let mut current = e.source();
    while let Some(cause) = current {
        writeln!(f, "Caused by:\n\t{}", cause)?;
        current = cause.source();
    }
    Ok(())
}

/// Malformed JSON bodies get the same envelope as any other validation failure.
pub fn json_error_handler(
    err: actix_web::error::JsonPayloadError,
    _req: &HttpRequest,
) -> actix_web::Error {
    ApiError::Validation(err.to_string()).into()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: i64,
    pub limit: i64,
}

impl Page {
    /// `page` defaults to 1, `limit` to 10 and is kept within 1..=100.
    pub fn new(page: Option<i64>, limit: Option<i64>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.limit
    }

    pub fn pages(&self, total: i64) -> i64 {
        (total + self.limit - 1) / self.limit
    }
}

#[derive(Serialize)]
pub struct Pagination {
    pub page: i64,
    pub pages: i64,
    pub limit: i64,
}

#[derive(Serialize)]
pub struct ListResponse<T> {
    pub success: bool,
    pub count: usize,
    pub total: i64,
    pub pagination: Pagination,
    pub data: Vec<T>,
}

impl<T: Serialize> ListResponse<T> {
    pub fn new(data: Vec<T>, total: i64, page: Page) -> Self {
        Self {
            success: true,
            count: data.len(),
            total,
            pagination: Pagination {
                page: page.page,
                pages: page.pages(total),
                limit: page.limit,
            },
            data,
        }
    }
}

pub(crate) fn ok_data(data: impl Serialize) -> HttpResponse {
    HttpResponse::Ok().json(json!({ "success": true, "data": data }))
}

pub(crate) fn ok_message(message: &str) -> HttpResponse {
    HttpResponse::Ok().json(json!({ "success": true, "message": message }))
}

/// `%`-wrapped pattern for case-insensitive `ILIKE` searches.
pub(crate) fn like_pattern(search: &str) -> String {
    let escaped = search
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

/// Comma separated query parameter, blanks dropped.
pub(crate) fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct MonthlyCount {
    pub year: i32,
    pub month: i32,
    pub count: i64,
}

/// First day of the month eleven months back: the start of a twelve month window.
pub(crate) fn twelve_months_ago(now: DateTime<Utc>) -> DateTime<Utc> {
    let months = now.year() * 12 + now.month0() as i32 - 11;
    let first = NaiveDate::from_ymd_opt(months.div_euclid(12), months.rem_euclid(12) as u32 + 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0));
    match first {
        Some(first) => Utc.from_utc_datetime(&first),
        None => now - Duration::days(365),
    }
}

/// Rows of `table` created per month since `since`, keyed on the `column` timestamp.
pub(crate) async fn monthly_counts(
    pool: &PgPool,
    table: &str,
    column: &str,
    since: DateTime<Utc>,
) -> Result<Vec<MonthlyCount>, sqlx::Error> {
    let sql = format!(
        r#"
        SELECT EXTRACT(YEAR FROM {column})::INT AS year,
               EXTRACT(MONTH FROM {column})::INT AS month,
               COUNT(*) AS count
        FROM {table}
        WHERE {column} >= $1
        GROUP BY year, month
        ORDER BY year, month
        "#
    );
    sqlx::query_as::<_, MonthlyCount>(&sql)
        .bind(since)
        .fetch_all(pool)
        .await
}

/// Client IP and user agent recorded with public submissions.
pub(crate) fn client_metadata(req: &HttpRequest) -> (Option<String>, Option<String>) {
    let ip_address = req
        .connection_info()
        .realip_remote_addr()
        .map(String::from);
    let user_agent = req
        .headers()
        .get(actix_web::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    (ip_address, user_agent)
}
