use super::contacts::{Contact, ContactResponse, CONTACT_COLUMNS};
use crate::domain::{PersonName, SubscriberEmail, UserRole};
use crate::store::postgres::is_unique_violation;
use crate::routes::{
    like_pattern, monthly_counts, ok_data, ok_message, twelve_months_ago, ApiError,
    ListResponse, Page,
};
use actix_web::{web, HttpResponse};
use anyhow::Context;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde_json::json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;
use validator::validate_url;

const USER_COLUMNS: &str = "id, first_name, last_name, email, role, avatar, is_active, \
    last_login, email_verified, created_at, updated_at";
const RECENT_ITEMS: i64 = 5;
const CHART_DAYS: i64 = 7;

#[derive(Debug, serde::Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub role: String,
    pub avatar: Option<String>,
    pub is_active: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    #[serde(flatten)]
    user: User,
    full_name: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            full_name: format!("{} {}", user.first_name, user.last_name),
            user,
        }
    }
}

fn user_not_found() -> ApiError {
    ApiError::NotFound("User not found".into())
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserListQuery {
    page: Option<i64>,
    limit: Option<i64>,
    role: Option<String>,
    is_active: Option<bool>,
    search: Option<String>,
}

struct UserFilters {
    role: Option<UserRole>,
    is_active: Option<bool>,
    search: Option<String>,
}

impl UserFilters {
    fn push(&self, builder: &mut QueryBuilder<'_, Postgres>) {
        if let Some(role) = self.role {
            builder.push(" AND role = ").push_bind(role.as_str());
        }
        if let Some(is_active) = self.is_active {
            builder.push(" AND is_active = ").push_bind(is_active);
        }
        if let Some(search) = &self.search {
            let pattern = like_pattern(search);
            builder
                .push(" AND (first_name ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR last_name ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR email ILIKE ")
                .push_bind(pattern)
                .push(")");
        }
    }
}

#[tracing::instrument(name = "List users", skip(query, pool))]
pub async fn list_users(
    query: web::Query<UserListQuery>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, ApiError> {
    let UserListQuery {
        page,
        limit,
        role,
        is_active,
        search,
    } = query.into_inner();
    let page = Page::new(page, limit);
    let filters = UserFilters {
        role: role
            .as_deref()
            .map(UserRole::parse)
            .transpose()
            .map_err(ApiError::Validation)?,
        is_active,
        search: search.filter(|s| !s.trim().is_empty()),
    };

    let mut select = QueryBuilder::new(format!("SELECT {USER_COLUMNS} FROM users WHERE TRUE"));
    filters.push(&mut select);
    select
        .push(" ORDER BY created_at DESC LIMIT ")
        .push_bind(page.limit)
        .push(" OFFSET ")
        .push_bind(page.offset());
    let users: Vec<UserResponse> = select
        .build_query_as::<User>()
        .fetch_all(pool.get_ref())
        .await
        .context("Failed to fetch users.")?
        .into_iter()
        .map(UserResponse::from)
        .collect();

    let mut count = QueryBuilder::new("SELECT COUNT(*) FROM users WHERE TRUE");
    filters.push(&mut count);
    let (total,): (i64,) = count
        .build_query_as()
        .fetch_one(pool.get_ref())
        .await
        .context("Failed to count users.")?;

    Ok(HttpResponse::Ok().json(ListResponse::new(users, total, page)))
}

#[tracing::instrument(name = "Get a user", skip(pool))]
pub async fn get_user(
    id: web::Path<Uuid>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, ApiError> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
    let user = sqlx::query_as::<_, User>(&sql)
        .bind(id.into_inner())
        .fetch_optional(pool.get_ref())
        .await
        .context("Failed to fetch a user.")?
        .ok_or_else(user_not_found)?;
    Ok(ok_data(UserResponse::from(user)))
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserUpdateBody {
    first_name: Option<String>,
    last_name: Option<String>,
    email: Option<String>,
    role: Option<String>,
    is_active: Option<bool>,
    avatar: Option<String>,
}

#[derive(Debug, Default)]
struct UserUpdate {
    first_name: Option<PersonName>,
    last_name: Option<PersonName>,
    email: Option<SubscriberEmail>,
    role: Option<UserRole>,
    is_active: Option<bool>,
    avatar: Option<String>,
}

impl TryFrom<UserUpdateBody> for UserUpdate {
    type Error = String;

    fn try_from(body: UserUpdateBody) -> Result<Self, Self::Error> {
        let avatar = match body.avatar {
            Some(avatar) if !validate_url(&avatar) => {
                return Err(format!("{avatar} is not a valid avatar URL."))
            }
            avatar => avatar,
        };
        Ok(Self {
            first_name: body.first_name.map(PersonName::parse).transpose()?,
            last_name: body.last_name.map(PersonName::parse).transpose()?,
            email: body.email.map(SubscriberEmail::parse).transpose()?,
            role: body.role.as_deref().map(UserRole::parse).transpose()?,
            is_active: body.is_active,
            avatar,
        })
    }
}

#[tracing::instrument(name = "Update a user", skip(body, pool))]
pub async fn update_user(
    id: web::Path<Uuid>,
    body: web::Json<UserUpdateBody>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, ApiError> {
    let update = UserUpdate::try_from(body.into_inner()).map_err(ApiError::Validation)?;

    let sql = format!(
        r#"
        UPDATE users SET
            first_name = COALESCE($2, first_name),
            last_name = COALESCE($3, last_name),
            email = COALESCE($4, email),
            role = COALESCE($5, role),
            is_active = COALESCE($6, is_active),
            avatar = COALESCE($7, avatar),
            updated_at = now()
        WHERE id = $1
        RETURNING {USER_COLUMNS}
        "#
    );
    let outcome = sqlx::query_as::<_, User>(&sql)
        .bind(id.into_inner())
        .bind(update.first_name.as_ref().map(|n| -> &str { n.as_ref() }))
        .bind(update.last_name.as_ref().map(|n| -> &str { n.as_ref() }))
        .bind(update.email.as_ref().map(|e| -> &str { e.as_ref() }))
        .bind(update.role.map(|r| r.as_str()))
        .bind(update.is_active)
        .bind(update.avatar)
        .fetch_optional(pool.get_ref())
        .await;
    let user = match outcome {
        Ok(user) => user.ok_or_else(user_not_found)?,
        Err(e) if is_unique_violation(&e) => {
            return Err(ApiError::Validation("Email already in use".into()))
        }
        Err(e) => return Err(anyhow::Error::new(e).context("Failed to update a user.").into()),
    };
    Ok(ok_data(UserResponse::from(user)))
}

#[tracing::instrument(name = "Delete a user", skip(pool))]
pub async fn delete_user(
    id: web::Path<Uuid>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, ApiError> {
    let result = sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(id.into_inner())
        .execute(pool.get_ref())
        .await
        .context("Failed to delete a user.")?;
    if result.rows_affected() == 0 {
        return Err(user_not_found());
    }
    Ok(ok_message("User deleted successfully"))
}

#[derive(sqlx::FromRow)]
struct UserCounts {
    total: i64,
    active: i64,
    admin: i64,
    editor: i64,
    regular: i64,
}

#[tracing::instrument(name = "User statistics", skip(pool))]
pub async fn user_stats(pool: web::Data<PgPool>) -> Result<HttpResponse, ApiError> {
    let counts = sqlx::query_as::<_, UserCounts>(
        r#"
        SELECT COUNT(*) AS total,
               COUNT(*) FILTER (WHERE is_active) AS active,
               COUNT(*) FILTER (WHERE role = 'admin') AS admin,
               COUNT(*) FILTER (WHERE role = 'editor') AS editor,
               COUNT(*) FILTER (WHERE role = 'user') AS regular
        FROM users
        "#,
    )
    .fetch_one(pool.get_ref())
    .await
    .context("Failed to count users.")?;
    let monthly_data = monthly_counts(&pool, "users", "created_at", twelve_months_ago(Utc::now()))
        .await
        .context("Failed to count users by month.")?;

    Ok(ok_data(json!({
        "total": counts.total,
        "active": counts.active,
        "byRole": {
            "admin": counts.admin,
            "editor": counts.editor,
            "user": counts.regular,
        },
        "monthlyData": monthly_data,
    })))
}

#[derive(Debug, serde::Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct NewsletterSummary {
    id: Uuid,
    title: String,
    slug: String,
    excerpt: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ChartDay {
    pub date: NaiveDate,
    pub users: i64,
    pub contacts: i64,
    pub newsletters: i64,
}

/// One entry per day for the week ending `today`, oldest first. Days without rows count zero.
fn seven_day_chart(
    today: NaiveDate,
    users: &[(NaiveDate, i64)],
    contacts: &[(NaiveDate, i64)],
    newsletters: &[(NaiveDate, i64)],
) -> Vec<ChartDay> {
    let count_on = |counts: &[(NaiveDate, i64)], day: NaiveDate| {
        counts
            .iter()
            .find(|(d, _)| *d == day)
            .map_or(0, |(_, c)| *c)
    };
    (0..CHART_DAYS)
        .rev()
        .map(|days_back| {
            let date = today - Duration::days(days_back);
            ChartDay {
                date,
                users: count_on(users, date),
                contacts: count_on(contacts, date),
                newsletters: count_on(newsletters, date),
            }
        })
        .collect()
}

async fn daily_counts(
    pool: &PgPool,
    table: &str,
    since: NaiveDate,
) -> Result<Vec<(NaiveDate, i64)>, sqlx::Error> {
    let sql = format!(
        r#"
        SELECT (created_at AT TIME ZONE 'UTC')::DATE AS day, COUNT(*)
        FROM {table}
        WHERE (created_at AT TIME ZONE 'UTC')::DATE >= $1
        GROUP BY day
        "#
    );
    sqlx::query_as(&sql).bind(since).fetch_all(pool).await
}

#[derive(sqlx::FromRow)]
struct DashboardCounts {
    users: i64,
    active_users: i64,
    contacts: i64,
    new_contacts: i64,
    newsletters: i64,
    published_newsletters: i64,
}

#[tracing::instrument(name = "Dashboard analytics", skip(pool))]
pub async fn dashboard_analytics(pool: web::Data<PgPool>) -> Result<HttpResponse, ApiError> {
    let counts = sqlx::query_as::<_, DashboardCounts>(
        r#"
        SELECT
            (SELECT COUNT(*) FROM users) AS users,
            (SELECT COUNT(*) FROM users WHERE is_active) AS active_users,
            (SELECT COUNT(*) FROM contacts) AS contacts,
            (SELECT COUNT(*) FROM contacts WHERE status = 'new') AS new_contacts,
            (SELECT COUNT(*) FROM newsletters) AS newsletters,
            (SELECT COUNT(*) FROM newsletters WHERE status = 'published') AS published_newsletters
        "#,
    )
    .fetch_one(pool.get_ref())
    .await
    .context("Failed to compute the dashboard counters.")?;

    let sql = format!("SELECT {CONTACT_COLUMNS} FROM contacts ORDER BY created_at DESC LIMIT $1");
    let recent_contacts: Vec<ContactResponse> = sqlx::query_as::<_, Contact>(&sql)
        .bind(RECENT_ITEMS)
        .fetch_all(pool.get_ref())
        .await
        .context("Failed to fetch the most recent contacts.")?
        .into_iter()
        .map(ContactResponse::from)
        .collect();
    let recent_newsletters = sqlx::query_as::<_, NewsletterSummary>(
        "SELECT id, title, slug, excerpt, status, created_at FROM newsletters \
         ORDER BY created_at DESC LIMIT $1",
    )
    .bind(RECENT_ITEMS)
    .fetch_all(pool.get_ref())
    .await
    .context("Failed to fetch the most recent newsletters.")?;

    let today = Utc::now().date_naive();
    let since = today - Duration::days(CHART_DAYS - 1);
    let users = daily_counts(&pool, "users", since)
        .await
        .context("Failed to count users by day.")?;
    let contacts = daily_counts(&pool, "contacts", since)
        .await
        .context("Failed to count contacts by day.")?;
    let newsletters = daily_counts(&pool, "newsletters", since)
        .await
        .context("Failed to count newsletters by day.")?;

    Ok(ok_data(json!({
        "users": {
            "total": counts.users,
            "active": counts.active_users,
        },
        "contacts": {
            "total": counts.contacts,
            "new": counts.new_contacts,
            "recent": recent_contacts,
        },
        "newsletters": {
            "total": counts.newsletters,
            "published": counts.published_newsletters,
            "recent": recent_newsletters,
        },
        "chart": seven_day_chart(today, &users, &contacts, &newsletters),
    })))
}
