//! Users repository for database operations

use sqlx::{PgConnection, Pool, Postgres, QueryBuilder};

use super::contains_pattern;
use crate::{
    error::{AppError, AppResult, Entity},
    models::{
        user::{CreateUser, User, UserQuery, UserShort},
        Page,
    },
};

const USER_COLUMNS: &str =
    "id, username, password_hash, first_name, last_name, email, is_active, is_staff, created_at";

#[derive(Clone)]
pub struct UsersRepository {
    pool: Pool<Postgres>,
}

impl UsersRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Get user by ID
    pub async fn get_by_id(&self, id: i32) -> AppResult<User> {
        sqlx::query_as::<_, User>(&format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::not_found(Entity::User, id))
    }

    /// Get user by username (case-insensitive)
    pub async fn get_by_username(&self, username: &str) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE LOWER(username) = LOWER($1)",
            USER_COLUMNS
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    /// Check a user exists inside a transaction
    pub async fn exists(&self, conn: &mut PgConnection, id: i32) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
            .bind(id)
            .fetch_one(&mut *conn)
            .await?;
        Ok(exists)
    }

    /// Create a new user with an already hashed password
    pub async fn create(&self, user: &CreateUser, password_hash: &str) -> AppResult<User> {
        let created = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (username, password_hash, first_name, last_name, email, is_staff)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(user.username.trim())
        .bind(password_hash)
        .bind(user.first_name.trim())
        .bind(user.last_name.trim())
        .bind(user.email.as_deref().map(str::trim).unwrap_or(""))
        .bind(user.is_staff)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    /// Search users with pagination
    pub async fn search(&self, query: &UserQuery, page: Page) -> AppResult<(Vec<UserShort>, i64)> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM users WHERE 1=1");
        push_filters(&mut count, query);
        let total = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut builder = QueryBuilder::<Postgres>::new(
            "SELECT id, username, first_name, last_name, email FROM users WHERE 1=1",
        );
        push_filters(&mut builder, query);
        builder
            .push(" ORDER BY username, id LIMIT ")
            .push_bind(page.limit())
            .push(" OFFSET ")
            .push_bind(page.offset());

        let users = builder
            .build_query_as::<UserShort>()
            .fetch_all(&self.pool)
            .await?;

        Ok((users, total))
    }

    pub async fn count(&self) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Count users allowed to log in
    pub async fn count_active(&self) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE is_active")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &UserQuery) {
    if let Some(name) = query.name.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = contains_pattern(name);
        builder.push(" AND (");
        let mut columns = builder.separated(" OR ");
        for column in ["username", "first_name", "last_name", "email"] {
            columns
                .push(format!("{} ILIKE ", column))
                .push_bind_unseparated(pattern.clone());
        }
        builder.push(")");
    }
}
