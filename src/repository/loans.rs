//! Loans repository for database operations

use chrono::NaiveDate;
use sqlx::{PgConnection, Pool, Postgres, QueryBuilder};

use super::contains_pattern;
use crate::{
    error::{AppError, AppResult, Entity},
    models::{
        loan::{Loan, LoanOrdering, LoanQuery, LoanRow, LoanStatus, NewLoan},
        Page,
    },
};

const LOAN_COLUMNS: &str = "id, user_id, book_id, loan_date, due_date, return_date, status, \
                            notes, fine_amount, created_at, updated_at";

const LOAN_ROW_SELECT: &str = r#"
    SELECT l.id, l.user_id, l.book_id, l.loan_date, l.due_date, l.return_date,
           l.status, l.notes, l.fine_amount, l.created_at, l.updated_at,
           u.username, u.first_name, u.last_name, u.email,
           b.title, b.author, b.isbn, b.total_copies, b.available_copies
    FROM loans l
    JOIN users u ON u.id = l.user_id
    JOIN books b ON b.id = l.book_id
    WHERE 1=1
"#;

const LOAN_COUNT_SELECT: &str = r#"
    SELECT COUNT(*)
    FROM loans l
    JOIN users u ON u.id = l.user_id
    JOIN books b ON b.id = l.book_id
    WHERE 1=1
"#;

#[derive(Clone)]
pub struct LoansRepository {
    pool: Pool<Postgres>,
}

impl LoansRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Get loan by ID
    pub async fn get_by_id(&self, id: i32) -> AppResult<Loan> {
        sqlx::query_as::<_, Loan>(&format!("SELECT {} FROM loans WHERE id = $1", LOAN_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::not_found(Entity::Loan, id))
    }

    /// Get loan joined with its user and book
    pub async fn get_row(&self, id: i32) -> AppResult<LoanRow> {
        let mut builder = QueryBuilder::<Postgres>::new(LOAN_ROW_SELECT);
        builder.push(" AND l.id = ").push_bind(id);

        builder
            .build_query_as::<LoanRow>()
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::not_found(Entity::Loan, id))
    }

    /// Load a loan and lock its row until the transaction ends
    pub async fn lock(&self, conn: &mut PgConnection, id: i32) -> AppResult<Loan> {
        sqlx::query_as::<_, Loan>(&format!(
            "SELECT {} FROM loans WHERE id = $1 FOR UPDATE",
            LOAN_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::not_found(Entity::Loan, id))
    }

    /// Whether the user holds a pending or active loan of the book (other than `exclude`)
    pub async fn has_open_loan(
        &self,
        conn: &mut PgConnection,
        user_id: i32,
        book_id: i32,
        exclude: Option<i32>,
    ) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM loans
                WHERE user_id = $1 AND book_id = $2
                  AND status IN ('pending', 'active')
                  AND ($3::INT IS NULL OR id <> $3)
            )
            "#,
        )
        .bind(user_id)
        .bind(book_id)
        .bind(exclude)
        .fetch_one(&mut *conn)
        .await?;

        Ok(exists)
    }

    /// Insert a loan produced by the availability coordinator
    pub async fn insert(&self, conn: &mut PgConnection, loan: &NewLoan) -> AppResult<i32> {
        let id = sqlx::query_scalar::<_, i32>(
            r#"
            INSERT INTO loans (user_id, book_id, loan_date, due_date, status, notes)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(loan.user_id)
        .bind(loan.book_id)
        .bind(loan.loan_date)
        .bind(loan.due_date)
        .bind(loan.status)
        .bind(&loan.notes)
        .fetch_one(&mut *conn)
        .await?;

        Ok(id)
    }

    /// Persist the mutable fields of a locked loan
    pub async fn save(&self, conn: &mut PgConnection, loan: &Loan) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE loans
            SET due_date = $2, return_date = $3, status = $4, notes = $5,
                fine_amount = $6, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(loan.id)
        .bind(loan.due_date)
        .bind(loan.return_date)
        .bind(loan.status)
        .bind(&loan.notes)
        .bind(loan.fine_amount)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    pub async fn delete(&self, conn: &mut PgConnection, id: i32) -> AppResult<()> {
        sqlx::query("DELETE FROM loans WHERE id = $1")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Search loans with filters, search, ordering and pagination
    pub async fn search(
        &self,
        query: &LoanQuery,
        ordering: LoanOrdering,
        page: Page,
        today: NaiveDate,
    ) -> AppResult<(Vec<LoanRow>, i64)> {
        let mut count = QueryBuilder::<Postgres>::new(LOAN_COUNT_SELECT);
        push_filters(&mut count, query, today);
        let total = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut builder = QueryBuilder::<Postgres>::new(LOAN_ROW_SELECT);
        push_filters(&mut builder, query, today);
        builder
            .push(" ORDER BY ")
            .push(ordering.to_sql())
            .push(" LIMIT ")
            .push_bind(page.limit())
            .push(" OFFSET ")
            .push_bind(page.offset());

        let rows = builder
            .build_query_as::<LoanRow>()
            .fetch_all(&self.pool)
            .await?;

        Ok((rows, total))
    }

    /// Active loans past their due date, most overdue first
    pub async fn get_overdue(&self, today: NaiveDate) -> AppResult<Vec<LoanRow>> {
        let mut builder = QueryBuilder::<Postgres>::new(LOAN_ROW_SELECT);
        builder
            .push(" AND l.status = 'active' AND l.due_date < ")
            .push_bind(today)
            .push(" ORDER BY l.due_date ASC, l.id ASC");

        let rows = builder
            .build_query_as::<LoanRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Loans of a user, optionally restricted to a status
    pub async fn get_user_loans(
        &self,
        user_id: i32,
        status: Option<LoanStatus>,
        today: NaiveDate,
    ) -> AppResult<Vec<LoanRow>> {
        let query = LoanQuery {
            status,
            user_id: Some(user_id),
            ..Default::default()
        };

        let mut builder = QueryBuilder::<Postgres>::new(LOAN_ROW_SELECT);
        push_filters(&mut builder, &query, today);
        builder.push(" ORDER BY l.loan_date DESC, l.id DESC");

        let rows = builder
            .build_query_as::<LoanRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Count active loans of a book inside a transaction
    pub async fn count_active_for_book(&self, conn: &mut PgConnection, book_id: i32) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM loans WHERE book_id = $1 AND status = 'active'",
        )
        .bind(book_id)
        .fetch_one(&mut *conn)
        .await?;
        Ok(count)
    }

    pub async fn count_total(&self) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM loans")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Count active loans
    pub async fn count_active(&self) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM loans WHERE status = 'active'")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Count overdue loans
    pub async fn count_overdue(&self, today: NaiveDate) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM loans WHERE status = 'active' AND due_date < $1",
        )
        .bind(today)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &LoanQuery, today: NaiveDate) {
    match query.status {
        Some(LoanStatus::Overdue) => {
            builder
                .push(" AND l.status = 'active' AND l.due_date < ")
                .push_bind(today);
        }
        Some(status) => {
            builder.push(" AND l.status = ").push_bind(status);
        }
        None => {}
    }

    if let Some(user_id) = query.user_id {
        builder.push(" AND l.user_id = ").push_bind(user_id);
    }

    if let Some(book_id) = query.book_id {
        builder.push(" AND l.book_id = ").push_bind(book_id);
    }

    if let Some(username) = query.username.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        builder.push(" AND u.username = ").push_bind(username.to_string());
    }

    if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = contains_pattern(search);
        builder.push(" AND (");
        let mut columns = builder.separated(" OR ");
        for column in [
            "u.username",
            "u.first_name",
            "u.last_name",
            "b.title",
            "b.author",
            "l.notes",
        ] {
            columns
                .push(format!("{} ILIKE ", column))
                .push_bind_unseparated(pattern.clone());
        }
        builder.push(")");
    }
}
