//! Statistics service

use chrono::{Datelike, NaiveDate};

use crate::{
    api::stats::{DashboardStats, DashboardTotals, MonthlyStats, PeriodStats, TopBook, TopUser},
    error::{AppError, AppResult},
    repository::Repository,
    services::loans::today,
};

/// Number of entries in the dashboard leaderboards
const TOP_LIMIT: i64 = 5;

#[derive(Clone)]
pub struct StatsService {
    repository: Repository,
}

impl StatsService {
    pub fn new(repository: Repository) -> Self {
        Self { repository }
    }

    /// Loans started during a calendar month, by outcome
    pub async fn monthly(&self, year: i32, month: u32) -> AppResult<MonthlyStats> {
        let (start, end) = month_bounds(year, month)?;
        let today = today();

        let stats = sqlx::query_as::<_, MonthlyStats>(
            r#"
            SELECT $1::INT AS year,
                   $2::INT AS month,
                   COUNT(*) AS total_loans,
                   COUNT(*) FILTER (WHERE status = 'returned') AS returned_loans,
                   COUNT(*) FILTER (WHERE status = 'active') AS active_loans,
                   COUNT(*) FILTER (WHERE status = 'active' AND due_date < $5) AS overdue_loans
            FROM loans
            WHERE loan_date >= $3 AND loan_date < $4
            "#,
        )
        .bind(year)
        .bind(month as i32)
        .bind(start)
        .bind(end)
        .bind(today)
        .fetch_one(&self.repository.pool)
        .await?;

        Ok(stats)
    }

    /// Dashboard: global totals plus activity since `since`
    /// (default: first day of the current month)
    pub async fn dashboard(&self, since: Option<NaiveDate>) -> AppResult<DashboardStats> {
        let today = today();
        let since = since.unwrap_or_else(|| first_of_month(today));
        let pool = &self.repository.pool;

        let totals = DashboardTotals {
            books: self.repository.books.count().await?,
            users: self.repository.users.count_active().await?,
            loans: self.repository.loans.count_total().await?,
            active_loans: self.repository.loans.count_active().await?,
            overdue_loans: self.repository.loans.count_overdue(today).await?,
        };

        let new_loans: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM loans WHERE loan_date >= $1")
            .bind(since)
            .fetch_one(pool)
            .await?;

        let top_books = sqlx::query_as::<_, TopBook>(
            r#"
            SELECT b.id, b.title, b.author, COUNT(l.id) AS loan_count
            FROM books b
            JOIN loans l ON l.book_id = b.id
            WHERE l.loan_date >= $1
            GROUP BY b.id, b.title, b.author
            ORDER BY loan_count DESC, b.title ASC
            LIMIT $2
            "#,
        )
        .bind(since)
        .bind(TOP_LIMIT)
        .fetch_all(pool)
        .await?;

        let top_users = sqlx::query_as::<_, TopUser>(
            r#"
            SELECT u.id, u.username,
                   TRIM(u.first_name || ' ' || u.last_name) AS name,
                   COUNT(l.id) AS loan_count
            FROM users u
            JOIN loans l ON l.user_id = u.id
            WHERE l.loan_date >= $1
            GROUP BY u.id, u.username, u.first_name, u.last_name
            ORDER BY loan_count DESC, u.username ASC
            LIMIT $2
            "#,
        )
        .bind(since)
        .bind(TOP_LIMIT)
        .fetch_all(pool)
        .await?;

        Ok(DashboardStats {
            totals,
            period: PeriodStats { since, new_loans },
            top_books,
            top_users,
        })
    }
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// First day of the month and first day of the following month
fn month_bounds(year: i32, month: u32) -> AppResult<(NaiveDate, NaiveDate)> {
    let invalid = || AppError::Validation(format!("Invalid month {}-{:02}", year, month));

    let start = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?;
    let end = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .ok_or_else(invalid)?;

    Ok((start, end))
}
