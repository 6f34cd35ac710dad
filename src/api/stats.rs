//! Statistics endpoints

use axum::{extract::Query, extract::State, Json};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};

use crate::{error::AppResult, services::loans::LoanCounts};

use super::AuthenticatedUser;

/// Overall loan counters
#[derive(Debug, Serialize, ToSchema)]
pub struct LoanStatistics {
    pub total_loans: i64,
    pub active_loans: i64,
    /// Active loans past their due date
    pub overdue_loans: i64,
}

impl From<LoanCounts> for LoanStatistics {
    fn from(counts: LoanCounts) -> Self {
        Self {
            total_loans: counts.total,
            active_loans: counts.active,
            overdue_loans: counts.overdue,
        }
    }
}

/// Month selector (defaults to the current month)
#[derive(Debug, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct MonthlyQuery {
    pub year: Option<i32>,
    /// 1 to 12
    pub month: Option<u32>,
}

/// Loans started in one month, by current outcome
#[derive(Debug, Serialize, FromRow, ToSchema)]
pub struct MonthlyStats {
    pub year: i32,
    pub month: i32,
    pub total_loans: i64,
    pub returned_loans: i64,
    pub active_loans: i64,
    pub overdue_loans: i64,
}

/// Dashboard window start
#[derive(Debug, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct DashboardQuery {
    /// First day of the activity window (default: first day of the current month)
    pub since: Option<NaiveDate>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DashboardTotals {
    pub books: i64,
    /// Users allowed to log in
    pub users: i64,
    pub loans: i64,
    pub active_loans: i64,
    pub overdue_loans: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PeriodStats {
    pub since: NaiveDate,
    /// Loans started since the window start
    pub new_loans: i64,
}

/// Most borrowed book in the window
#[derive(Debug, Serialize, FromRow, ToSchema)]
pub struct TopBook {
    pub id: i32,
    pub title: String,
    pub author: String,
    pub loan_count: i64,
}

/// Most active borrower in the window
#[derive(Debug, Serialize, FromRow, ToSchema)]
pub struct TopUser {
    pub id: i32,
    pub username: String,
    pub name: String,
    pub loan_count: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DashboardStats {
    pub totals: DashboardTotals,
    pub period: PeriodStats,
    pub top_books: Vec<TopBook>,
    pub top_users: Vec<TopUser>,
}

/// Get total, active and overdue loan counts
#[utoipa::path(
    get,
    path = "/loans/statistics",
    tag = "stats",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Loan statistics", body = LoanStatistics),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn loan_statistics(
    State(state): State<crate::AppState>,
    AuthenticatedUser(_claims): AuthenticatedUser,
) -> AppResult<Json<LoanStatistics>> {
    let counts = state.services.loans.counts().await?;
    Ok(Json(counts.into()))
}

/// Get loan statistics for one month
#[utoipa::path(
    get,
    path = "/loans/monthly",
    tag = "stats",
    security(("bearer_auth" = [])),
    params(MonthlyQuery),
    responses(
        (status = 200, description = "Monthly loan statistics", body = MonthlyStats),
        (status = 400, description = "Invalid month")
    )
)]
pub async fn monthly_stats(
    State(state): State<crate::AppState>,
    AuthenticatedUser(_claims): AuthenticatedUser,
    Query(query): Query<MonthlyQuery>,
) -> AppResult<Json<MonthlyStats>> {
    let today = crate::services::loans::today();
    let year = query.year.unwrap_or_else(|| today.year());
    let month = query.month.unwrap_or_else(|| today.month());

    let stats = state.services.stats.monthly(year, month).await?;
    Ok(Json(stats))
}

/// Get dashboard statistics
#[utoipa::path(
    get,
    path = "/dashboard/stats",
    tag = "stats",
    security(("bearer_auth" = [])),
    params(DashboardQuery),
    responses(
        (status = 200, description = "Dashboard statistics", body = DashboardStats),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn dashboard_stats(
    State(state): State<crate::AppState>,
    AuthenticatedUser(_claims): AuthenticatedUser,
    Query(query): Query<DashboardQuery>,
) -> AppResult<Json<DashboardStats>> {
    let stats = state.services.stats.dashboard(query.since).await?;
    Ok(Json(stats))
}
