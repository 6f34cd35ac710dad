//! Loan management endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::{
    error::AppResult,
    models::{
        loan::{CreateLoan, LoanQuery, RenewLoan, UpdateLoan},
        LoanDetails, LoanStatus, Page,
    },
};

use super::{AuthenticatedUser, PaginatedResponse};

/// Status filter for a user's loans
#[derive(Debug, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct UserLoansQuery {
    /// pending, active, returned or overdue
    pub status: Option<LoanStatus>,
}

/// List loans with filters, search, ordering and pagination
///
/// Non-staff users only see their own loans.
#[utoipa::path(
    get,
    path = "/loans",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(LoanQuery),
    responses(
        (status = 200, description = "List of loans", body = PaginatedResponse<LoanDetails>),
        (status = 400, description = "Invalid ordering"),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn list_loans(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Query(mut query): Query<LoanQuery>,
) -> AppResult<Json<PaginatedResponse<LoanDetails>>> {
    if !claims.is_staff {
        query.user_id = Some(claims.user_id);
    }

    let page = Page::new(query.page, query.per_page, &state.config.pagination);
    let (loans, total) = state.services.loans.search_loans(&query, page).await?;
    Ok(Json(PaginatedResponse::new(loans, total, page)))
}

/// Get loans for a specific user
#[utoipa::path(
    get,
    path = "/users/{id}/loans",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "User ID"),
        UserLoansQuery
    ),
    responses(
        (status = 200, description = "User's loans", body = Vec<LoanDetails>),
        (status = 403, description = "Another user's loans"),
        (status = 404, description = "User not found")
    )
)]
pub async fn get_user_loans(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(user_id): Path<i32>,
    Query(query): Query<UserLoansQuery>,
) -> AppResult<Json<Vec<LoanDetails>>> {
    claims.require_self_or_staff(user_id)?;

    let loans = state
        .services
        .loans
        .get_user_loans(user_id, query.status)
        .await?;
    Ok(Json(loans))
}

/// Active loans past their due date
#[utoipa::path(
    get,
    path = "/loans/overdue",
    tag = "loans",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Overdue loans, most overdue first", body = Vec<LoanDetails>),
        (status = 403, description = "Staff privileges required")
    )
)]
pub async fn list_overdue_loans(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<Vec<LoanDetails>>> {
    claims.require_staff()?;

    let loans = state.services.loans.get_overdue().await?;
    Ok(Json(loans))
}

/// Get loan details by ID
#[utoipa::path(
    get,
    path = "/loans/{id}",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "Loan ID")
    ),
    responses(
        (status = 200, description = "Loan details", body = LoanDetails),
        (status = 404, description = "Loan not found")
    )
)]
pub async fn get_loan(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
) -> AppResult<Json<LoanDetails>> {
    let loan = state.services.loans.get_loan(id).await?;
    claims.require_self_or_staff(loan.user.id)?;
    Ok(Json(loan))
}

/// Create a new loan
#[utoipa::path(
    post,
    path = "/loans",
    tag = "loans",
    security(("bearer_auth" = [])),
    request_body = CreateLoan,
    responses(
        (status = 201, description = "Loan created", body = LoanDetails),
        (status = 400, description = "Book unavailable, duplicate loan or invalid input"),
        (status = 404, description = "User or book not found"),
        (status = 409, description = "Availability changed concurrently")
    )
)]
pub async fn create_loan(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Json(request): Json<CreateLoan>,
) -> AppResult<(StatusCode, Json<LoanDetails>)> {
    claims.require_self_or_staff(request.user_id)?;
    request.validate()?;

    let loan = state.services.loans.create_loan(request).await?;
    Ok((StatusCode::CREATED, Json(loan)))
}

/// Update a loan: status transition, due date or notes
#[utoipa::path(
    patch,
    path = "/loans/{id}",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "Loan ID")
    ),
    request_body = UpdateLoan,
    responses(
        (status = 200, description = "Loan updated", body = LoanDetails),
        (status = 400, description = "Invalid transition or input"),
        (status = 403, description = "Staff privileges required"),
        (status = 404, description = "Loan not found"),
        (status = 409, description = "Availability changed concurrently")
    )
)]
pub async fn update_loan(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
    Json(update): Json<UpdateLoan>,
) -> AppResult<Json<LoanDetails>> {
    claims.require_staff()?;
    update.validate()?;

    let loan = state.services.loans.update_loan(id, update).await?;
    Ok(Json(loan))
}

/// Delete a loan
#[utoipa::path(
    delete,
    path = "/loans/{id}",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "Loan ID")
    ),
    responses(
        (status = 204, description = "Loan deleted"),
        (status = 403, description = "Staff privileges required"),
        (status = 404, description = "Loan not found")
    )
)]
pub async fn delete_loan(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    claims.require_staff()?;

    state.services.loans.delete_loan(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Return a borrowed book
#[utoipa::path(
    post,
    path = "/loans/{id}/return",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "Loan ID")
    ),
    responses(
        (status = 200, description = "Book returned", body = LoanDetails),
        (status = 400, description = "Loan is not active"),
        (status = 404, description = "Loan not found")
    )
)]
pub async fn return_loan(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
) -> AppResult<Json<LoanDetails>> {
    let loan = state.services.loans.get_loan(id).await?;
    claims.require_self_or_staff(loan.user.id)?;

    let loan = state.services.loans.return_loan(id).await?;
    Ok(Json(loan))
}

/// Renew a loan
#[utoipa::path(
    post,
    path = "/loans/{id}/renew",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "Loan ID")
    ),
    request_body(content = RenewLoan, description = "Optional extension; defaults to the renewal period"),
    responses(
        (status = 200, description = "Loan renewed", body = LoanDetails),
        (status = 400, description = "Only active loans can be renewed"),
        (status = 404, description = "Loan not found")
    )
)]
pub async fn renew_loan(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
    request: Option<Json<RenewLoan>>,
) -> AppResult<Json<LoanDetails>> {
    let loan = state.services.loans.get_loan(id).await?;
    claims.require_self_or_staff(loan.user.id)?;

    let extra_days = request.and_then(|Json(body)| body.extra_days);
    let loan = state.services.loans.renew_loan(id, extra_days).await?;
    Ok(Json(loan))
}
