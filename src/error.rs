//! Error types for Bookloan server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Machine-readable error codes reported in every error body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    Failure = 1,
    NotAuthorized = 2,
    DbFailure = 3,
    NoSuchUser = 4,
    NoSuchBook = 5,
    NoSuchLoan = 6,
    BookNotAvailable = 7,
    DuplicateLoan = 8,
    InvalidTransition = 9,
    BadValue = 10,
    Conflict = 11,
}

/// Main application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Authorization failed: {0}")]
    Authorization(String),

    #[error("{entity} with id {id} not found")]
    NotFound { entity: Entity, id: i32 },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Book is not available for loan: {0}")]
    BookUnavailable(String),

    #[error("User already has this book on loan")]
    DuplicateLoan,

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Record kinds named by not-found errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Book,
    Loan,
    User,
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Entity::Book => "Book",
            Entity::Loan => "Loan",
            Entity::User => "User",
        };
        write!(f, "{}", label)
    }
}

impl AppError {
    pub fn not_found(entity: Entity, id: i32) -> Self {
        AppError::NotFound { entity, id }
    }

    /// Error kind reported to clients
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Authentication(_) => "authentication",
            AppError::Authorization(_) => "authorization",
            AppError::NotFound { .. } => "not_found",
            AppError::Validation(_)
            | AppError::BookUnavailable(_)
            | AppError::DuplicateLoan
            | AppError::InvalidTransition { .. } => "validation",
            AppError::Conflict(_) => "conflict",
            AppError::Database(_) | AppError::Internal(_) => "internal",
        }
    }

    fn status_and_code(&self) -> (StatusCode, ErrorCode) {
        match self {
            AppError::Authentication(_) => (StatusCode::UNAUTHORIZED, ErrorCode::NotAuthorized),
            AppError::Authorization(_) => (StatusCode::FORBIDDEN, ErrorCode::NotAuthorized),
            AppError::NotFound { entity, .. } => {
                let code = match entity {
                    Entity::Book => ErrorCode::NoSuchBook,
                    Entity::Loan => ErrorCode::NoSuchLoan,
                    Entity::User => ErrorCode::NoSuchUser,
                };
                (StatusCode::NOT_FOUND, code)
            }
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, ErrorCode::BadValue),
            AppError::BookUnavailable(_) => (StatusCode::BAD_REQUEST, ErrorCode::BookNotAvailable),
            AppError::DuplicateLoan => (StatusCode::BAD_REQUEST, ErrorCode::DuplicateLoan),
            AppError::InvalidTransition { .. } => {
                (StatusCode::BAD_REQUEST, ErrorCode::InvalidTransition)
            }
            AppError::Conflict(_) => (StatusCode::CONFLICT, ErrorCode::Conflict),
            AppError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::DbFailure),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::Failure),
        }
    }
}

// Postgres SQLSTATE classes surfaced as conflicts
const UNIQUE_VIOLATION: &str = "23505";
const CHECK_VIOLATION: &str = "23514";

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db) = e {
            match db.code().as_deref() {
                Some(UNIQUE_VIOLATION) => {
                    return AppError::Conflict(format!(
                        "Record conflicts with an existing one ({})",
                        db.constraint().unwrap_or("unique constraint")
                    ));
                }
                Some(CHECK_VIOLATION) => {
                    return AppError::Conflict(format!(
                        "Concurrent update violated {}",
                        db.constraint().unwrap_or("a check constraint")
                    ));
                }
                _ => {}
            }
        }
        AppError::Database(e)
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(e: validator::ValidationErrors) -> Self {
        AppError::Validation(e.to_string())
    }
}

/// Error response body
#[derive(Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub code: u32,
    pub kind: String,
    pub error: String,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = match &self {
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                "Database error".to_string()
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                "Internal server error".to_string()
            }
            AppError::Authentication(msg)
            | AppError::Authorization(msg)
            | AppError::Validation(msg)
            | AppError::Conflict(msg) => msg.clone(),
            other => other.to_string(),
        };

        let body = Json(ErrorResponse {
            code: code as u32,
            kind: self.kind().to_string(),
            error: format!("{:?}", code),
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for application operations
pub type AppResult<T> = Result<T, AppError>;
