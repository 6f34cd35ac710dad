//! Loan model and related types

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{Decode, Encode, FromRow, Postgres};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use super::book::BookShort;
use super::user::UserShort;
use crate::error::AppError;

/// Loan status
///
/// Only `pending`, `active` and `returned` are ever stored; `overdue` is the
/// display state of an active loan past its due date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum LoanStatus {
    Pending,
    Active,
    Returned,
    Overdue,
}

impl LoanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Pending => "pending",
            LoanStatus::Active => "active",
            LoanStatus::Returned => "returned",
            LoanStatus::Overdue => "overdue",
        }
    }

    /// Pending and active loans block another loan of the same book by the same user
    pub fn is_open(&self) -> bool {
        matches!(self, LoanStatus::Pending | LoanStatus::Active)
    }
}

impl std::fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for LoanStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(LoanStatus::Pending),
            "active" => Ok(LoanStatus::Active),
            "returned" => Ok(LoanStatus::Returned),
            "overdue" => Ok(LoanStatus::Overdue),
            _ => Err(format!("Invalid loan status: {}", s)),
        }
    }
}

// SQLx conversion for LoanStatus (stored as TEXT)
impl sqlx::Type<Postgres> for LoanStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<Postgres>>::type_info()
    }

    fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
        <String as sqlx::Type<Postgres>>::compatible(ty)
    }
}

impl<'r> Decode<'r, Postgres> for LoanStatus {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&'r str as Decode<'r, Postgres>>::decode(value)?;
        s.parse().map_err(|e: String| e.into())
    }
}

impl Encode<'_, Postgres> for LoanStatus {
    fn encode_by_ref(&self, buf: &mut sqlx::postgres::PgArgumentBuffer) -> sqlx::encode::IsNull {
        <&str as Encode<Postgres>>::encode(self.as_str(), buf)
    }
}

/// Loan model from database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Loan {
    pub id: i32,
    pub user_id: i32,
    pub book_id: i32,
    pub loan_date: NaiveDate,
    pub due_date: NaiveDate,
    pub return_date: Option<NaiveDate>,
    pub status: LoanStatus,
    pub notes: Option<String>,
    /// Fine frozen when the loan was returned
    pub fine_amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loan {
    /// An active loan whose due date has passed
    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        self.status == LoanStatus::Active && self.due_date < today
    }

    pub fn days_overdue(&self, today: NaiveDate) -> i64 {
        if self.is_overdue(today) {
            (today - self.due_date).num_days()
        } else {
            0
        }
    }

    /// Days from loan date to return date, or to today while not returned
    pub fn loan_duration(&self, today: NaiveDate) -> i64 {
        let end = self.return_date.unwrap_or(today);
        (end - self.loan_date).num_days()
    }

    pub fn display_status(&self, today: NaiveDate) -> LoanStatus {
        if self.is_overdue(today) {
            LoanStatus::Overdue
        } else {
            self.status
        }
    }

    /// Fine owed: accrues daily while active, fixed once returned
    pub fn current_fine(&self, today: NaiveDate, daily_fine: Decimal) -> Decimal {
        match self.status {
            LoanStatus::Active => Decimal::from(self.days_overdue(today)) * daily_fine,
            _ => self.fine_amount,
        }
    }
}

/// Loan data produced by the availability coordinator, ready for insertion
#[derive(Debug, Clone, PartialEq)]
pub struct NewLoan {
    pub user_id: i32,
    pub book_id: i32,
    pub loan_date: NaiveDate,
    pub due_date: NaiveDate,
    pub status: LoanStatus,
    pub notes: Option<String>,
}

/// Joined row used to build [`LoanDetails`]
#[derive(Debug, Clone, FromRow)]
pub struct LoanRow {
    #[sqlx(flatten)]
    pub loan: Loan,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub title: String,
    pub author: String,
    pub isbn: String,
    pub total_copies: i32,
    pub available_copies: i32,
}

impl LoanRow {
    pub fn into_details(self, today: NaiveDate, daily_fine: Decimal) -> LoanDetails {
        let loan = self.loan;
        LoanDetails {
            id: loan.id,
            user: UserShort {
                id: loan.user_id,
                username: self.username,
                first_name: self.first_name,
                last_name: self.last_name,
                email: self.email,
            },
            book: BookShort {
                id: loan.book_id,
                title: self.title,
                author: self.author,
                isbn: self.isbn,
                available_copies: self.available_copies,
                total_copies: self.total_copies,
            },
            loan_date: loan.loan_date,
            due_date: loan.due_date,
            return_date: loan.return_date,
            status: loan.status,
            display_status: loan.display_status(today),
            is_overdue: loan.is_overdue(today),
            days_overdue: loan.days_overdue(today),
            loan_duration: loan.loan_duration(today),
            fine_amount: loan.current_fine(today, daily_fine),
            notes: loan.notes,
            created_at: loan.created_at,
            updated_at: loan.updated_at,
        }
    }
}

/// Loan with full details for display
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoanDetails {
    pub id: i32,
    pub user: UserShort,
    pub book: BookShort,
    pub loan_date: NaiveDate,
    pub due_date: NaiveDate,
    pub return_date: Option<NaiveDate>,
    /// Stored status
    pub status: LoanStatus,
    /// Stored status, or `overdue` for an active loan past its due date
    pub display_status: LoanStatus,
    pub is_overdue: bool,
    pub days_overdue: i64,
    pub loan_duration: i64,
    pub fine_amount: Decimal,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Create loan request
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateLoan {
    pub user_id: i32,
    pub book_id: i32,
    /// Defaults to the loan date plus the configured loan period
    pub due_date: Option<NaiveDate>,
    #[validate(length(max = 2000, message = "Notes must be at most 2000 characters"))]
    pub notes: Option<String>,
    /// Initial status: pending (default) or active
    pub status: Option<LoanStatus>,
}

/// Partial loan update
#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateLoan {
    pub status: Option<LoanStatus>,
    pub due_date: Option<NaiveDate>,
    #[validate(length(max = 2000, message = "Notes must be at most 2000 characters"))]
    pub notes: Option<String>,
}

/// Renew loan request
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct RenewLoan {
    /// Days added to the due date (default: configured renewal period)
    pub extra_days: Option<i64>,
}

/// Sortable loan columns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoanOrderField {
    LoanDate,
    DueDate,
    ReturnDate,
    CreatedAt,
}

/// Parsed `ordering` parameter (`due_date`, `-created_at`, ...)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoanOrdering {
    pub field: LoanOrderField,
    pub descending: bool,
}

impl Default for LoanOrdering {
    fn default() -> Self {
        Self {
            field: LoanOrderField::CreatedAt,
            descending: true,
        }
    }
}

impl LoanOrdering {
    pub fn parse(raw: Option<&str>) -> Result<Self, AppError> {
        let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(Self::default());
        };

        let (descending, name) = match raw.strip_prefix('-') {
            Some(name) => (true, name),
            None => (false, raw),
        };

        let field = match name {
            "loan_date" => LoanOrderField::LoanDate,
            "due_date" => LoanOrderField::DueDate,
            "return_date" => LoanOrderField::ReturnDate,
            "created_at" => LoanOrderField::CreatedAt,
            other => {
                return Err(AppError::Validation(format!(
                    "Cannot order loans by '{}'",
                    other
                )))
            }
        };

        Ok(Self { field, descending })
    }

    pub fn to_sql(&self) -> &'static str {
        match (self.field, self.descending) {
            (LoanOrderField::LoanDate, false) => "l.loan_date ASC, l.id ASC",
            (LoanOrderField::LoanDate, true) => "l.loan_date DESC, l.id DESC",
            (LoanOrderField::DueDate, false) => "l.due_date ASC, l.id ASC",
            (LoanOrderField::DueDate, true) => "l.due_date DESC, l.id DESC",
            (LoanOrderField::ReturnDate, false) => "l.return_date ASC NULLS LAST, l.id ASC",
            (LoanOrderField::ReturnDate, true) => "l.return_date DESC NULLS LAST, l.id DESC",
            (LoanOrderField::CreatedAt, false) => "l.created_at ASC, l.id ASC",
            (LoanOrderField::CreatedAt, true) => "l.created_at DESC, l.id DESC",
        }
    }
}

/// Loan query parameters
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct LoanQuery {
    /// Status filter; `overdue` selects active loans past their due date
    pub status: Option<LoanStatus>,
    pub user_id: Option<i32>,
    pub book_id: Option<i32>,
    pub username: Option<String>,
    /// Search in user names, book title and author, and notes
    pub search: Option<String>,
    /// loan_date, due_date, return_date or created_at; prefix with '-' for descending
    pub ordering: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}
