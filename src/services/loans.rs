//! Loan management service
//!
//! Every mutation runs in one transaction that locks the book row, then the
//! loan row, hands both to the [`AvailabilityCoordinator`] and writes the book
//! back with a compare-and-set on its previous availability.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{Postgres, Transaction};

use crate::{
    availability::{AvailabilityCoordinator, LoanRequest},
    config::LoansConfig,
    error::{AppError, AppResult, Entity},
    models::{
        loan::{CreateLoan, LoanOrdering, LoanQuery, UpdateLoan},
        Book, Loan, LoanDetails, LoanStatus, Page,
    },
    repository::Repository,
};

/// Loan counters for the statistics endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoanCounts {
    pub total: i64,
    pub active: i64,
    pub overdue: i64,
}

#[derive(Clone)]
pub struct LoansService {
    repository: Repository,
    coordinator: AvailabilityCoordinator,
}

impl LoansService {
    pub fn new(repository: Repository, policy: LoansConfig) -> Self {
        Self {
            repository,
            coordinator: AvailabilityCoordinator::new(policy),
        }
    }

    pub fn daily_fine(&self) -> Decimal {
        self.coordinator.daily_fine()
    }

    /// Search loans
    pub async fn search_loans(&self, query: &LoanQuery, page: Page) -> AppResult<(Vec<LoanDetails>, i64)> {
        let ordering = LoanOrdering::parse(query.ordering.as_deref())?;
        let today = today();
        let (rows, total) = self
            .repository
            .loans
            .search(query, ordering, page, today)
            .await?;

        let daily_fine = self.daily_fine();
        let loans = rows
            .into_iter()
            .map(|row| row.into_details(today, daily_fine))
            .collect();
        Ok((loans, total))
    }

    /// Get loan by ID
    pub async fn get_loan(&self, id: i32) -> AppResult<LoanDetails> {
        let row = self.repository.loans.get_row(id).await?;
        Ok(row.into_details(today(), self.daily_fine()))
    }

    /// Get loans for a user
    pub async fn get_user_loans(&self, user_id: i32, status: Option<LoanStatus>) -> AppResult<Vec<LoanDetails>> {
        // Verify user exists
        self.repository.users.get_by_id(user_id).await?;

        let today = today();
        let daily_fine = self.daily_fine();
        let rows = self
            .repository
            .loans
            .get_user_loans(user_id, status, today)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| row.into_details(today, daily_fine))
            .collect())
    }

    /// Active loans past their due date
    pub async fn get_overdue(&self) -> AppResult<Vec<LoanDetails>> {
        let today = today();
        let daily_fine = self.daily_fine();
        let rows = self.repository.loans.get_overdue(today).await?;
        Ok(rows
            .into_iter()
            .map(|row| row.into_details(today, daily_fine))
            .collect())
    }

    /// Create a new loan
    pub async fn create_loan(&self, request: CreateLoan) -> AppResult<LoanDetails> {
        let mut tx = self.repository.pool.begin().await?;

        if !self.repository.users.exists(&mut *tx, request.user_id).await? {
            return Err(AppError::not_found(Entity::User, request.user_id));
        }

        let mut book = self.repository.books.lock(&mut *tx, request.book_id).await?;
        let previous_available = book.available_copies;
        let has_open_loan = self
            .repository
            .loans
            .has_open_loan(&mut *tx, request.user_id, book.id, None)
            .await?;

        let new_loan = self.coordinator.create_loan(
            &mut book,
            has_open_loan,
            LoanRequest {
                user_id: request.user_id,
                due_date: request.due_date,
                notes: request.notes,
                status: request.status,
            },
            today(),
        )?;

        let loan_id = self.repository.loans.insert(&mut *tx, &new_loan).await?;
        self.store_book(&mut tx, &book, previous_available).await?;
        tx.commit().await?;

        tracing::info!(
            "Loan {} created for user {} on book {} ({}), {} copies left",
            loan_id,
            new_loan.user_id,
            book.id,
            new_loan.status,
            book.available_copies
        );

        self.get_loan(loan_id).await
    }

    /// Apply a partial update: due date, notes, then status transition
    pub async fn update_loan(&self, id: i32, update: UpdateLoan) -> AppResult<LoanDetails> {
        let today = today();
        let (mut tx, mut book, mut loan) = self.begin_locked(id).await?;
        let previous_available = book.available_copies;
        let previous_status = loan.status;

        if let Some(due_date) = update.due_date {
            self.coordinator.reschedule(&mut loan, due_date)?;
        }

        if let Some(notes) = update.notes {
            let notes = notes.trim().to_string();
            loan.notes = if notes.is_empty() { None } else { Some(notes) };
        }

        if let Some(status) = update.status.filter(|s| *s != loan.status) {
            let has_other_open_loan = if status.is_open() {
                self.repository
                    .loans
                    .has_open_loan(&mut *tx, loan.user_id, loan.book_id, Some(loan.id))
                    .await?
            } else {
                false
            };
            self.coordinator
                .transition_status(&mut loan, &mut book, has_other_open_loan, status, today)?;
        }

        self.store_book(&mut tx, &book, previous_available).await?;
        self.repository.loans.save(&mut *tx, &loan).await?;
        tx.commit().await?;

        if loan.status != previous_status {
            tracing::info!(
                "Loan {} moved from {} to {}, book {} has {} copies available",
                loan.id,
                previous_status,
                loan.status,
                book.id,
                book.available_copies
            );
        }

        self.get_loan(id).await
    }

    /// Return a loan
    pub async fn return_loan(&self, id: i32) -> AppResult<LoanDetails> {
        let (mut tx, mut book, mut loan) = self.begin_locked(id).await?;
        let previous_available = book.available_copies;

        self.coordinator.return_loan(&mut loan, &mut book, today())?;

        self.store_book(&mut tx, &book, previous_available).await?;
        self.repository.loans.save(&mut *tx, &loan).await?;
        tx.commit().await?;

        tracing::info!(
            "Loan {} returned, fine {}, book {} has {} copies available",
            loan.id,
            loan.fine_amount,
            book.id,
            book.available_copies
        );

        self.get_loan(id).await
    }

    /// Renew a loan
    pub async fn renew_loan(&self, id: i32, extra_days: Option<i64>) -> AppResult<LoanDetails> {
        let (mut tx, _book, mut loan) = self.begin_locked(id).await?;

        let due_date = self.coordinator.renew(&mut loan, extra_days)?;

        self.repository.loans.save(&mut *tx, &loan).await?;
        tx.commit().await?;

        tracing::info!("Loan {} renewed until {}", loan.id, due_date);

        self.get_loan(id).await
    }

    /// Delete a loan, releasing its copy when active
    pub async fn delete_loan(&self, id: i32) -> AppResult<()> {
        let (mut tx, mut book, loan) = self.begin_locked(id).await?;
        let previous_available = book.available_copies;

        self.coordinator.release_on_delete(&loan, &mut book)?;

        self.repository.loans.delete(&mut *tx, loan.id).await?;
        self.store_book(&mut tx, &book, previous_available).await?;
        tx.commit().await?;

        tracing::info!("Loan {} ({}) deleted", loan.id, loan.status);
        Ok(())
    }

    /// Total, active and overdue loan counts
    pub async fn counts(&self) -> AppResult<LoanCounts> {
        Ok(LoanCounts {
            total: self.repository.loans.count_total().await?,
            active: self.repository.loans.count_active().await?,
            overdue: self.repository.loans.count_overdue(today()).await?,
        })
    }

    /// Open a transaction holding the locks on a loan and its book, in that
    /// order: book first, then loan.
    async fn begin_locked(&self, id: i32) -> AppResult<(Transaction<'static, Postgres>, Book, Loan)> {
        // book_id never changes once a loan exists
        let book_id = self.repository.loans.get_by_id(id).await?.book_id;

        let mut tx = self.repository.pool.begin().await?;
        let book = self.repository.books.lock(&mut *tx, book_id).await?;
        let loan = self.repository.loans.lock(&mut *tx, id).await?;
        Ok((tx, book, loan))
    }

    async fn store_book(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        book: &Book,
        previous_available: i32,
    ) -> AppResult<()> {
        if book.available_copies == previous_available {
            return Ok(());
        }
        self.repository
            .books
            .store_availability(&mut **tx, book, previous_available)
            .await
    }
}

pub(crate) fn today() -> NaiveDate {
    Utc::now().date_naive()
}
