//! Availability coordinator
//!
//! Pure loan lifecycle rules. Every operation here mutates a [`Book`] and a
//! [`Loan`] in memory; callers persist both in a single transaction. Each
//! operation validates first and mutates only on success, so a failed call
//! leaves both records untouched.
//!
//! Lifecycle:
//!
//! | from     | to       | available copies            |
//! |----------|----------|-----------------------------|
//! | pending  | active   | -1 (fails at zero)          |
//! | active   | returned | +1 (clamped at total)       |
//! | returned | active   | -1 (fails at zero)          |
//! | pending  | returned | unchanged (cancellation)    |

use chrono::{Days, Duration, NaiveDate};
use rust_decimal::Decimal;

use crate::{
    config::LoansConfig,
    error::{AppError, AppResult},
    models::{Book, Loan, LoanStatus, NewLoan},
};

/// Loan request as seen by the coordinator
#[derive(Debug, Clone, Default)]
pub struct LoanRequest {
    pub user_id: i32,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub status: Option<LoanStatus>,
}

#[derive(Debug, Clone)]
pub struct AvailabilityCoordinator {
    policy: LoansConfig,
}

impl AvailabilityCoordinator {
    pub fn new(policy: LoansConfig) -> Self {
        Self { policy }
    }

    pub fn daily_fine(&self) -> Decimal {
        self.policy.daily_fine
    }

    /// Validate a new loan of `book` and take a copy when it starts active.
    ///
    /// `has_open_loan` tells whether the user already holds a pending or
    /// active loan of this book.
    pub fn create_loan(
        &self,
        book: &mut Book,
        has_open_loan: bool,
        request: LoanRequest,
        today: NaiveDate,
    ) -> AppResult<NewLoan> {
        if book.available_copies <= 0 {
            return Err(AppError::BookUnavailable(format!(
                "'{}' has no available copies",
                book.title
            )));
        }
        if has_open_loan {
            return Err(AppError::DuplicateLoan);
        }

        let status = request.status.unwrap_or(LoanStatus::Pending);
        if !status.is_open() {
            return Err(AppError::Validation(format!(
                "A loan must start as pending or active, not {}",
                status
            )));
        }

        let due_date = request
            .due_date
            .unwrap_or(today + Duration::days(self.policy.default_loan_days));
        if due_date < today {
            return Err(AppError::Validation(
                "Due date cannot be before the loan date".to_string(),
            ));
        }

        if status == LoanStatus::Active {
            take_copy(book)?;
        }

        Ok(NewLoan {
            user_id: request.user_id,
            book_id: book.id,
            loan_date: today,
            due_date,
            status,
            notes: request.notes,
        })
    }

    /// Move `loan` to `new_status`, adjusting `book` availability by at most one.
    ///
    /// `has_other_open_loan` tells whether the same user holds another pending
    /// or active loan of this book; it only matters for re-borrowing.
    pub fn transition_status(
        &self,
        loan: &mut Loan,
        book: &mut Book,
        has_other_open_loan: bool,
        new_status: LoanStatus,
        today: NaiveDate,
    ) -> AppResult<()> {
        ensure_same_book(loan, book)?;

        match (loan.status, new_status) {
            (LoanStatus::Pending, LoanStatus::Active) => {
                take_copy(book)?;
                loan.status = LoanStatus::Active;
            }
            (LoanStatus::Active, LoanStatus::Returned) => {
                self.return_loan(loan, book, today)?;
            }
            (LoanStatus::Returned, LoanStatus::Active) => {
                if has_other_open_loan {
                    return Err(AppError::DuplicateLoan);
                }
                take_copy(book)?;
                loan.status = LoanStatus::Active;
                loan.return_date = None;
                loan.fine_amount = Decimal::ZERO;
            }
            (LoanStatus::Pending, LoanStatus::Returned) => {
                // a pending loan never held a copy
                loan.status = LoanStatus::Returned;
                loan.return_date = Some(today);
            }
            (from, to) => {
                return Err(AppError::InvalidTransition {
                    from: from.to_string(),
                    to: to.to_string(),
                })
            }
        }

        Ok(())
    }

    /// Return an active loan: freeze its fine and give the copy back.
    pub fn return_loan(&self, loan: &mut Loan, book: &mut Book, today: NaiveDate) -> AppResult<()> {
        ensure_same_book(loan, book)?;

        match loan.status {
            LoanStatus::Active => {}
            LoanStatus::Returned => {
                return Err(AppError::Validation(
                    "This loan has already been returned".to_string(),
                ))
            }
            _ => {
                return Err(AppError::Validation(
                    "This book is not currently on loan".to_string(),
                ))
            }
        }

        loan.fine_amount = loan.current_fine(today, self.policy.daily_fine);
        loan.status = LoanStatus::Returned;
        loan.return_date = Some(today);
        release_copy(book);

        Ok(())
    }

    /// Extend the due date of an active loan. Availability is untouched.
    pub fn renew(&self, loan: &mut Loan, extra_days: Option<i64>) -> AppResult<NaiveDate> {
        if loan.status != LoanStatus::Active {
            return Err(AppError::Validation(
                "Only active loans can be renewed".to_string(),
            ));
        }

        let extra_days = extra_days.unwrap_or(self.policy.renewal_days);
        if extra_days <= 0 {
            return Err(AppError::Validation(
                "Renewal must extend the due date by at least one day".to_string(),
            ));
        }

        let due_date = loan
            .due_date
            .checked_add_days(Days::new(extra_days as u64))
            .ok_or_else(|| {
                AppError::Validation(format!("Renewal by {} days is out of range", extra_days))
            })?;
        loan.due_date = due_date;
        Ok(loan.due_date)
    }

    /// Change the due date directly (loan edits).
    pub fn reschedule(&self, loan: &mut Loan, due_date: NaiveDate) -> AppResult<()> {
        if loan.status == LoanStatus::Returned {
            return Err(AppError::Validation(
                "Cannot change the due date of a returned loan".to_string(),
            ));
        }
        if due_date < loan.loan_date {
            return Err(AppError::Validation(
                "Due date cannot be before the loan date".to_string(),
            ));
        }
        loan.due_date = due_date;
        Ok(())
    }

    /// Give back the copy held by a loan about to be deleted.
    pub fn release_on_delete(&self, loan: &Loan, book: &mut Book) -> AppResult<()> {
        ensure_same_book(loan, book)?;
        if loan.status == LoanStatus::Active {
            release_copy(book);
        }
        Ok(())
    }
}

/// Change a book's total, shifting availability by the same amount.
pub fn adjust_total_copies(book: &mut Book, new_total: i32) -> AppResult<()> {
    if new_total < 0 {
        return Err(AppError::Validation(
            "Total copies cannot be negative".to_string(),
        ));
    }

    let on_loan = book.copies_on_loan();
    if new_total < on_loan {
        return Err(AppError::Validation(format!(
            "Cannot reduce total copies to {} while {} copies are on loan",
            new_total, on_loan
        )));
    }

    book.total_copies = new_total;
    book.available_copies = new_total - on_loan;
    Ok(())
}

fn ensure_same_book(loan: &Loan, book: &Book) -> AppResult<()> {
    if loan.book_id != book.id {
        return Err(AppError::Internal(format!(
            "Loan {} refers to book {}, not {}",
            loan.id, loan.book_id, book.id
        )));
    }
    Ok(())
}

fn take_copy(book: &mut Book) -> AppResult<()> {
    if book.available_copies <= 0 {
        return Err(AppError::BookUnavailable(format!(
            "'{}' has no available copies",
            book.title
        )));
    }
    book.available_copies -= 1;
    Ok(())
}

fn release_copy(book: &mut Book) {
    if book.available_copies >= book.total_copies {
        tracing::warn!(
            "Book {} already has all {} copies available, not incrementing",
            book.id,
            book.total_copies
        );
        return;
    }
    book.available_copies += 1;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn today() -> NaiveDate {
        date(2024, 5, 10)
    }

    fn coordinator() -> AvailabilityCoordinator {
        AvailabilityCoordinator::new(LoansConfig::default())
    }

    fn book(total: i32, available: i32) -> Book {
        Book {
            id: 1,
            title: "The Left Hand of Darkness".to_string(),
            author: "Ursula K. Le Guin".to_string(),
            isbn: "9780441478125".to_string(),
            total_copies: total,
            available_copies: available,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn request(user_id: i32, status: LoanStatus) -> LoanRequest {
        LoanRequest {
            user_id,
            status: Some(status),
            ..Default::default()
        }
    }

    /// Persist a NewLoan the way the repository would
    fn stored(id: i32, new_loan: NewLoan) -> Loan {
        Loan {
            id,
            user_id: new_loan.user_id,
            book_id: new_loan.book_id,
            loan_date: new_loan.loan_date,
            due_date: new_loan.due_date,
            return_date: None,
            status: new_loan.status,
            notes: new_loan.notes,
            fine_amount: Decimal::ZERO,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn assert_bounds(book: &Book) {
        assert!(book.available_copies >= 0);
        assert!(book.available_copies <= book.total_copies);
    }

    #[test]
    fn test_two_copy_scenario() {
        let c = coordinator();
        let mut book = book(2, 2);

        let first = c
            .create_loan(&mut book, false, request(1, LoanStatus::Active), today())
            .unwrap();
        assert_eq!(book.available_copies, 1);

        let second = c
            .create_loan(&mut book, false, request(2, LoanStatus::Active), today())
            .unwrap();
        assert_eq!(book.available_copies, 0);
        assert_eq!(second.user_id, 2);

        let third = c.create_loan(&mut book, false, request(3, LoanStatus::Active), today());
        assert!(matches!(third, Err(AppError::BookUnavailable(_))));
        assert_eq!(book.available_copies, 0);

        let mut first = stored(1, first);
        c.return_loan(&mut first, &mut book, today()).unwrap();
        assert_eq!(book.available_copies, 1);
        assert_eq!(first.status, LoanStatus::Returned);
        assert_eq!(first.return_date, Some(today()));
    }

    #[test]
    fn test_create_fails_without_availability_even_when_pending() {
        let c = coordinator();
        let mut book = book(1, 0);
        let result = c.create_loan(&mut book, false, request(1, LoanStatus::Pending), today());
        assert!(matches!(result, Err(AppError::BookUnavailable(_))));
        assert_eq!(book.available_copies, 0);
    }

    #[test]
    fn test_pending_creation_keeps_availability() {
        let c = coordinator();
        let mut book = book(3, 3);
        let loan = c
            .create_loan(&mut book, false, LoanRequest { user_id: 4, ..Default::default() }, today())
            .unwrap();
        assert_eq!(loan.status, LoanStatus::Pending);
        assert_eq!(book.available_copies, 3);
        assert_eq!(loan.due_date, date(2024, 5, 24));
    }

    #[test]
    fn test_duplicate_open_loan_rejected() {
        let c = coordinator();
        let mut book = book(3, 2);
        let result = c.create_loan(&mut book, true, request(1, LoanStatus::Active), today());
        assert!(matches!(result, Err(AppError::DuplicateLoan)));
        assert_eq!(book.available_copies, 2);
    }

    #[test]
    fn test_create_rejects_terminal_or_derived_status() {
        let c = coordinator();
        let mut book = book(1, 1);
        for status in [LoanStatus::Returned, LoanStatus::Overdue] {
            let result = c.create_loan(&mut book, false, request(1, status), today());
            assert!(matches!(result, Err(AppError::Validation(_))));
        }
        assert_eq!(book.available_copies, 1);
    }

    #[test]
    fn test_create_rejects_due_date_in_past() {
        let c = coordinator();
        let mut book = book(1, 1);
        let mut req = request(1, LoanStatus::Active);
        req.due_date = Some(date(2024, 5, 1));
        assert!(c.create_loan(&mut book, false, req, today()).is_err());
        assert_eq!(book.available_copies, 1);
    }

    #[test]
    fn test_pending_to_active_takes_copy() {
        let c = coordinator();
        let mut book = book(1, 1);
        let new_loan = c
            .create_loan(&mut book, false, request(1, LoanStatus::Pending), today())
            .unwrap();
        let mut loan = stored(1, new_loan);

        c.transition_status(&mut loan, &mut book, false, LoanStatus::Active, today())
            .unwrap();
        assert_eq!(loan.status, LoanStatus::Active);
        assert_eq!(book.available_copies, 0);
    }

    #[test]
    fn test_activation_at_zero_fails_and_leaves_state() {
        let c = coordinator();
        let mut book = book(1, 1);
        let pending = c
            .create_loan(&mut book, false, request(1, LoanStatus::Pending), today())
            .unwrap();
        let mut pending = stored(1, pending);

        // someone else takes the last copy
        c.create_loan(&mut book, false, request(2, LoanStatus::Active), today())
            .unwrap();

        let result = c.transition_status(&mut pending, &mut book, false, LoanStatus::Active, today());
        assert!(matches!(result, Err(AppError::BookUnavailable(_))));
        assert_eq!(pending.status, LoanStatus::Pending);
        assert_eq!(book.available_copies, 0);
    }

    #[test]
    fn test_reborrow_after_return() {
        let c = coordinator();
        let mut book = book(1, 1);
        let loan = c
            .create_loan(&mut book, false, request(1, LoanStatus::Active), today())
            .unwrap();
        let mut loan = stored(1, loan);

        c.transition_status(&mut loan, &mut book, false, LoanStatus::Returned, today())
            .unwrap();
        assert_eq!(book.available_copies, 1);

        let result = c.transition_status(&mut loan, &mut book, true, LoanStatus::Active, today());
        assert!(matches!(result, Err(AppError::DuplicateLoan)));

        c.transition_status(&mut loan, &mut book, false, LoanStatus::Active, today())
            .unwrap();
        assert_eq!(loan.status, LoanStatus::Active);
        assert_eq!(loan.return_date, None);
        assert_eq!(book.available_copies, 0);
    }

    #[test]
    fn test_cancel_pending_keeps_availability() {
        let c = coordinator();
        let mut book = book(2, 2);
        let loan = c
            .create_loan(&mut book, false, request(1, LoanStatus::Pending), today())
            .unwrap();
        let mut loan = stored(1, loan);

        c.transition_status(&mut loan, &mut book, false, LoanStatus::Returned, today())
            .unwrap();
        assert_eq!(loan.status, LoanStatus::Returned);
        assert_eq!(loan.return_date, Some(today()));
        assert_eq!(book.available_copies, 2);
    }

    #[test]
    fn test_invalid_transitions() {
        let c = coordinator();
        let cases = [
            (LoanStatus::Active, LoanStatus::Pending),
            (LoanStatus::Returned, LoanStatus::Pending),
            (LoanStatus::Active, LoanStatus::Overdue),
            (LoanStatus::Active, LoanStatus::Active),
            (LoanStatus::Pending, LoanStatus::Pending),
        ];
        for (from, to) in cases {
            let mut book = book(2, 1);
            let mut loan = stored(
                1,
                NewLoan {
                    user_id: 1,
                    book_id: 1,
                    loan_date: today(),
                    due_date: today(),
                    status: from,
                    notes: None,
                },
            );
            let result = c.transition_status(&mut loan, &mut book, false, to, today());
            assert!(
                matches!(result, Err(AppError::InvalidTransition { .. })),
                "{} -> {} should be rejected",
                from,
                to
            );
            assert_eq!(loan.status, from);
            assert_eq!(book.available_copies, 1);
        }
    }

    #[test]
    fn test_return_twice_is_rejected() {
        let c = coordinator();
        let mut book = book(1, 0);
        let mut loan = stored(
            1,
            NewLoan {
                user_id: 1,
                book_id: 1,
                loan_date: today(),
                due_date: today(),
                status: LoanStatus::Active,
                notes: None,
            },
        );
        c.return_loan(&mut loan, &mut book, today()).unwrap();
        assert!(c.return_loan(&mut loan, &mut book, today()).is_err());
        assert_eq!(book.available_copies, 1);
    }

    #[test]
    fn test_return_freezes_fine() {
        let c = coordinator();
        let mut book = book(1, 0);
        let mut loan = stored(
            1,
            NewLoan {
                user_id: 1,
                book_id: 1,
                loan_date: date(2024, 4, 1),
                due_date: date(2024, 4, 15),
                status: LoanStatus::Active,
                notes: None,
            },
        );
        c.return_loan(&mut loan, &mut book, date(2024, 4, 19)).unwrap();
        assert_eq!(loan.fine_amount, Decimal::new(200, 2));
        assert_eq!(loan.current_fine(date(2024, 6, 1), c.daily_fine()), Decimal::new(200, 2));
        assert_eq!(loan.days_overdue(date(2024, 6, 1)), 0);
    }

    #[test]
    fn test_release_is_clamped_at_total() {
        let c = coordinator();
        let mut book = book(1, 1);
        let mut loan = stored(
            1,
            NewLoan {
                user_id: 1,
                book_id: 1,
                loan_date: today(),
                due_date: today(),
                status: LoanStatus::Active,
                notes: None,
            },
        );
        c.return_loan(&mut loan, &mut book, today()).unwrap();
        assert_eq!(book.available_copies, 1);
        assert_bounds(&book);
    }

    #[test]
    fn test_renew_only_moves_due_date() {
        let c = coordinator();
        let mut book = book(2, 2);
        let loan = c
            .create_loan(&mut book, false, request(1, LoanStatus::Active), today())
            .unwrap();
        let mut loan = stored(1, loan);
        let before = book.available_copies;

        let due = c.renew(&mut loan, None).unwrap();
        assert_eq!(due, date(2024, 6, 7));
        let due = c.renew(&mut loan, Some(3)).unwrap();
        assert_eq!(due, date(2024, 6, 10));
        assert_eq!(book.available_copies, before);

        assert!(c.renew(&mut loan, Some(0)).is_err());
        assert_eq!(loan.due_date, date(2024, 6, 10));
    }

    #[test]
    fn test_renew_out_of_range_is_rejected() {
        let c = coordinator();
        let mut book = book(1, 1);
        let loan = c
            .create_loan(&mut book, false, request(1, LoanStatus::Active), today())
            .unwrap();
        let mut loan = stored(1, loan);
        let due = loan.due_date;

        for days in [1_000_000_000, i64::MAX] {
            let err = c.renew(&mut loan, Some(days)).unwrap_err();
            assert!(matches!(err, AppError::Validation(_)));
            assert_eq!(loan.due_date, due);
        }
    }

    #[test]
    fn test_renew_requires_active() {
        let c = coordinator();
        for status in [LoanStatus::Pending, LoanStatus::Returned] {
            let mut loan = stored(
                1,
                NewLoan {
                    user_id: 1,
                    book_id: 1,
                    loan_date: today(),
                    due_date: today(),
                    status,
                    notes: None,
                },
            );
            assert!(c.renew(&mut loan, None).is_err());
            assert_eq!(loan.due_date, today());
        }
    }

    #[test]
    fn test_delete_releases_only_active_loans() {
        let c = coordinator();
        let mut book = book(2, 0);
        let mut active = stored(
            1,
            NewLoan {
                user_id: 1,
                book_id: 1,
                loan_date: today(),
                due_date: today(),
                status: LoanStatus::Active,
                notes: None,
            },
        );
        c.release_on_delete(&active, &mut book).unwrap();
        assert_eq!(book.available_copies, 1);

        active.status = LoanStatus::Returned;
        c.release_on_delete(&active, &mut book).unwrap();
        assert_eq!(book.available_copies, 1);
    }

    #[test]
    fn test_mismatched_book_is_rejected() {
        let c = coordinator();
        let mut other = book(1, 1);
        other.id = 99;
        let mut loan = stored(
            1,
            NewLoan {
                user_id: 1,
                book_id: 1,
                loan_date: today(),
                due_date: today(),
                status: LoanStatus::Pending,
                notes: None,
            },
        );
        let result = c.transition_status(&mut loan, &mut other, false, LoanStatus::Active, today());
        assert!(matches!(result, Err(AppError::Internal(_))));
        assert_eq!(other.available_copies, 1);
    }

    #[test]
    fn test_adjust_total_copies() {
        let mut book = book(5, 2);
        adjust_total_copies(&mut book, 7).unwrap();
        assert_eq!((book.total_copies, book.available_copies), (7, 4));

        adjust_total_copies(&mut book, 3).unwrap();
        assert_eq!((book.total_copies, book.available_copies), (3, 0));

        assert!(adjust_total_copies(&mut book, 2).is_err());
        assert!(adjust_total_copies(&mut book, -1).is_err());
        assert_eq!((book.total_copies, book.available_copies), (3, 0));
    }

    #[test]
    fn test_bounds_hold_over_operation_sequence() {
        let c = coordinator();
        let mut book = book(3, 3);
        let mut loans: Vec<Loan> = Vec::new();

        // Deterministic mix of creates, activations, returns and re-borrows.
        for step in 0..60i32 {
            let user_id = step % 5;
            match step % 4 {
                0 | 1 => {
                    let has_open = loans
                        .iter()
                        .any(|l| l.user_id == user_id && l.status.is_open());
                    let status = if step % 3 == 0 {
                        LoanStatus::Pending
                    } else {
                        LoanStatus::Active
                    };
                    if let Ok(new_loan) =
                        c.create_loan(&mut book, has_open, request(user_id, status), today())
                    {
                        loans.push(stored(step, new_loan));
                    }
                }
                2 => {
                    if let Some(loan) = loans.iter_mut().find(|l| l.status == LoanStatus::Pending) {
                        let _ = c.transition_status(loan, &mut book, false, LoanStatus::Active, today());
                    }
                }
                _ => {
                    if let Some(loan) = loans.iter_mut().find(|l| l.status == LoanStatus::Active) {
                        c.return_loan(loan, &mut book, today()).unwrap();
                    }
                }
            }

            assert_bounds(&book);
            let active = loans.iter().filter(|l| l.status == LoanStatus::Active).count() as i32;
            assert_eq!(book.available_copies, book.total_copies - active);
        }
    }
}
