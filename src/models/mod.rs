//! Data models for Bookloan

pub mod book;
pub mod loan;
pub mod pagination;
pub mod user;

// Re-export commonly used types
pub use book::{Book, BookDetails, BookShort};
pub use loan::{Loan, LoanDetails, LoanStatus, NewLoan};
pub use pagination::Page;
pub use user::{User, UserClaims, UserShort};
