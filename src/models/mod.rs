//! Data models for Bookshelf

pub mod book;
pub mod loan;
pub mod review;
pub mod user;

// Re-export commonly used types
pub use book::{Book, CreateBook, UpdateBook};
pub use loan::{Loan, LoanDetails, LoanWithBook, OverdueLoan};
pub use review::Review;
pub use user::{Role, User, UserClaims};
