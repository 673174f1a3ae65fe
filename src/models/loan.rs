//! Loan (borrow) model and related types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use super::book::Book;

/// Loan model from database
///
/// At most one loan per (user_id, book_id) may have `returned_at = None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Loan {
    pub id: Uuid,
    pub book_id: Uuid,
    pub user_id: Uuid,
    pub borrowed_at: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub returned_at: Option<DateTime<Utc>>,
    pub is_overdue_notified: bool,
}

impl Loan {
    pub fn is_active(&self) -> bool {
        self.returned_at.is_none()
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.due_date < now
    }
}

/// Loan joined with its book, for the user's loan list
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoanDetails {
    #[serde(flatten)]
    pub loan: Loan,
    pub book: Book,
    pub is_overdue: bool,
}

/// Loan as stored, with its book if the book row still exists
#[derive(Debug, Clone)]
pub struct LoanWithBook {
    pub loan: Loan,
    pub book: Option<Book>,
}

/// Active, overdue, not yet notified loan with what the reminder needs
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct OverdueLoan {
    pub loan_id: Uuid,
    pub user_id: Uuid,
    pub user_name: String,
    pub user_email: String,
    pub book_title: String,
    pub due_date: DateTime<Utc>,
}

/// Borrow request
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct BorrowRequest {
    /// Due date (ISO 8601), must be after the borrow time
    pub due_date: DateTime<Utc>,
}
