//! Repository layer: the persistent-store port and its adapters
//!
//! Services only see [`LibraryStore`] and [`LibraryTx`]. [`Repository`] is
//! the PostgreSQL adapter; [`memory::MemoryStore`] keeps everything in
//! process and is used by tests.

pub mod books;
pub mod loans;
pub mod memory;
pub mod reviews;
pub mod transaction;
pub mod users;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{
        book::UpdateBook,
        loan::{Loan, LoanWithBook, OverdueLoan},
        user::PasswordResetToken,
        Book, Review, User,
    },
};

pub use memory::MemoryStore;

/// Store operations that need no cross-row consistency
#[async_trait]
pub trait LibraryStore: Send + Sync {
    /// Start a unit of work. Dropping the returned transaction without
    /// calling [`LibraryTx::commit`] discards every write made through it.
    async fn begin(&self) -> AppResult<Box<dyn LibraryTx>>;

    // ---- Books ----
    async fn insert_book(&self, book: &Book) -> AppResult<()>;
    async fn get_book(&self, id: Uuid) -> AppResult<Option<Book>>;
    async fn list_books(&self) -> AppResult<Vec<Book>>;
    /// Update catalog fields only; `stock` and `rating` are left untouched
    async fn update_book(
        &self,
        id: Uuid,
        changes: &UpdateBook,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Book>>;

    // ---- Loans ----
    /// All loans of a user, newest `borrowed_at` first
    async fn list_user_loans(&self, user_id: Uuid) -> AppResult<Vec<LoanWithBook>>;
    async fn find_overdue_loans(&self, now: DateTime<Utc>) -> AppResult<Vec<OverdueLoan>>;
    /// Flag a loan as notified; returns false if it was already flagged
    async fn mark_overdue_notified(&self, loan_id: Uuid) -> AppResult<bool>;

    // ---- Reviews ----
    async fn get_review(&self, id: Uuid) -> AppResult<Option<Review>>;
    /// Reviews of a book, newest first
    async fn list_book_reviews(&self, book_id: Uuid) -> AppResult<Vec<Review>>;
    /// All reviews, newest first
    async fn list_reviews(&self) -> AppResult<Vec<Review>>;

    // ---- Users ----
    /// Fails with `Conflict` when the email is taken
    async fn insert_user(&self, user: &User) -> AppResult<()>;
    async fn get_user(&self, id: Uuid) -> AppResult<Option<User>>;
    async fn get_user_by_email(&self, email: &str) -> AppResult<Option<User>>;
    async fn list_users(&self) -> AppResult<Vec<User>>;
    /// Persist name, phone, password, role and verification flag
    async fn update_user(&self, user: &User) -> AppResult<()>;

    // ---- Password reset tokens (one per user) ----
    async fn upsert_reset_token(&self, token: &PasswordResetToken) -> AppResult<()>;
    async fn get_reset_token(&self, token: &str) -> AppResult<Option<PasswordResetToken>>;
    async fn delete_reset_token(&self, token: &str) -> AppResult<()>;
}

/// Unit of work over the store
///
/// `lock_user` and `lock_book` hold their row until commit or drop, so two
/// transactions locking the same book run one after the other. Callers lock
/// a user before a book, never the reverse.
#[async_trait]
pub trait LibraryTx: Send {
    /// Lock a user row; returns false if the user does not exist
    async fn lock_user(&mut self, user_id: Uuid) -> AppResult<bool>;
    /// Lock a book row and read it
    async fn lock_book(&mut self, book_id: Uuid) -> AppResult<Option<Book>>;

    async fn count_active_loans(&mut self, user_id: Uuid) -> AppResult<i64>;
    async fn count_active_loans_for_book(&mut self, book_id: Uuid) -> AppResult<i64>;
    async fn find_active_loan(&mut self, user_id: Uuid, book_id: Uuid) -> AppResult<Option<Loan>>;
    async fn insert_loan(&mut self, loan: &Loan) -> AppResult<()>;
    async fn mark_returned(&mut self, loan_id: Uuid, at: DateTime<Utc>) -> AppResult<Loan>;
    /// Add `delta` to a book's stock and return the new value
    async fn adjust_stock(&mut self, book_id: Uuid, delta: i32) -> AppResult<i32>;
    async fn delete_book(&mut self, book_id: Uuid) -> AppResult<()>;

    async fn find_review(&mut self, user_id: Uuid, book_id: Uuid) -> AppResult<Option<Review>>;
    async fn insert_review(&mut self, review: &Review) -> AppResult<()>;
    /// Returns false if the review no longer exists
    async fn delete_review(&mut self, review_id: Uuid) -> AppResult<bool>;
    /// Mean rating over the book's current reviews, 0 if none
    async fn average_rating(&mut self, book_id: Uuid) -> AppResult<f64>;
    async fn set_rating(&mut self, book_id: Uuid, rating: f64) -> AppResult<()>;
    /// Books the user has reviewed
    async fn reviewed_books(&mut self, user_id: Uuid) -> AppResult<Vec<Uuid>>;

    /// Remove a user with their reviews and reset token; loan history is kept
    async fn delete_user(&mut self, user_id: Uuid) -> AppResult<()>;

    async fn commit(self: Box<Self>) -> AppResult<()>;
}

/// PostgreSQL repository holding the connection pool
#[derive(Clone)]
pub struct Repository {
    pub pool: Pool<Postgres>,
    pub books: books::BooksRepository,
    pub loans: loans::LoansRepository,
    pub reviews: reviews::ReviewsRepository,
    pub users: users::UsersRepository,
}

impl Repository {
    /// Create a new repository with the given database pool
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            books: books::BooksRepository::new(pool.clone()),
            loans: loans::LoansRepository::new(pool.clone()),
            reviews: reviews::ReviewsRepository::new(pool.clone()),
            users: users::UsersRepository::new(pool.clone()),
            pool,
        }
    }
}

#[async_trait]
impl LibraryStore for Repository {
    async fn begin(&self) -> AppResult<Box<dyn LibraryTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(transaction::PgLibraryTx::new(tx)))
    }

    async fn insert_book(&self, book: &Book) -> AppResult<()> {
        self.books.insert(book).await
    }

    async fn get_book(&self, id: Uuid) -> AppResult<Option<Book>> {
        self.books.get_by_id(id).await
    }

    async fn list_books(&self) -> AppResult<Vec<Book>> {
        self.books.list().await
    }

    async fn update_book(
        &self,
        id: Uuid,
        changes: &UpdateBook,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Book>> {
        self.books.update(id, changes, now).await
    }

    async fn list_user_loans(&self, user_id: Uuid) -> AppResult<Vec<LoanWithBook>> {
        self.loans.list_for_user(user_id).await
    }

    async fn find_overdue_loans(&self, now: DateTime<Utc>) -> AppResult<Vec<OverdueLoan>> {
        self.loans.find_overdue(now).await
    }

    async fn mark_overdue_notified(&self, loan_id: Uuid) -> AppResult<bool> {
        self.loans.mark_overdue_notified(loan_id).await
    }

    async fn get_review(&self, id: Uuid) -> AppResult<Option<Review>> {
        self.reviews.get_by_id(id).await
    }

    async fn list_book_reviews(&self, book_id: Uuid) -> AppResult<Vec<Review>> {
        self.reviews.list_for_book(book_id).await
    }

    async fn list_reviews(&self) -> AppResult<Vec<Review>> {
        self.reviews.list().await
    }

    async fn insert_user(&self, user: &User) -> AppResult<()> {
        self.users.insert(user).await
    }

    async fn get_user(&self, id: Uuid) -> AppResult<Option<User>> {
        self.users.get_by_id(id).await
    }

    async fn get_user_by_email(&self, email: &str) -> AppResult<Option<User>> {
        self.users.get_by_email(email).await
    }

    async fn list_users(&self) -> AppResult<Vec<User>> {
        self.users.list().await
    }

    async fn update_user(&self, user: &User) -> AppResult<()> {
        self.users.update(user).await
    }

    async fn upsert_reset_token(&self, token: &PasswordResetToken) -> AppResult<()> {
        self.users.upsert_reset_token(token).await
    }

    async fn get_reset_token(&self, token: &str) -> AppResult<Option<PasswordResetToken>> {
        self.users.get_reset_token(token).await
    }

    async fn delete_reset_token(&self, token: &str) -> AppResult<()> {
        self.users.delete_reset_token(token).await
    }
}
