//! PostgreSQL unit of work

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use super::{
    books::BooksRepository, loans::LoansRepository, reviews::ReviewsRepository,
    users::UsersRepository, LibraryTx,
};
use crate::{
    error::AppResult,
    models::{Book, Loan, Review},
};

/// Wraps a `sqlx` transaction; row locks are `SELECT ... FOR UPDATE` and
/// are released on commit or when the transaction is dropped (rollback).
pub struct PgLibraryTx {
    tx: Transaction<'static, Postgres>,
}

impl PgLibraryTx {
    pub fn new(tx: Transaction<'static, Postgres>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl LibraryTx for PgLibraryTx {
    async fn lock_user(&mut self, user_id: Uuid) -> AppResult<bool> {
        UsersRepository::lock(&mut *self.tx, user_id).await
    }

    async fn lock_book(&mut self, book_id: Uuid) -> AppResult<Option<Book>> {
        BooksRepository::lock(&mut *self.tx, book_id).await
    }

    async fn count_active_loans(&mut self, user_id: Uuid) -> AppResult<i64> {
        LoansRepository::count_active(&mut *self.tx, user_id).await
    }

    async fn count_active_loans_for_book(&mut self, book_id: Uuid) -> AppResult<i64> {
        LoansRepository::count_active_for_book(&mut *self.tx, book_id).await
    }

    async fn find_active_loan(&mut self, user_id: Uuid, book_id: Uuid) -> AppResult<Option<Loan>> {
        LoansRepository::find_active(&mut *self.tx, user_id, book_id).await
    }

    async fn insert_loan(&mut self, loan: &Loan) -> AppResult<()> {
        LoansRepository::insert(&mut *self.tx, loan).await
    }

    async fn mark_returned(&mut self, loan_id: Uuid, at: DateTime<Utc>) -> AppResult<Loan> {
        LoansRepository::mark_returned(&mut *self.tx, loan_id, at).await
    }

    async fn adjust_stock(&mut self, book_id: Uuid, delta: i32) -> AppResult<i32> {
        BooksRepository::adjust_stock(&mut *self.tx, book_id, delta).await
    }

    async fn delete_book(&mut self, book_id: Uuid) -> AppResult<()> {
        BooksRepository::delete(&mut *self.tx, book_id).await
    }

    async fn find_review(&mut self, user_id: Uuid, book_id: Uuid) -> AppResult<Option<Review>> {
        ReviewsRepository::find_by_user_and_book(&mut *self.tx, user_id, book_id).await
    }

    async fn insert_review(&mut self, review: &Review) -> AppResult<()> {
        ReviewsRepository::insert(&mut *self.tx, review).await
    }

    async fn delete_review(&mut self, review_id: Uuid) -> AppResult<bool> {
        ReviewsRepository::delete(&mut *self.tx, review_id).await
    }

    async fn average_rating(&mut self, book_id: Uuid) -> AppResult<f64> {
        ReviewsRepository::average_rating(&mut *self.tx, book_id).await
    }

    async fn set_rating(&mut self, book_id: Uuid, rating: f64) -> AppResult<()> {
        BooksRepository::set_rating(&mut *self.tx, book_id, rating).await
    }

    async fn reviewed_books(&mut self, user_id: Uuid) -> AppResult<Vec<Uuid>> {
        ReviewsRepository::book_ids_for_user(&mut *self.tx, user_id).await
    }

    async fn delete_user(&mut self, user_id: Uuid) -> AppResult<()> {
        UsersRepository::delete(&mut *self.tx, user_id).await
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
