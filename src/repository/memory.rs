//! In-process store
//!
//! Mirrors the constraints of the PostgreSQL schema (non-negative stock,
//! one active loan per user and book, one review per user and book, unique
//! email). A transaction holds the single store lock for its whole life and
//! writes into a copy of the state that replaces the original on commit, so
//! transactions are serialized and dropping one rolls it back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{LibraryStore, LibraryTx};
use crate::{
    error::{AppError, AppResult},
    models::{
        book::UpdateBook,
        loan::{LoanWithBook, OverdueLoan},
        review::mean_rating,
        user::PasswordResetToken,
        Book, Loan, Review, User,
    },
};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    users: HashMap<Uuid, User>,
    books: HashMap<Uuid, Book>,
    loans: HashMap<Uuid, Loan>,
    reviews: HashMap<Uuid, Review>,
    reset_tokens: HashMap<Uuid, PasswordResetToken>,
}

impl MemoryState {
    fn book_mut(&mut self, id: Uuid) -> AppResult<&mut Book> {
        self.books
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", id)))
    }
}

/// Store kept entirely in memory
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LibraryStore for MemoryStore {
    async fn begin(&self) -> AppResult<Box<dyn LibraryTx>> {
        let guard = self.state.clone().lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(MemoryTx { guard, work }))
    }

    async fn insert_book(&self, book: &Book) -> AppResult<()> {
        let mut state = self.state.lock().await;
        if book.stock < 0 {
            return Err(AppError::Validation("Stock cannot be negative".to_string()));
        }
        state.books.insert(book.id, book.clone());
        Ok(())
    }

    async fn get_book(&self, id: Uuid) -> AppResult<Option<Book>> {
        Ok(self.state.lock().await.books.get(&id).cloned())
    }

    async fn list_books(&self) -> AppResult<Vec<Book>> {
        let state = self.state.lock().await;
        let mut books: Vec<Book> = state.books.values().cloned().collect();
        books.sort_by(|a, b| a.title.cmp(&b.title).then(a.id.cmp(&b.id)));
        Ok(books)
    }

    async fn update_book(
        &self,
        id: Uuid,
        changes: &UpdateBook,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Book>> {
        let mut state = self.state.lock().await;
        Ok(state.books.get_mut(&id).map(|book| {
            changes.apply(book, now);
            book.clone()
        }))
    }

    async fn list_user_loans(&self, user_id: Uuid) -> AppResult<Vec<LoanWithBook>> {
        let state = self.state.lock().await;
        let mut loans: Vec<LoanWithBook> = state
            .loans
            .values()
            .filter(|loan| loan.user_id == user_id)
            .map(|loan| LoanWithBook {
                loan: loan.clone(),
                book: state.books.get(&loan.book_id).cloned(),
            })
            .collect();
        loans.sort_by(|a, b| {
            b.loan
                .borrowed_at
                .cmp(&a.loan.borrowed_at)
                .then(a.loan.id.cmp(&b.loan.id))
        });
        Ok(loans)
    }

    async fn find_overdue_loans(&self, now: DateTime<Utc>) -> AppResult<Vec<OverdueLoan>> {
        let state = self.state.lock().await;
        let mut overdue: Vec<OverdueLoan> = state
            .loans
            .values()
            .filter(|loan| loan.is_overdue(now) && !loan.is_overdue_notified)
            .filter_map(|loan| {
                let user = state.users.get(&loan.user_id)?;
                let book = state.books.get(&loan.book_id)?;
                Some(OverdueLoan {
                    loan_id: loan.id,
                    user_id: user.id,
                    user_name: user.name.clone(),
                    user_email: user.email.clone(),
                    book_title: book.title.clone(),
                    due_date: loan.due_date,
                })
            })
            .collect();
        overdue.sort_by_key(|loan| loan.due_date);
        Ok(overdue)
    }

    async fn mark_overdue_notified(&self, loan_id: Uuid) -> AppResult<bool> {
        let mut state = self.state.lock().await;
        match state.loans.get_mut(&loan_id) {
            Some(loan) if !loan.is_overdue_notified => {
                loan.is_overdue_notified = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_review(&self, id: Uuid) -> AppResult<Option<Review>> {
        Ok(self.state.lock().await.reviews.get(&id).cloned())
    }

    async fn list_book_reviews(&self, book_id: Uuid) -> AppResult<Vec<Review>> {
        let state = self.state.lock().await;
        let mut reviews: Vec<Review> = state
            .reviews
            .values()
            .filter(|review| review.book_id == book_id)
            .cloned()
            .collect();
        reviews.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(reviews)
    }

    async fn list_reviews(&self) -> AppResult<Vec<Review>> {
        let state = self.state.lock().await;
        let mut reviews: Vec<Review> = state.reviews.values().cloned().collect();
        reviews.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(reviews)
    }

    async fn insert_user(&self, user: &User) -> AppResult<()> {
        let mut state = self.state.lock().await;
        if state.users.values().any(|u| u.email == user.email) {
            return Err(AppError::Conflict("Email already registered".to_string()));
        }
        state.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> AppResult<Option<User>> {
        Ok(self.state.lock().await.users.get(&id).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let state = self.state.lock().await;
        Ok(state.users.values().find(|u| u.email == email).cloned())
    }

    async fn list_users(&self) -> AppResult<Vec<User>> {
        let state = self.state.lock().await;
        let mut users: Vec<User> = state.users.values().cloned().collect();
        users.sort_by_key(|u| u.created_at);
        Ok(users)
    }

    async fn update_user(&self, user: &User) -> AppResult<()> {
        let mut state = self.state.lock().await;
        let stored = state
            .users
            .get_mut(&user.id)
            .ok_or_else(|| AppError::NotFound(format!("User with id {} not found", user.id)))?;
        stored.name = user.name.clone();
        stored.phone = user.phone.clone();
        stored.password = user.password.clone();
        stored.role = user.role;
        stored.is_verified = user.is_verified;
        stored.updated_at = user.updated_at;
        Ok(())
    }

    async fn upsert_reset_token(&self, token: &PasswordResetToken) -> AppResult<()> {
        let mut state = self.state.lock().await;
        state.reset_tokens.insert(token.user_id, token.clone());
        Ok(())
    }

    async fn get_reset_token(&self, token: &str) -> AppResult<Option<PasswordResetToken>> {
        let state = self.state.lock().await;
        Ok(state.reset_tokens.values().find(|t| t.token == token).cloned())
    }

    async fn delete_reset_token(&self, token: &str) -> AppResult<()> {
        let mut state = self.state.lock().await;
        state.reset_tokens.retain(|_, t| t.token != token);
        Ok(())
    }
}

/// Transaction over [`MemoryStore`]
pub struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    work: MemoryState,
}

#[async_trait]
impl LibraryTx for MemoryTx {
    async fn lock_user(&mut self, user_id: Uuid) -> AppResult<bool> {
        Ok(self.work.users.contains_key(&user_id))
    }

    async fn lock_book(&mut self, book_id: Uuid) -> AppResult<Option<Book>> {
        Ok(self.work.books.get(&book_id).cloned())
    }

    async fn count_active_loans(&mut self, user_id: Uuid) -> AppResult<i64> {
        let count = self
            .work
            .loans
            .values()
            .filter(|loan| loan.user_id == user_id && loan.is_active())
            .count();
        Ok(count as i64)
    }

    async fn count_active_loans_for_book(&mut self, book_id: Uuid) -> AppResult<i64> {
        let count = self
            .work
            .loans
            .values()
            .filter(|loan| loan.book_id == book_id && loan.is_active())
            .count();
        Ok(count as i64)
    }

    async fn find_active_loan(&mut self, user_id: Uuid, book_id: Uuid) -> AppResult<Option<Loan>> {
        Ok(self
            .work
            .loans
            .values()
            .find(|loan| loan.user_id == user_id && loan.book_id == book_id && loan.is_active())
            .cloned())
    }

    async fn insert_loan(&mut self, loan: &Loan) -> AppResult<()> {
        if loan.is_active() {
            let duplicate = self.work.loans.values().any(|other| {
                other.user_id == loan.user_id && other.book_id == loan.book_id && other.is_active()
            });
            if duplicate {
                return Err(AppError::Conflict("Book already borrowed".to_string()));
            }
        }
        self.work.loans.insert(loan.id, loan.clone());
        Ok(())
    }

    async fn mark_returned(&mut self, loan_id: Uuid, at: DateTime<Utc>) -> AppResult<Loan> {
        match self.work.loans.get_mut(&loan_id) {
            Some(loan) if loan.is_active() => {
                loan.returned_at = Some(at);
                Ok(loan.clone())
            }
            _ => Err(AppError::Conflict("No active loan found for this book".to_string())),
        }
    }

    async fn adjust_stock(&mut self, book_id: Uuid, delta: i32) -> AppResult<i32> {
        let book = self.work.book_mut(book_id)?;
        let stock = book.stock + delta;
        if stock < 0 {
            return Err(AppError::Internal(format!(
                "Stock of book {} would become negative",
                book_id
            )));
        }
        book.stock = stock;
        Ok(stock)
    }

    async fn delete_book(&mut self, book_id: Uuid) -> AppResult<()> {
        self.work.books.remove(&book_id);
        self.work.reviews.retain(|_, review| review.book_id != book_id);
        Ok(())
    }

    async fn find_review(&mut self, user_id: Uuid, book_id: Uuid) -> AppResult<Option<Review>> {
        Ok(self
            .work
            .reviews
            .values()
            .find(|review| review.user_id == user_id && review.book_id == book_id)
            .cloned())
    }

    async fn insert_review(&mut self, review: &Review) -> AppResult<()> {
        let duplicate = self
            .work
            .reviews
            .values()
            .any(|other| other.user_id == review.user_id && other.book_id == review.book_id);
        if duplicate {
            return Err(AppError::Conflict(
                "You have already reviewed this book".to_string(),
            ));
        }
        self.work.reviews.insert(review.id, review.clone());
        Ok(())
    }

    async fn delete_review(&mut self, review_id: Uuid) -> AppResult<bool> {
        Ok(self.work.reviews.remove(&review_id).is_some())
    }

    async fn average_rating(&mut self, book_id: Uuid) -> AppResult<f64> {
        let ratings: Vec<i16> = self
            .work
            .reviews
            .values()
            .filter(|review| review.book_id == book_id)
            .map(|review| review.rating)
            .collect();
        Ok(mean_rating(&ratings))
    }

    async fn set_rating(&mut self, book_id: Uuid, rating: f64) -> AppResult<()> {
        self.work.book_mut(book_id)?.rating = rating;
        Ok(())
    }

    async fn reviewed_books(&mut self, user_id: Uuid) -> AppResult<Vec<Uuid>> {
        let mut ids: Vec<Uuid> = self
            .work
            .reviews
            .values()
            .filter(|review| review.user_id == user_id)
            .map(|review| review.book_id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn delete_user(&mut self, user_id: Uuid) -> AppResult<()> {
        self.work.users.remove(&user_id);
        self.work.reviews.retain(|_, review| review.user_id != user_id);
        self.work.reset_tokens.remove(&user_id);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let MemoryTx { mut guard, work } = *self;
        *guard = work;
        Ok(())
    }
}
