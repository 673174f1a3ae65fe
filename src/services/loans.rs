//! Loan management service
//!
//! Owns the loan records and every write to `Book.stock`. Borrow and return
//! run inside one store transaction that locks the book row (and, for a
//! borrow, the user row first), so concurrent borrows of the same book are
//! serialized and stock can never be oversold.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    clock::Clock,
    config::LoansConfig,
    error::{AppError, AppResult},
    models::loan::{Loan, LoanDetails},
    repository::LibraryStore,
};

#[derive(Clone)]
pub struct LoansService {
    store: Arc<dyn LibraryStore>,
    clock: Arc<dyn Clock>,
    config: LoansConfig,
}

impl LoansService {
    pub fn new(store: Arc<dyn LibraryStore>, clock: Arc<dyn Clock>, config: LoansConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Borrow a book
    ///
    /// Checks, in order: book exists (`NotFound`), stock left (`OutOfStock`),
    /// user below the active-loan limit (`LoanLimitExceeded`), no active loan
    /// for this book already (`Conflict`). On success the loan is inserted and
    /// the stock decremented in the same transaction.
    pub async fn borrow_book(
        &self,
        user_id: Uuid,
        book_id: Uuid,
        due_date: DateTime<Utc>,
    ) -> AppResult<Loan> {
        let now = self.clock.now();

        if self.config.require_future_due_date && due_date <= now {
            return Err(AppError::Validation(
                "Due date must be after the borrow date".to_string(),
            ));
        }

        let mut tx = self.store.begin().await?;

        let user_exists = tx.lock_user(user_id).await?;

        let book = tx
            .lock_book(book_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Book not found".to_string()))?;

        if !book.is_available() {
            return Err(AppError::OutOfStock("Book out of stock".to_string()));
        }

        let active_loans = tx.count_active_loans(user_id).await?;
        if active_loans >= self.config.max_active_loans {
            return Err(AppError::LoanLimitExceeded(format!(
                "You cannot borrow more than {} books at a time",
                self.config.max_active_loans
            )));
        }

        if tx.find_active_loan(user_id, book_id).await?.is_some() {
            return Err(AppError::Conflict("Book already borrowed".to_string()));
        }

        if !user_exists {
            return Err(AppError::NotFound("User not found".to_string()));
        }

        let loan = Loan {
            id: Uuid::new_v4(),
            book_id,
            user_id,
            borrowed_at: now,
            due_date,
            returned_at: None,
            is_overdue_notified: false,
        };

        tx.insert_loan(&loan).await?;
        let stock = tx.adjust_stock(book_id, -1).await?;
        tx.commit().await?;

        tracing::info!(
            loan_id = %loan.id,
            %user_id,
            %book_id,
            stock,
            "Book borrowed"
        );

        Ok(loan)
    }

    /// Return a borrowed book
    ///
    /// Fails with `Conflict` when the user has no active loan for the book.
    /// Marks the loan returned and increments stock in one transaction.
    pub async fn return_book(&self, user_id: Uuid, book_id: Uuid) -> AppResult<Loan> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;

        // Serializes with concurrent borrows of the same book
        tx.lock_book(book_id).await?;

        let active = tx
            .find_active_loan(user_id, book_id)
            .await?
            .ok_or_else(|| AppError::Conflict("No active loan found for this book".to_string()))?;

        let loan = tx.mark_returned(active.id, now).await?;
        let stock = tx.adjust_stock(book_id, 1).await?;
        tx.commit().await?;

        tracing::info!(
            loan_id = %loan.id,
            %user_id,
            %book_id,
            stock,
            "Book returned"
        );

        Ok(loan)
    }

    /// Get all loans of a user with their book, newest first
    ///
    /// Loans whose book row no longer exists are left out and counted in a
    /// warning.
    pub async fn get_user_loans(&self, user_id: Uuid) -> AppResult<Vec<LoanDetails>> {
        let now = self.clock.now();
        let loans = self.store.list_user_loans(user_id).await?;
        let total = loans.len();

        let details: Vec<LoanDetails> = loans
            .into_iter()
            .filter_map(|entry| {
                entry.book.map(|book| LoanDetails {
                    is_overdue: entry.loan.is_overdue(now),
                    loan: entry.loan,
                    book,
                })
            })
            .collect();

        let dropped = total - details.len();
        if dropped > 0 {
            tracing::warn!(%user_id, dropped, "Skipping loans that reference missing books");
        }

        Ok(details)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::FixedClock,
        models::{Book, Role, User},
        repository::MemoryStore,
    };
    use chrono::{Duration, TimeZone};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap()
    }

    async fn setup() -> (LoansService, MemoryStore, FixedClock) {
        let store = MemoryStore::new();
        let clock = FixedClock::new(start());
        let service = LoansService::new(
            Arc::new(store.clone()),
            Arc::new(clock.clone()),
            LoansConfig::default(),
        );
        (service, store, clock)
    }

    async fn add_user(store: &MemoryStore) -> Uuid {
        let user = User {
            id: Uuid::new_v4(),
            name: "Reader".to_string(),
            email: format!("{}@example.com", Uuid::new_v4()),
            password: "hash".to_string(),
            phone: "0800".to_string(),
            role: Role::User,
            is_verified: true,
            profile_picture_id: None,
            created_at: start(),
            updated_at: start(),
        };
        store.insert_user(&user).await.unwrap();
        user.id
    }

    async fn add_book(store: &MemoryStore, stock: i32) -> Uuid {
        let book = Book {
            id: Uuid::new_v4(),
            title: "Neuromancer".to_string(),
            author: "William Gibson".to_string(),
            publisher: "Ace".to_string(),
            description: None,
            published_year: 1984,
            stock,
            rating: 0.0,
            cover_image: None,
            file_url: None,
            created_at: start(),
            updated_at: start(),
        };
        store.insert_book(&book).await.unwrap();
        book.id
    }

    async fn stock(store: &MemoryStore, book_id: Uuid) -> i32 {
        store.get_book(book_id).await.unwrap().unwrap().stock
    }

    fn due() -> DateTime<Utc> {
        start() + Duration::days(14)
    }

    #[tokio::test]
    async fn test_borrow_decrements_stock() {
        let (service, store, _) = setup().await;
        let user = add_user(&store).await;
        let book = add_book(&store, 2).await;

        let loan = service.borrow_book(user, book, due()).await.unwrap();

        assert_eq!(loan.borrowed_at, start());
        assert!(loan.is_active());
        assert!(!loan.is_overdue_notified);
        assert_eq!(stock(&store, book).await, 1);
    }

    #[tokio::test]
    async fn test_borrow_unknown_book() {
        let (service, store, _) = setup().await;
        let user = add_user(&store).await;

        let err = service.borrow_book(user, Uuid::new_v4(), due()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_borrow_out_of_stock_leaves_state_untouched() {
        let (service, store, _) = setup().await;
        let user = add_user(&store).await;
        let book = add_book(&store, 0).await;

        let err = service.borrow_book(user, book, due()).await.unwrap_err();

        assert!(matches!(err, AppError::OutOfStock(_)));
        assert_eq!(stock(&store, book).await, 0);
        assert!(service.get_user_loans(user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_borrow_rejects_past_due_date() {
        let (service, store, _) = setup().await;
        let user = add_user(&store).await;
        let book = add_book(&store, 1).await;

        let err = service
            .borrow_book(user, book, start() - Duration::days(1))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(stock(&store, book).await, 1);
    }

    #[tokio::test]
    async fn test_past_due_date_allowed_when_check_disabled() {
        let store = MemoryStore::new();
        let service = LoansService::new(
            Arc::new(store.clone()),
            Arc::new(FixedClock::new(start())),
            LoansConfig {
                require_future_due_date: false,
                ..LoansConfig::default()
            },
        );
        let user = add_user(&store).await;
        let book = add_book(&store, 1).await;

        assert!(service
            .borrow_book(user, book, start() - Duration::days(1))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_loan_limit_and_release_on_return() {
        let (service, store, _) = setup().await;
        let user = add_user(&store).await;

        let mut books = Vec::new();
        for _ in 0..5 {
            let book = add_book(&store, 1).await;
            service.borrow_book(user, book, due()).await.unwrap();
            books.push(book);
        }

        let sixth = add_book(&store, 1).await;
        let err = service.borrow_book(user, sixth, due()).await.unwrap_err();
        assert!(matches!(err, AppError::LoanLimitExceeded(_)));
        assert_eq!(stock(&store, sixth).await, 1);

        service.return_book(user, books[0]).await.unwrap();
        assert!(service.borrow_book(user, sixth, due()).await.is_ok());
    }

    #[tokio::test]
    async fn test_double_borrow_conflicts() {
        let (service, store, _) = setup().await;
        let user = add_user(&store).await;
        let book = add_book(&store, 3).await;

        service.borrow_book(user, book, due()).await.unwrap();
        let err = service.borrow_book(user, book, due()).await.unwrap_err();

        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(stock(&store, book).await, 2);
    }

    #[tokio::test]
    async fn test_borrow_unknown_user() {
        let (service, store, _) = setup().await;
        let book = add_book(&store, 1).await;

        let err = service.borrow_book(Uuid::new_v4(), book, due()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(stock(&store, book).await, 1);
    }

    #[tokio::test]
    async fn test_return_restores_stock() {
        let (service, store, clock) = setup().await;
        let user = add_user(&store).await;
        let book = add_book(&store, 1).await;

        service.borrow_book(user, book, due()).await.unwrap();
        assert_eq!(stock(&store, book).await, 0);

        clock.advance(Duration::days(3));
        let loan = service.return_book(user, book).await.unwrap();

        assert_eq!(loan.returned_at, Some(start() + Duration::days(3)));
        assert_eq!(stock(&store, book).await, 1);
    }

    #[tokio::test]
    async fn test_return_without_active_loan_conflicts() {
        let (service, store, _) = setup().await;
        let user = add_user(&store).await;
        let book = add_book(&store, 1).await;

        let err = service.return_book(user, book).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(stock(&store, book).await, 1);

        service.borrow_book(user, book, due()).await.unwrap();
        service.return_book(user, book).await.unwrap();
        let err = service.return_book(user, book).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(stock(&store, book).await, 1);
    }

    #[tokio::test]
    async fn test_borrow_again_after_return() {
        let (service, store, clock) = setup().await;
        let user = add_user(&store).await;
        let book = add_book(&store, 1).await;

        service.borrow_book(user, book, due()).await.unwrap();
        service.return_book(user, book).await.unwrap();
        clock.advance(Duration::hours(1));
        service.borrow_book(user, book, due()).await.unwrap();

        let loans = service.get_user_loans(user).await.unwrap();
        assert_eq!(loans.len(), 2);
        // Newest first
        assert!(loans[0].loan.is_active());
        assert!(!loans[1].loan.is_active());
        assert_eq!(stock(&store, book).await, 0);
    }

    #[tokio::test]
    async fn test_user_loans_flag_overdue() {
        let (service, store, clock) = setup().await;
        let user = add_user(&store).await;
        let book = add_book(&store, 1).await;

        service.borrow_book(user, book, due()).await.unwrap();
        assert!(!service.get_user_loans(user).await.unwrap()[0].is_overdue);

        clock.advance(Duration::days(15));
        assert!(service.get_user_loans(user).await.unwrap()[0].is_overdue);
    }

    #[tokio::test]
    async fn test_user_loans_skip_deleted_books() {
        let (service, store, _) = setup().await;
        let user = add_user(&store).await;
        let kept = add_book(&store, 1).await;
        let removed = add_book(&store, 1).await;

        service.borrow_book(user, kept, due()).await.unwrap();
        service.borrow_book(user, removed, due()).await.unwrap();
        service.return_book(user, removed).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.delete_book(removed).await.unwrap();
        tx.commit().await.unwrap();

        let loans = service.get_user_loans(user).await.unwrap();
        assert_eq!(loans.len(), 1);
        assert_eq!(loans[0].book.id, kept);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_borrows_of_last_copy() {
        let (service, store, _) = setup().await;
        let book = add_book(&store, 1).await;
        let first = add_user(&store).await;
        let second = add_user(&store).await;

        let a = {
            let service = service.clone();
            tokio::spawn(async move { service.borrow_book(first, book, due()).await })
        };
        let b = {
            let service = service.clone();
            tokio::spawn(async move { service.borrow_book(second, book, due()).await })
        };

        let results = [a.await.unwrap(), b.await.unwrap()];
        let successes = results.iter().filter(|r| r.is_ok()).count();
        let rejected = results
            .iter()
            .filter(|r| matches!(r, Err(AppError::OutOfStock(_)) | Err(AppError::Conflict(_))))
            .count();

        assert_eq!(successes, 1);
        assert_eq!(rejected, 1);
        assert_eq!(stock(&store, book).await, 0);
    }
}
