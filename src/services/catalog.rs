//! Catalog management service

use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::{
    clock::Clock,
    error::{AppError, AppResult},
    models::book::{Book, CreateBook, UpdateBook},
    repository::LibraryStore,
};

#[derive(Clone)]
pub struct CatalogService {
    store: Arc<dyn LibraryStore>,
    clock: Arc<dyn Clock>,
}

impl CatalogService {
    pub fn new(store: Arc<dyn LibraryStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Create a new book; stock defaults to one copy and rating starts at 0
    pub async fn create_book(&self, data: CreateBook) -> AppResult<Book> {
        data.validate()?;

        let now = self.clock.now();
        let book = Book {
            id: Uuid::new_v4(),
            title: data.title,
            author: data.author,
            publisher: data.publisher,
            description: data.description,
            published_year: data.published_year,
            stock: data.stock.unwrap_or(1),
            rating: 0.0,
            cover_image: data.cover_image,
            file_url: data.file_url,
            created_at: now,
            updated_at: now,
        };

        self.store.insert_book(&book).await?;
        tracing::info!(book_id = %book.id, title = %book.title, stock = book.stock, "Book created");

        Ok(book)
    }

    pub async fn list_books(&self) -> AppResult<Vec<Book>> {
        self.store.list_books().await
    }

    pub async fn get_book(&self, id: Uuid) -> AppResult<Book> {
        self.store
            .get_book(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Book not found".to_string()))
    }

    /// Update catalog fields of a book
    pub async fn update_book(&self, id: Uuid, changes: UpdateBook) -> AppResult<Book> {
        changes.validate()?;

        self.store
            .update_book(id, &changes, self.clock.now())
            .await?
            .ok_or_else(|| AppError::NotFound("Book not found".to_string()))
    }

    /// Delete a book, refused while any copy is on loan
    pub async fn delete_book(&self, id: Uuid) -> AppResult<()> {
        let mut tx = self.store.begin().await?;

        tx.lock_book(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Book not found".to_string()))?;

        let active = tx.count_active_loans_for_book(id).await?;
        if active > 0 {
            return Err(AppError::Conflict(format!(
                "Book has {} active loan(s) and cannot be deleted",
                active
            )));
        }

        tx.delete_book(id).await?;
        tx.commit().await?;

        tracing::info!(book_id = %id, "Book deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::FixedClock,
        models::{Loan, Role, User},
        repository::MemoryStore,
    };
    use chrono::{Duration, TimeZone, Utc};

    fn setup() -> (CatalogService, MemoryStore, FixedClock) {
        let store = MemoryStore::new();
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2025, 2, 3, 9, 0, 0).unwrap());
        let service = CatalogService::new(Arc::new(store.clone()), Arc::new(clock.clone()));
        (service, store, clock)
    }

    fn new_book(stock: Option<i32>) -> CreateBook {
        CreateBook {
            title: "Neuromancer".to_string(),
            author: "William Gibson".to_string(),
            publisher: "Ace".to_string(),
            description: Some("Cyberspace".to_string()),
            published_year: 1984,
            stock,
            cover_image: None,
            file_url: None,
        }
    }

    #[tokio::test]
    async fn test_create_defaults() {
        let (service, _, _) = setup();

        let book = service.create_book(new_book(None)).await.unwrap();
        assert_eq!(book.stock, 1);
        assert_eq!(book.rating, 0.0);
        assert_eq!(service.get_book(book.id).await.unwrap(), book);

        let stocked = service.create_book(new_book(Some(7))).await.unwrap();
        assert_eq!(stocked.stock, 7);
        assert_eq!(service.list_books().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_input() {
        let (service, _, _) = setup();

        let mut data = new_book(Some(-2));
        assert!(matches!(
            service.create_book(data.clone()).await,
            Err(AppError::Validation(_))
        ));

        data.stock = None;
        data.title = String::new();
        assert!(matches!(
            service.create_book(data).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_update_keeps_stock_and_rating() {
        let (service, _, clock) = setup();
        let book = service.create_book(new_book(Some(3))).await.unwrap();

        clock.advance(Duration::minutes(5));
        let updated = service
            .update_book(
                book.id,
                UpdateBook {
                    title: Some("Count Zero".to_string()),
                    published_year: Some(1986),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.title, "Count Zero");
        assert_eq!(updated.published_year, 1986);
        assert_eq!(updated.author, book.author);
        assert_eq!(updated.stock, 3);
        assert_eq!(updated.updated_at, book.updated_at + Duration::minutes(5));

        let err = service
            .update_book(Uuid::new_v4(), UpdateBook::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_refused_while_on_loan() {
        let (service, store, clock) = setup();
        let book = service.create_book(new_book(Some(2))).await.unwrap();
        let now = clock.now();
        let user = User {
            id: Uuid::new_v4(),
            name: "Case".to_string(),
            email: "case@example.com".to_string(),
            password: String::new(),
            phone: "0600000000".to_string(),
            role: Role::User,
            is_verified: true,
            profile_picture_id: None,
            created_at: now,
            updated_at: now,
        };
        store.insert_user(&user).await.unwrap();

        let loan = Loan {
            id: Uuid::new_v4(),
            book_id: book.id,
            user_id: user.id,
            borrowed_at: now,
            due_date: now + Duration::days(14),
            returned_at: None,
            is_overdue_notified: false,
        };
        let mut tx = store.begin().await.unwrap();
        tx.insert_loan(&loan).await.unwrap();
        tx.commit().await.unwrap();

        let err = service.delete_book(book.id).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert!(store.get_book(book.id).await.unwrap().is_some());

        let mut tx = store.begin().await.unwrap();
        tx.mark_returned(loan.id, now + Duration::days(1)).await.unwrap();
        tx.commit().await.unwrap();

        service.delete_book(book.id).await.unwrap();
        assert!(matches!(
            service.get_book(book.id).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            service.delete_book(book.id).await,
            Err(AppError::NotFound(_))
        ));
    }
}
