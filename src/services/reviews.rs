//! Review service
//!
//! Sole writer of `Book.rating`: every insert or delete of a review
//! recomputes the mean in the same transaction, under the book row lock.

use std::sync::Arc;
use uuid::Uuid;

use crate::{
    clock::Clock,
    error::{AppError, AppResult},
    models::review::{Review, MAX_RATING, MIN_RATING},
    repository::{LibraryStore, LibraryTx},
};

#[derive(Clone)]
pub struct ReviewsService {
    store: Arc<dyn LibraryStore>,
    clock: Arc<dyn Clock>,
}

impl ReviewsService {
    pub fn new(store: Arc<dyn LibraryStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Add a review and refresh the book's rating
    pub async fn add_review(
        &self,
        user_id: Uuid,
        book_id: Uuid,
        rating: i16,
        comment: Option<String>,
    ) -> AppResult<Review> {
        if !(MIN_RATING..=MAX_RATING).contains(&rating) {
            return Err(AppError::Validation(format!(
                "Rating must be between {} and {}",
                MIN_RATING, MAX_RATING
            )));
        }

        let mut tx = self.store.begin().await?;

        tx.lock_book(book_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Book not found".to_string()))?;

        if tx.find_review(user_id, book_id).await?.is_some() {
            return Err(AppError::Conflict(
                "You have already reviewed this book".to_string(),
            ));
        }

        let review = Review {
            id: Uuid::new_v4(),
            user_id,
            book_id,
            rating,
            comment,
            created_at: self.clock.now(),
        };

        tx.insert_review(&review).await?;
        let average = Self::refresh_rating(tx.as_mut(), book_id).await?;
        tx.commit().await?;

        tracing::info!(review_id = %review.id, %user_id, %book_id, average, "Review added");

        Ok(review)
    }

    /// Delete a review (author or admin) and refresh the book's rating
    pub async fn delete_review(&self, user_id: Uuid, review_id: Uuid, is_admin: bool) -> AppResult<()> {
        let review = self
            .store
            .get_review(review_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Review not found".to_string()))?;

        if review.user_id != user_id && !is_admin {
            return Err(AppError::Forbidden(
                "You are not allowed to delete this review".to_string(),
            ));
        }

        let mut tx = self.store.begin().await?;
        tx.lock_book(review.book_id).await?;

        if !tx.delete_review(review_id).await? {
            return Err(AppError::NotFound("Review not found".to_string()));
        }

        let average = Self::refresh_rating(tx.as_mut(), review.book_id).await?;
        tx.commit().await?;

        tracing::info!(%review_id, book_id = %review.book_id, %user_id, average, "Review deleted");

        Ok(())
    }

    /// Recompute a book's rating from its current reviews
    ///
    /// The book row must already be locked by `tx`.
    pub(crate) async fn refresh_rating(tx: &mut dyn LibraryTx, book_id: Uuid) -> AppResult<f64> {
        let average = tx.average_rating(book_id).await?;
        tx.set_rating(book_id, average).await?;
        Ok(average)
    }

    /// Reviews of a book, newest first
    pub async fn list_book_reviews(&self, book_id: Uuid) -> AppResult<Vec<Review>> {
        if self.store.get_book(book_id).await?.is_none() {
            return Err(AppError::NotFound("Book not found".to_string()));
        }
        self.store.list_book_reviews(book_id).await
    }

    /// All reviews, newest first
    pub async fn list_reviews(&self) -> AppResult<Vec<Review>> {
        self.store.list_reviews().await
    }
}
