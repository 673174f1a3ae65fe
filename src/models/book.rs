//! Book model and related types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Book model from database
///
/// `stock` is only written by the loan ledger and `rating` only by the
/// review aggregator; catalog updates never touch either.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Book {
    pub id: Uuid,
    pub title: String,
    pub author: String,
    pub publisher: String,
    pub description: Option<String>,
    pub published_year: i32,
    /// Copies currently available to borrow
    pub stock: i32,
    /// Mean review rating, 0 when the book has no reviews
    pub rating: f64,
    pub cover_image: Option<String>,
    pub file_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Book {
    pub fn is_available(&self) -> bool {
        self.stock > 0
    }
}

/// Create book request
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateBook {
    #[validate(length(min = 1, message = "Title is required"))]
    pub title: String,
    #[validate(length(min = 1, message = "Author is required"))]
    pub author: String,
    #[validate(length(min = 1, message = "Publisher is required"))]
    pub publisher: String,
    pub description: Option<String>,
    pub published_year: i32,
    /// Initial number of copies (defaults to 1)
    #[validate(range(min = 0, message = "Stock cannot be negative"))]
    pub stock: Option<i32>,
    pub cover_image: Option<String>,
    pub file_url: Option<String>,
}

/// Update book request (partial)
#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateBook {
    #[validate(length(min = 1, message = "Title cannot be empty"))]
    pub title: Option<String>,
    #[validate(length(min = 1, message = "Author cannot be empty"))]
    pub author: Option<String>,
    #[validate(length(min = 1, message = "Publisher cannot be empty"))]
    pub publisher: Option<String>,
    pub description: Option<String>,
    pub published_year: Option<i32>,
    pub cover_image: Option<String>,
    pub file_url: Option<String>,
}

impl UpdateBook {
    /// Apply the provided fields onto an existing book
    pub fn apply(&self, book: &mut Book, now: DateTime<Utc>) {
        if let Some(ref title) = self.title {
            book.title = title.clone();
        }
        if let Some(ref author) = self.author {
            book.author = author.clone();
        }
        if let Some(ref publisher) = self.publisher {
            book.publisher = publisher.clone();
        }
        if self.description.is_some() {
            book.description = self.description.clone();
        }
        if let Some(year) = self.published_year {
            book.published_year = year;
        }
        if self.cover_image.is_some() {
            book.cover_image = self.cover_image.clone();
        }
        if self.file_url.is_some() {
            book.file_url = self.file_url.clone();
        }
        book.updated_at = now;
    }
}
