//! Books repository for database operations

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, Pool, Postgres};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::book::{Book, UpdateBook},
};

#[derive(Clone)]
pub struct BooksRepository {
    pool: Pool<Postgres>,
}

impl BooksRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Insert a new book
    pub async fn insert(&self, book: &Book) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO books (
                id, title, author, publisher, description, published_year,
                stock, rating, cover_image, file_url, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(book.id)
        .bind(&book.title)
        .bind(&book.author)
        .bind(&book.publisher)
        .bind(&book.description)
        .bind(book.published_year)
        .bind(book.stock)
        .bind(book.rating)
        .bind(&book.cover_image)
        .bind(&book.file_url)
        .bind(book.created_at)
        .bind(book.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get book by ID
    pub async fn get_by_id(&self, id: Uuid) -> AppResult<Option<Book>> {
        let book = sqlx::query_as::<_, Book>("SELECT * FROM books WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(book)
    }

    /// List all books
    pub async fn list(&self) -> AppResult<Vec<Book>> {
        let books = sqlx::query_as::<_, Book>("SELECT * FROM books ORDER BY title, id")
            .fetch_all(&self.pool)
            .await?;
        Ok(books)
    }

    /// Update catalog fields of a book
    pub async fn update(
        &self,
        id: Uuid,
        changes: &UpdateBook,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Book>> {
        let book = sqlx::query_as::<_, Book>(
            r#"
            UPDATE books SET
                title = COALESCE($2, title),
                author = COALESCE($3, author),
                publisher = COALESCE($4, publisher),
                description = COALESCE($5, description),
                published_year = COALESCE($6, published_year),
                cover_image = COALESCE($7, cover_image),
                file_url = COALESCE($8, file_url),
                updated_at = $9
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&changes.title)
        .bind(&changes.author)
        .bind(&changes.publisher)
        .bind(&changes.description)
        .bind(changes.published_year)
        .bind(&changes.cover_image)
        .bind(&changes.file_url)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(book)
    }

    // ---- Transaction-scoped queries ----

    /// Read a book and hold its row lock until the transaction ends
    pub async fn lock(conn: &mut PgConnection, id: Uuid) -> AppResult<Option<Book>> {
        let book = sqlx::query_as::<_, Book>("SELECT * FROM books WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(conn)
            .await?;
        Ok(book)
    }

    pub async fn adjust_stock(conn: &mut PgConnection, id: Uuid, delta: i32) -> AppResult<i32> {
        sqlx::query_scalar::<_, i32>(
            "UPDATE books SET stock = stock + $2, updated_at = NOW() WHERE id = $1 RETURNING stock",
        )
        .bind(id)
        .bind(delta)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", id)))
    }

    pub async fn set_rating(conn: &mut PgConnection, id: Uuid, rating: f64) -> AppResult<()> {
        let result = sqlx::query("UPDATE books SET rating = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(rating)
            .execute(conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Book with id {} not found", id)));
        }
        Ok(())
    }

    pub async fn delete(conn: &mut PgConnection, id: Uuid) -> AppResult<()> {
        sqlx::query("DELETE FROM books WHERE id = $1")
            .bind(id)
            .execute(conn)
            .await?;
        Ok(())
    }
}
