//! Reviews repository for database operations

use sqlx::{PgConnection, Pool, Postgres};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::review::Review,
};

#[derive(Clone)]
pub struct ReviewsRepository {
    pool: Pool<Postgres>,
}

impl ReviewsRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub async fn get_by_id(&self, id: Uuid) -> AppResult<Option<Review>> {
        let review = sqlx::query_as::<_, Review>("SELECT * FROM reviews WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(review)
    }

    pub async fn list_for_book(&self, book_id: Uuid) -> AppResult<Vec<Review>> {
        let reviews = sqlx::query_as::<_, Review>(
            "SELECT * FROM reviews WHERE book_id = $1 ORDER BY created_at DESC",
        )
        .bind(book_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(reviews)
    }

    pub async fn list(&self) -> AppResult<Vec<Review>> {
        let reviews = sqlx::query_as::<_, Review>("SELECT * FROM reviews ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?;
        Ok(reviews)
    }

    // ---- Transaction-scoped queries ----

    pub async fn find_by_user_and_book(
        conn: &mut PgConnection,
        user_id: Uuid,
        book_id: Uuid,
    ) -> AppResult<Option<Review>> {
        let review = sqlx::query_as::<_, Review>(
            "SELECT * FROM reviews WHERE user_id = $1 AND book_id = $2",
        )
        .bind(user_id)
        .bind(book_id)
        .fetch_optional(conn)
        .await?;
        Ok(review)
    }

    pub async fn insert(conn: &mut PgConnection, review: &Review) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO reviews (id, user_id, book_id, rating, comment, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(review.id)
        .bind(review.user_id)
        .bind(review.book_id)
        .bind(review.rating)
        .bind(&review.comment)
        .bind(review.created_at)
        .execute(conn)
        .await
        .map_err(|e| {
            AppError::from(e).on_unique_violation("You have already reviewed this book")
        })?;

        Ok(())
    }

    pub async fn delete(conn: &mut PgConnection, id: Uuid) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM reviews WHERE id = $1")
            .bind(id)
            .execute(conn)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn average_rating(conn: &mut PgConnection, book_id: Uuid) -> AppResult<f64> {
        let avg: f64 = sqlx::query_scalar(
            "SELECT COALESCE(AVG(rating)::float8, 0) FROM reviews WHERE book_id = $1",
        )
        .bind(book_id)
        .fetch_one(conn)
        .await?;
        Ok(avg)
    }

    pub async fn book_ids_for_user(conn: &mut PgConnection, user_id: Uuid) -> AppResult<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT book_id FROM reviews WHERE user_id = $1 ORDER BY book_id",
        )
        .bind(user_id)
        .fetch_all(conn)
        .await?;
        Ok(ids)
    }
}
