//! Loans repository for database operations

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, Pool, Postgres, Row};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{
        book::Book,
        loan::{Loan, LoanWithBook, OverdueLoan},
    },
};

#[derive(Clone)]
pub struct LoansRepository {
    pool: Pool<Postgres>,
}

impl LoansRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Get loans for a user with their book, newest first
    pub async fn list_for_user(&self, user_id: Uuid) -> AppResult<Vec<LoanWithBook>> {
        let rows = sqlx::query(
            r#"
            SELECT l.id, l.book_id, l.user_id, l.borrowed_at, l.due_date,
                   l.returned_at, l.is_overdue_notified,
                   b.id AS b_id, b.title AS b_title, b.author AS b_author,
                   b.publisher AS b_publisher, b.description AS b_description,
                   b.published_year AS b_published_year, b.stock AS b_stock,
                   b.rating AS b_rating, b.cover_image AS b_cover_image,
                   b.file_url AS b_file_url, b.created_at AS b_created_at,
                   b.updated_at AS b_updated_at
            FROM loans l
            LEFT JOIN books b ON b.id = l.book_id
            WHERE l.user_id = $1
            ORDER BY l.borrowed_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut result = Vec::with_capacity(rows.len());
        for row in rows {
            let loan = Loan {
                id: row.try_get("id")?,
                book_id: row.try_get("book_id")?,
                user_id: row.try_get("user_id")?,
                borrowed_at: row.try_get("borrowed_at")?,
                due_date: row.try_get("due_date")?,
                returned_at: row.try_get("returned_at")?,
                is_overdue_notified: row.try_get("is_overdue_notified")?,
            };

            let book = match row.try_get::<Option<Uuid>, _>("b_id")? {
                Some(id) => Some(Book {
                    id,
                    title: row.try_get("b_title")?,
                    author: row.try_get("b_author")?,
                    publisher: row.try_get("b_publisher")?,
                    description: row.try_get("b_description")?,
                    published_year: row.try_get("b_published_year")?,
                    stock: row.try_get("b_stock")?,
                    rating: row.try_get("b_rating")?,
                    cover_image: row.try_get("b_cover_image")?,
                    file_url: row.try_get("b_file_url")?,
                    created_at: row.try_get("b_created_at")?,
                    updated_at: row.try_get("b_updated_at")?,
                }),
                None => None,
            };

            result.push(LoanWithBook { loan, book });
        }

        Ok(result)
    }

    /// Active loans past their due date that have not been notified yet
    pub async fn find_overdue(&self, now: DateTime<Utc>) -> AppResult<Vec<OverdueLoan>> {
        let loans = sqlx::query_as::<_, OverdueLoan>(
            r#"
            SELECT l.id AS loan_id, l.user_id, u.name AS user_name,
                   u.email AS user_email, b.title AS book_title, l.due_date
            FROM loans l
            JOIN users u ON u.id = l.user_id
            JOIN books b ON b.id = l.book_id
            WHERE l.due_date < $1
              AND l.returned_at IS NULL
              AND l.is_overdue_notified = FALSE
            ORDER BY l.due_date
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(loans)
    }

    /// Flag a loan as notified, unless another sweep already did
    pub async fn mark_overdue_notified(&self, loan_id: Uuid) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE loans SET is_overdue_notified = TRUE WHERE id = $1 AND is_overdue_notified = FALSE",
        )
        .bind(loan_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    // ---- Transaction-scoped queries ----

    pub async fn count_active(conn: &mut PgConnection, user_id: Uuid) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM loans WHERE user_id = $1 AND returned_at IS NULL",
        )
        .bind(user_id)
        .fetch_one(conn)
        .await?;
        Ok(count)
    }

    pub async fn count_active_for_book(conn: &mut PgConnection, book_id: Uuid) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM loans WHERE book_id = $1 AND returned_at IS NULL",
        )
        .bind(book_id)
        .fetch_one(conn)
        .await?;
        Ok(count)
    }

    pub async fn find_active(
        conn: &mut PgConnection,
        user_id: Uuid,
        book_id: Uuid,
    ) -> AppResult<Option<Loan>> {
        let loan = sqlx::query_as::<_, Loan>(
            "SELECT * FROM loans WHERE user_id = $1 AND book_id = $2 AND returned_at IS NULL",
        )
        .bind(user_id)
        .bind(book_id)
        .fetch_optional(conn)
        .await?;
        Ok(loan)
    }

    pub async fn insert(conn: &mut PgConnection, loan: &Loan) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO loans (id, book_id, user_id, borrowed_at, due_date, returned_at, is_overdue_notified)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(loan.id)
        .bind(loan.book_id)
        .bind(loan.user_id)
        .bind(loan.borrowed_at)
        .bind(loan.due_date)
        .bind(loan.returned_at)
        .bind(loan.is_overdue_notified)
        .execute(conn)
        .await
        .map_err(|e| AppError::from(e).on_unique_violation("Book already borrowed"))?;

        Ok(())
    }

    pub async fn mark_returned(
        conn: &mut PgConnection,
        loan_id: Uuid,
        at: DateTime<Utc>,
    ) -> AppResult<Loan> {
        sqlx::query_as::<_, Loan>(
            "UPDATE loans SET returned_at = $2 WHERE id = $1 AND returned_at IS NULL RETURNING *",
        )
        .bind(loan_id)
        .bind(at)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| AppError::Conflict("No active loan found for this book".to_string()))
    }
}
