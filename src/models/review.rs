//! Review model and related types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

pub const MIN_RATING: i16 = 1;
pub const MAX_RATING: i16 = 5;

/// Review model from database, unique per (user_id, book_id)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Review {
    pub id: Uuid,
    pub user_id: Uuid,
    pub book_id: Uuid,
    pub rating: i16,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Create review request
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateReview {
    /// Rating from 1 to 5
    pub rating: i16,
    pub comment: Option<String>,
}

/// Mean of the given ratings, 0 when there are none
pub fn mean_rating(ratings: &[i16]) -> f64 {
    if ratings.is_empty() {
        return 0.0;
    }
    let sum: i64 = ratings.iter().map(|r| i64::from(*r)).sum();
    sum as f64 / ratings.len() as f64
}
