//! Review endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::review::{CreateReview, Review},
    AppState,
};

use super::{ApiJson, AuthenticatedUser};

/// Reviews of a book, newest first
#[utoipa::path(
    get,
    path = "/books/{id}/reviews",
    tag = "reviews",
    params(
        ("id" = Uuid, Path, description = "Book ID")
    ),
    responses(
        (status = 200, description = "Reviews of the book", body = Vec<Review>),
        (status = 404, description = "Book not found")
    )
)]
pub async fn list_book_reviews(
    State(state): State<AppState>,
    Path(book_id): Path<Uuid>,
) -> AppResult<Json<Vec<Review>>> {
    let reviews = state.services.reviews.list_book_reviews(book_id).await?;
    Ok(Json(reviews))
}

/// Review a book as the authenticated user
#[utoipa::path(
    post,
    path = "/books/{id}/reviews",
    tag = "reviews",
    security(("bearer_auth" = [])),
    params(
        ("id" = Uuid, Path, description = "Book ID")
    ),
    request_body = CreateReview,
    responses(
        (status = 201, description = "Review created", body = Review),
        (status = 400, description = "Rating out of range"),
        (status = 404, description = "Book not found"),
        (status = 409, description = "Book already reviewed by this user")
    )
)]
pub async fn create_review(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(book_id): Path<Uuid>,
    ApiJson(data): ApiJson<CreateReview>,
) -> AppResult<(StatusCode, Json<Review>)> {
    let review = state
        .services
        .reviews
        .add_review(claims.sub, book_id, data.rating, data.comment)
        .await?;

    Ok((StatusCode::CREATED, Json(review)))
}

/// All reviews, newest first
#[utoipa::path(
    get,
    path = "/reviews",
    tag = "reviews",
    responses(
        (status = 200, description = "All reviews", body = Vec<Review>)
    )
)]
pub async fn list_reviews(State(state): State<AppState>) -> AppResult<Json<Vec<Review>>> {
    let reviews = state.services.reviews.list_reviews().await?;
    Ok(Json(reviews))
}

/// Delete a review (its author or an administrator)
#[utoipa::path(
    delete,
    path = "/reviews/{id}",
    tag = "reviews",
    security(("bearer_auth" = [])),
    params(
        ("id" = Uuid, Path, description = "Review ID")
    ),
    responses(
        (status = 204, description = "Review deleted"),
        (status = 403, description = "Not the author of the review"),
        (status = 404, description = "Review not found")
    )
)]
pub async fn delete_review(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state
        .services
        .reviews
        .delete_review(claims.sub, id, claims.is_admin())
        .await?;

    Ok(StatusCode::NO_CONTENT)
}
