//! OpenAPI documentation

use axum::Router;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::api::{books, health, reviews, users};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Bookshelf API",
        version = "1.0.0",
        description = "Library lending REST API"
    ),
    servers(
        (url = "/api/v1", description = "API v1")
    ),
    paths(
        // Health
        health::health_check,
        health::readiness_check,
        // Auth
        users::register,
        users::verify_email,
        users::login,
        users::forgot_password,
        users::reset_password,
        users::me,
        users::update_my_profile,
        // Users
        users::list_users,
        users::get_user,
        users::delete_user,
        users::update_role,
        // Books
        books::list_books,
        books::get_book,
        books::create_book,
        books::update_book,
        books::delete_book,
        // Loans
        books::borrow_book,
        books::return_book,
        books::my_loans,
        // Reviews
        reviews::list_book_reviews,
        reviews::create_review,
        reviews::list_reviews,
        reviews::delete_review,
    ),
    components(
        schemas(
            // Auth
            users::LoginResponse,
            users::MessageResponse,
            users::ForgotPasswordRequest,
            users::ResetPasswordRequest,
            crate::models::user::LoginRequest,
            crate::models::user::RegisterUser,
            // Users
            crate::models::user::User,
            crate::models::user::Role,
            crate::models::user::UpdateProfile,
            crate::models::user::UpdateRole,
            // Books
            crate::models::book::Book,
            crate::models::book::CreateBook,
            crate::models::book::UpdateBook,
            // Loans
            crate::models::loan::Loan,
            crate::models::loan::LoanDetails,
            crate::models::loan::BorrowRequest,
            // Reviews
            crate::models::review::Review,
            crate::models::review::CreateReview,
            // Health
            health::HealthResponse,
            // Errors
            crate::error::ErrorResponse,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "auth", description = "Registration and authentication"),
        (name = "users", description = "User management"),
        (name = "books", description = "Catalog management"),
        (name = "loans", description = "Borrowing and returning books"),
        (name = "reviews", description = "Book reviews and ratings")
    )
)]
pub struct ApiDoc;

/// Registers the `bearer_auth` scheme referenced by protected endpoints
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Create the OpenAPI documentation router
pub fn create_openapi_router() -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}
