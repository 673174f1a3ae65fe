//! API tests against the router backed by the in-memory store

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;
use uuid::Uuid;

use bookshelf_server::{
    api,
    clock::SystemClock,
    config::AppConfig,
    error::AppResult,
    models::Role,
    repository::{LibraryStore, MemoryStore},
    services::{email::Notifier, Services},
    AppState,
};

/// Keeps every message instead of sending it
#[derive(Default)]
struct Outbox {
    sent: Mutex<Vec<(String, String)>>,
}

impl Outbox {
    /// Token carried by the last link sent to `to`
    fn token_for(&self, to: &str) -> String {
        let sent = self.sent.lock().unwrap();
        let (_, body) = sent.iter().rev().find(|(rcpt, _)| rcpt == to).unwrap();
        let start = body.find("token=").unwrap() + "token=".len();
        body[start..]
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
            .collect()
    }
}

#[async_trait]
impl Notifier for Outbox {
    async fn send(&self, to: &str, _subject: &str, html: &str) -> AppResult<()> {
        self.sent.lock().unwrap().push((to.to_string(), html.to_string()));
        Ok(())
    }
}

struct TestApp {
    router: Router,
    store: MemoryStore,
    outbox: Arc<Outbox>,
}

fn config() -> AppConfig {
    AppConfig {
        server: Default::default(),
        database: Default::default(),
        auth: Default::default(),
        logging: Default::default(),
        email: Default::default(),
        loans: Default::default(),
        scheduler: Default::default(),
    }
}

fn app() -> TestApp {
    let config = config();
    let store = MemoryStore::new();
    let outbox = Arc::new(Outbox::default());
    let services = Services::new(
        Arc::new(store.clone()),
        outbox.clone(),
        Arc::new(SystemClock),
        &config,
    );
    let router = api::create_router(AppState {
        config: Arc::new(config),
        services: Arc::new(services),
    });

    TestApp {
        router,
        store,
        outbox,
    }
}

impl TestApp {
    async fn call(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder()
            .method(method)
            .uri(format!("/api/v1{}", uri));
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    /// Register, verify and log in; returns (user id, access token)
    async fn sign_up(&self, email: &str, role: Role) -> (Uuid, String) {
        let (status, user) = self
            .call(
                Method::POST,
                "/auth/register",
                None,
                Some(json!({
                    "name": "Test Reader",
                    "email": email,
                    "password": "secret123",
                    "phone": "0600000000"
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let id: Uuid = user["id"].as_str().unwrap().parse().unwrap();

        let token = self.outbox.token_for(email);
        let (status, _) = self
            .call(Method::GET, &format!("/auth/verify-email?token={}", token), None, None)
            .await;
        assert_eq!(status, StatusCode::OK);

        if role != Role::User {
            let mut stored = self.store.get_user(id).await.unwrap().unwrap();
            stored.role = role;
            self.store.update_user(&stored).await.unwrap();
        }

        let (status, body) = self
            .call(
                Method::POST,
                "/auth/login",
                None,
                Some(json!({ "email": email, "password": "secret123" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        (id, body["token"].as_str().unwrap().to_string())
    }

    async fn create_book(&self, admin: &str, stock: i32) -> String {
        let (status, book) = self
            .call(
                Method::POST,
                "/books",
                Some(admin),
                Some(json!({
                    "title": "Solaris",
                    "author": "Stanislaw Lem",
                    "publisher": "MON",
                    "published_year": 1961,
                    "stock": stock
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        book["id"].as_str().unwrap().to_string()
    }
}

fn due_in_days(days: i64) -> Value {
    json!({ "due_date": (Utc::now() + Duration::days(days)).to_rfc3339() })
}

#[tokio::test]
async fn test_health_check() {
    let app = app();

    let (status, body) = app.call(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body) = app.call(Method::GET, "/ready", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
}

#[tokio::test]
async fn test_responses_gzip_when_accepted() {
    let app = app();
    let (_, admin) = app.sign_up("admin@example.com", Role::Admin).await;
    app.create_book(&admin, 2).await;

    let request = Request::builder()
        .uri("/api/v1/books")
        .header(header::ACCEPT_ENCODING, "gzip")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_ENCODING], "gzip");
}

#[tokio::test]
async fn test_protected_routes_require_token() {
    let app = app();

    let (status, body) = app
        .call(Method::POST, &format!("/books/{}/borrow", Uuid::new_v4()), None, Some(due_in_days(7)))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "NotAuthorized");

    let (status, _) = app
        .call(Method::GET, "/books/loans/me", Some("not-a-jwt"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_login_before_verification_is_rejected() {
    let app = app();
    app.call(
        Method::POST,
        "/auth/register",
        None,
        Some(json!({
            "name": "New",
            "email": "new@example.com",
            "password": "secret123",
            "phone": "0600000000"
        })),
    )
    .await;

    let (status, _) = app
        .call(
            Method::POST,
            "/auth/login",
            None,
            Some(json!({ "email": "new@example.com", "password": "secret123" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_catalog_writes_need_admin() {
    let app = app();
    let (_, reader) = app.sign_up("reader@example.com", Role::User).await;

    let (status, _) = app
        .call(
            Method::POST,
            "/books",
            Some(&reader),
            Some(json!({
                "title": "Roadside Picnic",
                "author": "Strugatsky",
                "publisher": "Macmillan",
                "published_year": 1972
            })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_borrow_return_cycle() {
    let app = app();
    let (_, admin) = app.sign_up("admin@example.com", Role::Admin).await;
    let (_, reader) = app.sign_up("reader@example.com", Role::User).await;
    let (_, other) = app.sign_up("other@example.com", Role::User).await;
    let book = app.create_book(&admin, 1).await;

    let (status, loan) = app
        .call(Method::POST, &format!("/books/{}/borrow", book), Some(&reader), Some(due_in_days(14)))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(loan["returned_at"].is_null());

    let (_, details) = app.call(Method::GET, &format!("/books/{}", book), None, None).await;
    assert_eq!(details["stock"], 0);

    // last copy is gone
    let (status, body) = app
        .call(Method::POST, &format!("/books/{}/borrow", book), Some(&other), Some(due_in_days(14)))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "OutOfStock");

    // book with a copy on loan cannot be deleted
    let (status, _) = app
        .call(Method::DELETE, &format!("/books/{}", book), Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, loans) = app.call(Method::GET, "/books/loans/me", Some(&reader), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(loans.as_array().unwrap().len(), 1);
    assert_eq!(loans[0]["book"]["title"], "Solaris");
    assert_eq!(loans[0]["is_overdue"], false);

    let (status, returned) = app
        .call(Method::POST, &format!("/books/{}/return", book), Some(&reader), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(returned["returned_at"].is_string());

    let (status, _) = app
        .call(Method::POST, &format!("/books/{}/return", book), Some(&reader), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, details) = app.call(Method::GET, &format!("/books/{}", book), None, None).await;
    assert_eq!(details["stock"], 1);
}

#[tokio::test]
async fn test_borrow_with_past_due_date() {
    let app = app();
    let (_, admin) = app.sign_up("admin@example.com", Role::Admin).await;
    let book = app.create_book(&admin, 3).await;

    let (status, body) = app
        .call(Method::POST, &format!("/books/{}/borrow", book), Some(&admin), Some(due_in_days(-1)))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "BadValue");
}

#[tokio::test]
async fn test_malformed_bodies_are_bad_values() {
    let app = app();
    let (_, admin) = app.sign_up("admin@example.com", Role::Admin).await;
    let book = app.create_book(&admin, 3).await;

    let cases = [
        (format!("/books/{}/reviews", book), json!({ "rating": 40000 })),
        (format!("/books/{}/reviews", book), json!({ "comment": "no rating" })),
        (format!("/books/{}/borrow", book), json!({ "due_date": "next tuesday" })),
    ];

    for (uri, body) in cases {
        let (status, error) = app.call(Method::POST, &uri, Some(&admin), Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
        assert_eq!(error["code"], 8);
        assert_eq!(error["error"], "BadValue");
        assert!(error["message"].is_string());
    }

    let (_, details) = app.call(Method::GET, &format!("/books/{}", book), None, None).await;
    assert_eq!(details["stock"], 3);
    assert_eq!(details["rating"], 0.0);
}

#[tokio::test]
async fn test_loan_limit_maps_to_unprocessable() {
    let app = app();
    let (_, admin) = app.sign_up("admin@example.com", Role::Admin).await;
    let (_, reader) = app.sign_up("reader@example.com", Role::User).await;

    for _ in 0..5 {
        let book = app.create_book(&admin, 1).await;
        let (status, _) = app
            .call(Method::POST, &format!("/books/{}/borrow", book), Some(&reader), Some(due_in_days(7)))
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let book = app.create_book(&admin, 1).await;
    let (status, body) = app
        .call(Method::POST, &format!("/books/{}/borrow", book), Some(&reader), Some(due_in_days(7)))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "MaxLoansReached");
}

#[tokio::test]
async fn test_reviews_drive_rating() {
    let app = app();
    let (_, admin) = app.sign_up("admin@example.com", Role::Admin).await;
    let (_, reader) = app.sign_up("reader@example.com", Role::User).await;
    let book = app.create_book(&admin, 1).await;

    let (status, _) = app
        .call(
            Method::POST,
            &format!("/books/{}/reviews", book),
            Some(&reader),
            Some(json!({ "rating": 6 })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, mine) = app
        .call(
            Method::POST,
            &format!("/books/{}/reviews", book),
            Some(&reader),
            Some(json!({ "rating": 5, "comment": "Haunting" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    app.call(
        Method::POST,
        &format!("/books/{}/reviews", book),
        Some(&admin),
        Some(json!({ "rating": 2 })),
    )
    .await;

    let (_, details) = app.call(Method::GET, &format!("/books/{}", book), None, None).await;
    assert_eq!(details["rating"], 3.5);

    let (status, listed) = app
        .call(Method::GET, &format!("/books/{}/reviews", book), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 2);

    let review_id = mine["id"].as_str().unwrap();
    let (status, _) = app
        .call(Method::DELETE, &format!("/reviews/{}", review_id), Some(&reader), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, details) = app.call(Method::GET, &format!("/books/{}", book), None, None).await;
    assert_eq!(details["rating"], 2.0);
}

#[tokio::test]
async fn test_role_management() {
    let app = app();
    let (root_id, root) = app.sign_up("root@example.com", Role::Superadmin).await;
    let (member_id, member) = app.sign_up("member@example.com", Role::User).await;

    let (status, _) = app
        .call(
            Method::PUT,
            &format!("/users/{}/role", root_id),
            Some(&member),
            Some(json!({ "role": "ADMIN" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .call(
            Method::PUT,
            &format!("/users/{}/role", root_id),
            Some(&root),
            Some(json!({ "role": "USER" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, updated) = app
        .call(
            Method::PUT,
            &format!("/users/{}/role", member_id),
            Some(&root),
            Some(json!({ "role": "admin" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["role"], "ADMIN");
    assert!(updated.get("password").is_none());
}
