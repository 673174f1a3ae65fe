//! Bookshelf Library Server
//!
//! REST JSON API for a lending library: catalog, accounts, loans with stock
//! tracking, reviews with aggregate ratings and a daily overdue reminder.

use std::sync::Arc;

pub mod api;
pub mod clock;
pub mod config;
pub mod error;
pub mod models;
pub mod repository;
pub mod services;

pub use config::AppConfig;
pub use error::{AppError, AppResult};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub services: Arc<services::Services>,
}
