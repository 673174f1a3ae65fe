//! Business logic services

pub mod catalog;
pub mod email;
pub mod loans;
pub mod overdue;
pub mod reviews;
pub mod scheduler;
pub mod users;

use std::sync::Arc;

use crate::{clock::Clock, config::AppConfig, repository::LibraryStore};

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub catalog: catalog::CatalogService,
    pub loans: loans::LoansService,
    pub reviews: reviews::ReviewsService,
    pub users: users::UsersService,
    pub overdue: overdue::OverdueSweeper,
}

impl Services {
    /// Create all services over the given store
    pub fn new(
        store: Arc<dyn LibraryStore>,
        notifier: Arc<dyn email::Notifier>,
        clock: Arc<dyn Clock>,
        config: &AppConfig,
    ) -> Self {
        Self {
            catalog: catalog::CatalogService::new(store.clone(), clock.clone()),
            loans: loans::LoansService::new(store.clone(), clock.clone(), config.loans.clone()),
            reviews: reviews::ReviewsService::new(store.clone(), clock.clone()),
            users: users::UsersService::new(
                store.clone(),
                notifier.clone(),
                clock.clone(),
                config.auth.clone(),
                config.email.frontend_url.clone(),
            ),
            overdue: overdue::OverdueSweeper::new(store, notifier, clock),
        }
    }
}
