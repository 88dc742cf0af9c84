//! API routes module

pub mod activities;
pub mod announcements;
pub mod health;
pub mod preferences;

use axum::Router;
use domain_notifications::{InMemoryActivityDirectory, NotificationService};
use std::sync::Arc;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<NotificationService>,
    pub roster: InMemoryActivityDirectory,
}

/// Create all API routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .merge(activities::router())
        .merge(preferences::router())
        .merge(announcements::router())
        .merge(health::router())
        .with_state(state)
}
