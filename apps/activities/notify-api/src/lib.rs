//! Mergington High School activities API
//!
//! Roster endpoints plus the preference-aware notification engine: every
//! signup, unregistration and announcement is routed through
//! [`domain_notifications::NotificationService`], and a background scheduler
//! runs the daily and weekly sweeps.

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod seed;
pub mod shutdown;

use axum::Router;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

pub use api::AppState;
pub use engine::Engine;

/// Full HTTP application with request tracing.
pub fn app(state: AppState) -> Router {
    api::routes(state).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    )
}
