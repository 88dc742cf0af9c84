//! Health and email transport status endpoints

use axum::{extract::State, routing::get, Json, Router};
use domain_notifications::service::ServiceStatus;
use serde::Serialize;

use super::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    service: String,
    version: String,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "notify-api".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Transport configuration, reachability, pending digests and delivery counters.
async fn email_service_status(State(state): State<AppState>) -> Json<ServiceStatus> {
    Json(state.service.status().await)
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/email-service/status", get(email_service_status))
}
