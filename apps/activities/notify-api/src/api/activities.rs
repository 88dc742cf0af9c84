//! Roster endpoints
//!
//! The roster mutation is the result of the request. Notification outcomes
//! are logged and never change the response.

use axum::{
    extract::{Path, Query, State},
    routing::{delete, get, post},
    Json, Router,
};
use domain_notifications::{models::is_plausible_email, Activity, ActivityDirectory};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::warn;

use super::AppState;
use crate::error::{ApiError, ApiResult};

#[derive(Debug, Deserialize)]
pub struct EmailQuery {
    pub email: String,
}

fn validate(email: &str) -> ApiResult<()> {
    if is_plausible_email(email) {
        Ok(())
    } else {
        Err(ApiError::BadRequest(format!("Invalid email address: {}", email)))
    }
}

/// All activities keyed by name
async fn list_activities(State(state): State<AppState>) -> ApiResult<Json<BTreeMap<String, Activity>>> {
    let activities = state.roster.list_activities().await?;
    Ok(Json(activities.into_iter().map(|a| (a.name.clone(), a)).collect()))
}

async fn signup(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<EmailQuery>,
) -> ApiResult<Json<Value>> {
    validate(&query.email)?;
    let activity = state.roster.signup(&name, &query.email).await?;

    if let Err(e) = state.service.signup_confirmation(&query.email, &activity).await {
        warn!(activity = %name, email = %query.email, error = %e, "Failed to dispatch signup confirmation");
    }

    Ok(Json(json!({ "message": format!("Signed up {} for {}", query.email, name) })))
}

async fn unregister(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<EmailQuery>,
) -> ApiResult<Json<Value>> {
    let activity = state.roster.unregister(&name, &query.email).await?;

    if let Err(e) = state.service.unregister_confirmation(&query.email, &activity).await {
        warn!(activity = %name, email = %query.email, error = %e, "Failed to dispatch unregister confirmation");
    }

    Ok(Json(json!({ "message": format!("Unregistered {} from {}", query.email, name) })))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/activities", get(list_activities))
        .route("/activities/{name}/signup", post(signup))
        .route("/activities/{name}/unregister", delete(unregister))
}
