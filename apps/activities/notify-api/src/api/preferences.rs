//! Email preference endpoints

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use domain_notifications::{models::normalize_email, PreferenceRecord};
use serde_json::{json, Value};

use super::AppState;
use crate::error::{ApiError, ApiResult};

async fn list_preferences(State(state): State<AppState>) -> ApiResult<Json<Vec<PreferenceRecord>>> {
    Ok(Json(state.service.list_preferences().await?))
}

/// Stored record, or the defaults when nothing is stored
async fn get_preferences(
    State(state): State<AppState>,
    Path(email): Path<String>,
) -> ApiResult<Json<PreferenceRecord>> {
    Ok(Json(state.service.get_preferences(&email).await?))
}

async fn put_preferences(
    State(state): State<AppState>,
    Path(email): Path<String>,
    Json(record): Json<PreferenceRecord>,
) -> ApiResult<Json<Value>> {
    if normalize_email(&email) != normalize_email(&record.email) {
        return Err(ApiError::BadRequest(
            "Email in path must match email in preferences".to_string(),
        ));
    }

    let stored = state.service.update_preferences(record).await?;
    Ok(Json(json!({
        "message": "Preferences updated successfully",
        "preferences": stored,
    })))
}

async fn delete_preferences(
    State(state): State<AppState>,
    Path(email): Path<String>,
) -> ApiResult<Json<Value>> {
    state.service.delete_preferences(&email).await?;
    Ok(Json(json!({ "message": "Preferences deleted successfully" })))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/email-preferences", get(list_preferences))
        .route(
            "/email-preferences/{email}",
            get(get_preferences).put(put_preferences).delete(delete_preferences),
        )
}
