//! Announcements and raw event submission

use axum::{
    body::Bytes,
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use domain_notifications::{ActivityDirectory, BatchAnnouncement, DispatchDecision, NotificationEvent};
use serde::Deserialize;
use serde_json::{json, Value};

use super::AppState;
use crate::error::{ApiError, ApiResult};

#[derive(Debug, Default, Deserialize)]
pub struct AnnounceRequest {
    #[serde(default)]
    pub recipients: Option<Vec<String>>,
}

/// An empty body means "everyone who wants new-activity emails".
fn parse_announce(body: &Bytes) -> ApiResult<AnnounceRequest> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(AnnounceRequest::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("Invalid request body: {}", e)))
}

async fn announce_new_activity(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let request = parse_announce(&body)?;
    let activity = state
        .roster
        .get_activity(&name)
        .await?
        .ok_or_else(|| ApiError::NotFound("Activity not found".to_string()))?;

    let recipients = request.recipients.filter(|r| !r.is_empty());
    let decisions = state.service.announce_new_activity(&activity, recipients).await?;
    if decisions.is_empty() {
        return Ok(Json(json!({ "message": "No recipients to send to" })));
    }

    let suppressed = decisions.iter().filter(|d| d.is_suppressed()).count();
    Ok(Json(json!({
        "message": format!("Announcement dispatched to {} recipients", decisions.len()),
        "activity": name,
        "recipients_count": decisions.len(),
        "suppressed_count": suppressed,
    })))
}

/// Send a custom subject and template to an explicit recipient list and
/// report how many went out.
async fn batch_email(
    State(state): State<AppState>,
    Json(batch): Json<BatchAnnouncement>,
) -> ApiResult<Json<Value>> {
    let report = state.service.send_batch(batch).await?;
    Ok(Json(json!({
        "message": format!("Batch email sent to {} of {} recipients", report.sent, report.total),
        "recipients_count": report.total,
        "total": report.total,
        "sent": report.sent,
        "failed": report.failed,
        "suppressed": report.suppressed,
    })))
}

/// Submit an event as-is and return one decision per recipient.
async fn submit_event(
    State(state): State<AppState>,
    Json(event): Json<NotificationEvent>,
) -> ApiResult<Json<Vec<DispatchDecision>>> {
    let mut normalized =
        NotificationEvent::new(event.kind, &event.recipients, event.context).at(event.created_at);
    normalized.id = event.id;
    if normalized.recipients.is_empty() {
        return Err(ApiError::BadRequest("No recipients specified".to_string()));
    }
    Ok(Json(state.service.submit(normalized).await?))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/announcements/new-activity/{name}", post(announce_new_activity))
        .route("/announcements/batch-email", post(batch_email))
        .route("/events", post(submit_event))
}
