//! Handler tests for the activities API
//!
//! Every test builds the router over in-memory stores and the recording
//! email provider, then drives it with `oneshot`.

use activities_notify_api::{app, seed, AppState};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use domain_notifications::{
    DigestAccumulator, EmailProvider, InMemoryActivityDirectory, InMemoryPreferenceStore,
    MockEmailProvider, NotificationService, Notifier, TemplateEngine,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt; // For oneshot()

struct TestApp {
    router: Router,
    service: Arc<NotificationService>,
    roster: InMemoryActivityDirectory,
}

fn test_app(provider: Option<MockEmailProvider>) -> TestApp {
    let provider = provider.map(|p| Arc::new(p) as Arc<dyn EmailProvider>);
    let notifier = Notifier::new(provider, Arc::new(TemplateEngine::new().unwrap()));
    let service = Arc::new(NotificationService::new(
        Arc::new(InMemoryPreferenceStore::new()),
        Arc::new(DigestAccumulator::new()),
        Arc::new(notifier),
    ));
    let roster = seed::roster();
    let router = app(AppState {
        service: service.clone(),
        roster: roster.clone(),
    });
    TestApp {
        router,
        service,
        roster,
    }
}

// Helper to parse JSON response body
async fn json_body(body: Body) -> Value {
    let bytes = body.collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder().method(method).uri(uri);
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

#[tokio::test]
async fn test_list_activities() {
    let t = test_app(None);
    let response = t.router.oneshot(request("GET", "/activities", None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response.into_body()).await;
    assert_eq!(body["Chess Club"]["max_participants"], 12);
    assert_eq!(body.as_object().unwrap().len(), 10);
}

#[tokio::test]
async fn test_signup_succeeds_without_email_transport() {
    let t = test_app(None);
    let response = t
        .router
        .oneshot(request(
            "POST",
            "/activities/Chess%20Club/signup?email=new@mergington.edu",
            None,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response.into_body()).await;
    assert_eq!(body["message"], "Signed up new@mergington.edu for Chess Club");

    use domain_notifications::ActivityDirectory;
    let chess = t.roster.get_activity("Chess Club").await.unwrap().unwrap();
    assert!(chess.is_enrolled("new@mergington.edu"));
}

#[tokio::test]
async fn test_signup_twice_is_rejected() {
    let t = test_app(None);
    let response = t
        .router
        .oneshot(request(
            "POST",
            "/activities/Chess%20Club/signup?email=michael@mergington.edu",
            None,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response.into_body()).await;
    assert_eq!(body["message"], "Student is already signed up");
}

#[tokio::test]
async fn test_signup_unknown_activity_is_404() {
    let t = test_app(None);
    let response = t
        .router
        .oneshot(request("POST", "/activities/Knitting/signup?email=a@x.edu", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unregister_not_enrolled_is_400() {
    let t = test_app(None);
    let response = t
        .router
        .oneshot(request(
            "DELETE",
            "/activities/Chess%20Club/unregister?email=nobody@mergington.edu",
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_missing_preferences_returns_defaults() {
    let t = test_app(None);
    let response = t
        .router
        .oneshot(request("GET", "/email-preferences/Someone@X.edu", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response.into_body()).await;
    assert_eq!(body["email"], "someone@x.edu");
    assert_eq!(body["enabled"], true);
    assert_eq!(body["frequency"], "immediate");
}

#[tokio::test]
async fn test_put_then_delete_preferences() {
    let t = test_app(None);
    let record = json!({
        "email": "b@x.edu",
        "frequency": "weekly",
        "parent_email": "p@x.edu",
        "parent_cc_enabled": true
    });

    let response = t
        .router
        .clone()
        .oneshot(request("PUT", "/email-preferences/b@x.edu", Some(record)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response.into_body()).await;
    assert_eq!(body["preferences"]["frequency"], "weekly");

    let stored = t.service.get_preferences("b@x.edu").await.unwrap();
    assert_eq!(stored.cc_address().as_deref(), Some("p@x.edu"));

    let response = t
        .router
        .clone()
        .oneshot(request("DELETE", "/email-preferences/b@x.edu", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = t
        .router
        .oneshot(request("DELETE", "/email-preferences/b@x.edu", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_put_preferences_with_mismatched_email_is_400() {
    let t = test_app(None);
    let response = t
        .router
        .oneshot(request(
            "PUT",
            "/email-preferences/a@x.edu",
            Some(json!({ "email": "other@x.edu" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_events_returns_decisions() {
    let t = test_app(Some(MockEmailProvider::new()));
    t.service
        .update_preferences(
            domain_notifications::PreferenceRecord::default_for("off@x.edu").disabled(),
        )
        .await
        .unwrap();

    let event = json!({
        "kind": "activity_changes",
        "recipients": ["off@x.edu", "on@x.edu"],
        "context": { "activity_name": "Chess Club", "change_description": "Room 12" }
    });
    let response = t.router.oneshot(request("POST", "/events", Some(event))).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response.into_body()).await;
    assert_eq!(body[0]["decision"], "suppress");
    assert_eq!(body[0]["reason"], "master_switch_off");
    assert_eq!(body[1]["decision"], "send_now");
}

#[tokio::test]
async fn test_announcement_without_body_targets_opted_in_records() {
    let t = test_app(None);
    let response = t
        .router
        .oneshot(request("POST", "/announcements/new-activity/Chess%20Club", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response.into_body()).await;
    assert_eq!(body["message"], "No recipients to send to");
}

#[tokio::test]
async fn test_announcement_with_recipients() {
    let t = test_app(None);
    let response = t
        .router
        .oneshot(request(
            "POST",
            "/announcements/new-activity/Art%20Club",
            Some(json!({ "recipients": ["a@x.edu", "b@x.edu"] })),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response.into_body()).await;
    assert_eq!(body["recipients_count"], 2);
}

#[tokio::test]
async fn test_put_preferences_accepts_per_category_flags() {
    let t = test_app(None);
    let record = json!({
        "email": "a@x.edu",
        "reminders": false,
        "new_activities": false
    });
    let response = t
        .router
        .oneshot(request("PUT", "/email-preferences/a@x.edu", Some(record)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response.into_body()).await;
    assert_eq!(body["preferences"]["reminders"], false);
    assert_eq!(body["preferences"]["attendance"], true);

    use domain_notifications::NotificationKind;
    let stored = t.service.get_preferences("a@x.edu").await.unwrap();
    assert!(!stored.allows(NotificationKind::Reminders));
    assert!(!stored.allows(NotificationKind::NewActivities));
    assert!(stored.allows(NotificationKind::SignupConfirmation));
}

#[tokio::test]
async fn test_put_preferences_with_unknown_field_is_rejected() {
    let t = test_app(None);
    let response = t
        .router
        .oneshot(request(
            "PUT",
            "/email-preferences/a@x.edu",
            Some(json!({ "email": "a@x.edu", "reminder": false })),
        ))
        .await
        .unwrap();

    assert!(response.status().is_client_error());
    let stored = t.service.list_preferences().await.unwrap();
    assert!(stored.is_empty());
}

#[tokio::test]
async fn test_batch_email_reports_counts() {
    let provider = MockEmailProvider::new();
    let t = test_app(Some(provider.clone()));
    let batch = json!({
        "recipients": ["a@x.edu", "b@x.edu"],
        "subject": "Spring showcase",
        "context": { "message": "Join us in the auditorium on Friday." }
    });
    let response = t
        .router
        .oneshot(request("POST", "/announcements/batch-email", Some(batch)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response.into_body()).await;
    assert_eq!(body["total"], 2);
    assert_eq!(body["sent"], 2);
    assert_eq!(body["failed"], 0);

    let sent = provider.sent_emails().await;
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].subject, "Spring showcase");
}

#[tokio::test]
async fn test_batch_email_without_recipients_is_400() {
    let t = test_app(Some(MockEmailProvider::new()));
    let batch = json!({ "recipients": [], "subject": "Hello", "context": {} });
    let response = t
        .router
        .oneshot(request("POST", "/announcements/batch-email", Some(batch)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response.into_body()).await;
    assert_eq!(body["message"], "No recipients specified");
}

#[tokio::test]
async fn test_batch_email_without_transport_counts_failures() {
    let t = test_app(None);
    let batch = json!({
        "recipients": ["a@x.edu"],
        "subject": "Hello",
        "template_name": "announcement",
        "context": { "message": "Hi" }
    });
    let response = t
        .router
        .oneshot(request("POST", "/announcements/batch-email", Some(batch)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response.into_body()).await;
    assert_eq!(body["sent"], 0);
    assert_eq!(body["failed"], 1);
}

#[tokio::test]
async fn test_email_service_status_unconfigured() {
    let t = test_app(None);
    let response = t
        .router
        .oneshot(request("GET", "/email-service/status", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response.into_body()).await;
    assert_eq!(body["configured"], false);
    assert_eq!(body["message"], "Email service is not configured");
    assert_eq!(body["pending_digests"]["daily"], 0);
}

#[tokio::test]
async fn test_health() {
    let t = test_app(None);
    let response = t.router.oneshot(request("GET", "/health", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response.into_body()).await;
    assert_eq!(body["status"], "healthy");
}
