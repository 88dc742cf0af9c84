//! Email transport implementations.
//!
//! The notifier hands fully rendered messages to an [`EmailProvider`]; the
//! provider only moves bytes and reports whether the transport accepted them.

mod mock;
mod smtp;

pub use mock::MockEmailProvider;
pub use smtp::{SmtpConfig, SmtpProvider};

use crate::error::NotificationResult;
use async_trait::async_trait;

/// Represents a sent email with provider-specific message ID.
#[derive(Debug, Clone)]
pub struct SentEmail {
    /// Provider-specific message ID for tracking.
    pub message_id: Option<String>,
    /// Whether the email was accepted for delivery.
    pub accepted: bool,
}

/// Email content ready for sending.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmailContent {
    /// Recipient email address.
    pub to_email: String,
    /// Email subject.
    pub subject: String,
    /// HTML body content.
    pub html_body: String,
    /// Plain text body content.
    pub text_body: String,
    /// CC recipients (email addresses).
    pub cc: Vec<String>,
    /// Idempotency key, sent as a header so the relay can drop duplicates too.
    pub idempotency_key: Option<String>,
}

impl EmailContent {
    pub fn new(to_email: &str, subject: &str) -> Self {
        Self {
            to_email: to_email.to_string(),
            subject: subject.to_string(),
            ..Default::default()
        }
    }

    pub fn with_bodies(mut self, html_body: String, text_body: String) -> Self {
        self.html_body = html_body;
        self.text_body = text_body;
        self
    }

    pub fn with_cc(mut self, cc: Option<String>) -> Self {
        self.cc = cc.into_iter().collect();
        self
    }

    pub fn with_idempotency_key(mut self, key: String) -> Self {
        self.idempotency_key = Some(key);
        self
    }
}

/// Trait for email sending providers.
///
/// Errors must be classified: [`crate::NotificationError::TransientDelivery`]
/// for failures worth retrying, anything else is treated as permanent.
#[async_trait]
pub trait EmailProvider: Send + Sync {
    /// Send an email.
    async fn send(&self, email: &EmailContent) -> NotificationResult<SentEmail>;

    /// Get the provider name for logging.
    fn name(&self) -> &'static str;

    /// Check whether the transport is reachable.
    async fn health_check(&self) -> NotificationResult<bool>;
}
