//! Error types for the notifications domain.

use thiserror::Error;

/// Result type for notification operations.
pub type NotificationResult<T> = Result<T, NotificationError>;

/// Errors that can occur in the notifications domain.
///
/// None of these ever reach the caller of an enrollment operation: the
/// dispatch path turns delivery problems into [`crate::DeliveryResult`] values.
#[derive(Debug, Error)]
pub enum NotificationError {
    /// Preference or roster storage failed.
    #[error("Store error: {0}")]
    Store(String),

    /// The transport rejected the message permanently (bad address, 5xx).
    #[error("Email provider error: {0}")]
    Provider(String),

    /// The transport failed in a way that may succeed on retry (timeout, 4xx, connection).
    #[error("Transient delivery error: {0}")]
    TransientDelivery(String),

    /// Template rendering error.
    #[error("Template rendering error: {0}")]
    Template(String),

    /// Configuration error (including an unconfigured transport).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid email address.
    #[error("Invalid email address: {0}")]
    InvalidEmail(String),

    /// A named entity (activity, preference record) does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A request is malformed (no recipients, unknown template).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A roster mutation conflicts with the current state (already enrolled, full).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl NotificationError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, NotificationError::TransientDelivery(_))
    }
}

impl From<handlebars::RenderError> for NotificationError {
    fn from(err: handlebars::RenderError) -> Self {
        NotificationError::Template(err.to_string())
    }
}

impl From<handlebars::TemplateError> for NotificationError {
    fn from(err: handlebars::TemplateError) -> Self {
        NotificationError::Template(err.to_string())
    }
}

impl From<serde_json::Error> for NotificationError {
    fn from(err: serde_json::Error) -> Self {
        NotificationError::Internal(format!("JSON serialization error: {}", err))
    }
}

impl From<std::io::Error> for NotificationError {
    fn from(err: std::io::Error) -> Self {
        NotificationError::Store(format!("IO error: {}", err))
    }
}

impl From<core_config::ConfigError> for NotificationError {
    fn from(err: core_config::ConfigError) -> Self {
        NotificationError::Config(err.to_string())
    }
}

impl From<lettre::transport::smtp::Error> for NotificationError {
    fn from(err: lettre::transport::smtp::Error) -> Self {
        if err.is_permanent() {
            NotificationError::Provider(format!("SMTP rejected message: {}", err))
        } else {
            NotificationError::TransientDelivery(format!("SMTP send failed: {}", err))
        }
    }
}
