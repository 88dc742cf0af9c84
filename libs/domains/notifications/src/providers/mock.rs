//! Recording email provider for tests and local dry runs

use super::{EmailContent, EmailProvider, SentEmail};
use crate::error::{NotificationError, NotificationResult};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Mock email provider that captures sent emails
#[derive(Clone, Default)]
pub struct MockEmailProvider {
    sent_emails: Arc<Mutex<Vec<EmailContent>>>,
    attempts: Arc<AtomicUsize>,
    transient_failures: Arc<AtomicUsize>,
    permanent_failure: Option<String>,
    rejects: bool,
}

impl MockEmailProvider {
    /// Create a new mock provider
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock provider that always rejects messages permanently
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            permanent_failure: Some(message.into()),
            ..Self::default()
        }
    }

    /// Create a mock provider whose sends return without the message being accepted
    pub fn rejecting() -> Self {
        Self {
            rejects: true,
            ..Self::default()
        }
    }

    /// Fail the next `count` sends with a transient error, then succeed
    pub fn with_transient_failures(self, count: usize) -> Self {
        self.transient_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Get all sent emails
    pub async fn sent_emails(&self) -> Vec<EmailContent> {
        self.sent_emails.lock().await.clone()
    }

    /// Get the count of sent emails
    pub async fn sent_count(&self) -> usize {
        self.sent_emails.lock().await.len()
    }

    /// Number of send calls, successful or not
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Check if an email was sent to a specific address
    pub async fn was_sent_to(&self, email: &str) -> bool {
        self.sent_emails
            .lock()
            .await
            .iter()
            .any(|e| e.to_email == email)
    }
}

#[async_trait]
impl EmailProvider for MockEmailProvider {
    async fn send(&self, email: &EmailContent) -> NotificationResult<SentEmail> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(message) = &self.permanent_failure {
            return Err(NotificationError::Provider(message.clone()));
        }

        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(NotificationError::TransientDelivery(format!(
                "Mock transient failure on attempt {}",
                attempt
            )));
        }

        if !self.rejects {
            self.sent_emails.lock().await.push(email.clone());
        }

        Ok(SentEmail {
            message_id: Some(format!("mock-{}", attempt)),
            accepted: !self.rejects,
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }

    async fn health_check(&self) -> NotificationResult<bool> {
        Ok(self.permanent_failure.is_none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_provider_records_email() {
        let provider = MockEmailProvider::new();
        provider
            .send(&EmailContent::new("test@example.com", "Subject"))
            .await
            .unwrap();

        assert_eq!(provider.sent_count().await, 1);
        assert!(provider.was_sent_to("test@example.com").await);
        assert!(!provider.was_sent_to("other@example.com").await);
    }

    #[tokio::test]
    async fn test_mock_provider_transient_then_success() {
        let provider = MockEmailProvider::new().with_transient_failures(2);
        let email = EmailContent::new("a@x.edu", "s");

        assert!(provider.send(&email).await.unwrap_err().is_transient());
        assert!(provider.send(&email).await.unwrap_err().is_transient());
        assert!(provider.send(&email).await.is_ok());
        assert_eq!(provider.attempts(), 3);
        assert_eq!(provider.sent_count().await, 1);
    }

    #[tokio::test]
    async fn test_mock_provider_permanent_failure() {
        let provider = MockEmailProvider::failing("550 mailbox unavailable");
        let err = provider.send(&EmailContent::new("a@x.edu", "s")).await.unwrap_err();
        assert!(!err.is_transient());
        assert!(!provider.health_check().await.unwrap());
    }
}
