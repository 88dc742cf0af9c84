//! Notifier boundary: render, deduplicate and hand messages to the transport.
//!
//! Every call returns a [`DeliveryResult`]; transport problems are never
//! raised to the caller. Transient failures are retried with bounded
//! exponential backoff, after which the delivery is logged as failed and
//! dropped.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::NotificationError;
use crate::models::{DigestClass, ImmediateDelivery, MessageKind};
use crate::providers::{EmailContent, EmailProvider};
use crate::templates::MessageRenderer;

/// Failure reason reported when no transport is configured.
pub const UNCONFIGURED: &str = "unconfigured";

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound for a single transport call.
    pub send_timeout: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based): `base * 2^retry`, capped.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base = self.base_delay.as_millis() as u64;
        let delay = base.saturating_mul(2u64.saturating_pow(retry));
        Duration::from_millis(delay).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            send_timeout: Duration::from_secs(15),
        }
    }
}

/// How long delivered keys are remembered, and how coarse the key's time bucket is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupPolicy {
    pub window: Duration,
    pub bucket: Duration,
}

impl Default for DedupPolicy {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(3600),
            bucket: Duration::from_secs(3600),
        }
    }
}

/// A fully resolved message for one recipient.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryRequest {
    pub recipient: String,
    pub cc: Option<String>,
    pub kind: MessageKind,
    pub context: Value,
    /// Replaces the rendered subject line.
    pub subject: Option<String>,
    /// Feeds the coarse time bucket of the idempotency key.
    pub occurred_at: DateTime<Utc>,
}

impl DeliveryRequest {
    pub fn digest(
        recipient: &str,
        cc: Option<String>,
        class: DigestClass,
        context: Value,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            recipient: recipient.to_string(),
            cc,
            kind: MessageKind::Digest(class),
            context,
            subject: None,
            occurred_at,
        }
    }

    /// A message with a caller-chosen subject, sent without consulting preferences.
    pub fn announcement(
        recipient: &str,
        kind: MessageKind,
        subject: &str,
        context: Value,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            recipient: recipient.to_string(),
            cc: None,
            kind,
            context,
            subject: Some(subject.to_string()),
            occurred_at,
        }
    }
}

impl From<ImmediateDelivery> for DeliveryRequest {
    fn from(delivery: ImmediateDelivery) -> Self {
        Self {
            recipient: delivery.recipient,
            cc: delivery.cc,
            kind: MessageKind::Event(delivery.kind),
            context: delivery.context,
            subject: None,
            occurred_at: delivery.created_at,
        }
    }
}

/// Observable outcome of one delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum DeliveryResult {
    Delivered,
    /// A delivery with the same idempotency key happened within the window.
    Deduplicated,
    Failed(String),
}

impl DeliveryResult {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryResult::Delivered)
    }
}

/// Delivery counters since startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryStats {
    pub delivered: u64,
    pub failed: u64,
    pub deduplicated: u64,
}

#[derive(Debug, Default)]
struct Counters {
    delivered: AtomicU64,
    failed: AtomicU64,
    deduplicated: AtomicU64,
}

/// Transport status as seen by the notifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransportStatus {
    pub configured: bool,
    pub reachable: bool,
    pub provider: Option<String>,
    pub message: String,
}

/// Derive the idempotency key of a request.
///
/// sha256 over recipient, message kind, a canonical context fingerprint and
/// the `bucket`-sized time slot of `occurred_at`, hex encoded.
pub fn idempotency_key(request: &DeliveryRequest, bucket: Duration) -> String {
    let bucket_secs = bucket.as_secs().max(1) as i64;
    let slot = request.occurred_at.timestamp().div_euclid(bucket_secs);
    // serde_json maps are ordered, so equal contexts serialise identically.
    let fingerprint = request.context.to_string();

    let mut hasher = Sha256::new();
    hasher.update(request.recipient.as_bytes());
    hasher.update([0u8]);
    hasher.update(request.kind.template_name().as_bytes());
    hasher.update([0u8]);
    hasher.update(fingerprint.as_bytes());
    hasher.update([0u8]);
    if let Some(subject) = &request.subject {
        hasher.update(subject.as_bytes());
    }
    hasher.update([0u8]);
    hasher.update(slot.to_be_bytes());
    format!("{:x}", hasher.finalize())
}

/// Sends resolved messages through the configured transport.
pub struct Notifier {
    provider: Option<Arc<dyn EmailProvider>>,
    renderer: Arc<dyn MessageRenderer>,
    retry: RetryPolicy,
    dedup: DedupPolicy,
    recent: Mutex<HashMap<String, DateTime<Utc>>>,
    counters: Counters,
}

impl Notifier {
    pub fn new(provider: Option<Arc<dyn EmailProvider>>, renderer: Arc<dyn MessageRenderer>) -> Self {
        Self {
            provider,
            renderer,
            retry: RetryPolicy::default(),
            dedup: DedupPolicy::default(),
            recent: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_dedup_policy(mut self, dedup: DedupPolicy) -> Self {
        self.dedup = dedup;
        self
    }

    pub fn stats(&self) -> DeliveryStats {
        DeliveryStats {
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            deduplicated: self.counters.deduplicated.load(Ordering::Relaxed),
        }
    }

    /// Deliver in the background; the handle resolves to the outcome.
    pub fn spawn_delivery(self: &Arc<Self>, request: DeliveryRequest) -> JoinHandle<DeliveryResult> {
        let notifier = Arc::clone(self);
        tokio::spawn(async move { notifier.deliver(request).await })
    }

    /// Render and send one message.
    ///
    /// Never blocks longer than `max_attempts` transport timeouts plus the
    /// backoff between them.
    pub async fn deliver(&self, request: DeliveryRequest) -> DeliveryResult {
        let Some(provider) = self.provider.as_ref() else {
            warn!(recipient = %request.recipient, kind = %request.kind, "Email transport not configured, skipping delivery");
            return self.failed(UNCONFIGURED.to_string());
        };

        let key = idempotency_key(&request, self.dedup.bucket);
        if !self.reserve(&key).await {
            debug!(recipient = %request.recipient, kind = %request.kind, key = %key, "Duplicate delivery suppressed");
            self.counters.deduplicated.fetch_add(1, Ordering::Relaxed);
            return DeliveryResult::Deduplicated;
        }

        let rendered = match self.renderer.render(request.kind, &request.context) {
            Ok(rendered) => rendered,
            Err(e) => {
                error!(recipient = %request.recipient, kind = %request.kind, error = %e, "Failed to render email");
                self.release(&key).await;
                return self.failed(e.to_string());
            }
        };

        let subject = request.subject.as_deref().unwrap_or(&rendered.subject);
        let email = EmailContent::new(&request.recipient, subject)
            .with_bodies(rendered.html, rendered.text)
            .with_cc(request.cc.clone())
            .with_idempotency_key(key.clone());

        match self.send_with_retry(provider.as_ref(), &email).await {
            Ok(attempts) => {
                info!(
                    recipient = %request.recipient,
                    cc = ?request.cc,
                    kind = %request.kind,
                    provider = provider.name(),
                    attempts,
                    "Email delivered"
                );
                self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                DeliveryResult::Delivered
            }
            Err(e) => {
                error!(
                    recipient = %request.recipient,
                    kind = %request.kind,
                    provider = provider.name(),
                    error = %e,
                    "Email delivery failed"
                );
                self.release(&key).await;
                self.failed(e.to_string())
            }
        }
    }

    /// Returns the number of attempts used on success.
    async fn send_with_retry(
        &self,
        provider: &dyn EmailProvider,
        email: &EmailContent,
    ) -> Result<u32, NotificationError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let outcome = match tokio::time::timeout(self.retry.send_timeout, provider.send(email)).await {
                Ok(result) => result,
                Err(_) => Err(NotificationError::TransientDelivery(format!(
                    "send timed out after {:?}",
                    self.retry.send_timeout
                ))),
            };

            match outcome {
                Ok(sent) if sent.accepted => {
                    debug!(to = %email.to_email, message_id = ?sent.message_id, attempt, "Transport accepted message");
                    return Ok(attempt);
                }
                Ok(sent) => {
                    return Err(NotificationError::Provider(format!(
                        "Transport did not accept message {}",
                        sent.message_id.as_deref().unwrap_or("without id")
                    )));
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.retry.delay_for(attempt - 1);
                    warn!(
                        to = %email.to_email,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient delivery failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Claim `key` unless it was used within the window. Expired keys are pruned.
    async fn reserve(&self, key: &str) -> bool {
        let now = Utc::now();
        let window = chrono::Duration::from_std(self.dedup.window).unwrap_or(chrono::Duration::zero());

        let mut recent = self.recent.lock().await;
        recent.retain(|_, seen| now.signed_duration_since(*seen) < window);
        if recent.contains_key(key) {
            return false;
        }
        recent.insert(key.to_string(), now);
        true
    }

    async fn release(&self, key: &str) {
        self.recent.lock().await.remove(key);
    }

    fn failed(&self, reason: String) -> DeliveryResult {
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
        DeliveryResult::Failed(reason)
    }

    /// Configuration and reachability of the transport.
    pub async fn transport_status(&self) -> TransportStatus {
        match &self.provider {
            None => TransportStatus {
                configured: false,
                reachable: false,
                provider: None,
                message: "Email service is not configured".to_string(),
            },
            Some(provider) => {
                let reachable = match tokio::time::timeout(self.retry.send_timeout, provider.health_check()).await {
                    Ok(Ok(healthy)) => healthy,
                    Ok(Err(e)) => {
                        warn!(provider = provider.name(), error = %e, "Email transport health check failed");
                        false
                    }
                    Err(_) => false,
                };
                TransportStatus {
                    configured: true,
                    reachable,
                    provider: Some(provider.name().to_string()),
                    message: "Email service is configured".to_string(),
                }
            }
        }
    }
}
