//! Notification service: the inbound surface of the dispatch engine.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::digest::{DigestAccumulator, DigestBucket};
use crate::error::{NotificationError, NotificationResult};
use crate::models::{
    is_plausible_email, normalize_email, BatchAnnouncement, DigestClass, DispatchDecision,
    MessageKind, NotificationEvent, NotificationKind, PreferenceRecord,
};
use crate::notifier::{DeliveryRequest, DeliveryResult, DeliveryStats, Notifier, TransportStatus};
use crate::repository::PreferenceStore;
use crate::resolver::{PreferenceResolver, ResolvePath};
use crate::roster::Activity;

/// Counts of what happened to the recipients of a dispatch or flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchTally {
    pub delivered: usize,
    pub failed: usize,
    pub deduplicated: usize,
    pub buffered: usize,
    pub suppressed: usize,
    /// Buffered events discarded because the recipient opted out before the flush.
    pub dropped: usize,
}

impl DispatchTally {
    fn record(&mut self, result: &DeliveryResult) {
        match result {
            DeliveryResult::Delivered => self.delivered += 1,
            DeliveryResult::Deduplicated => self.deduplicated += 1,
            DeliveryResult::Failed(_) => self.failed += 1,
        }
    }

    pub fn merge(&mut self, other: DispatchTally) {
        self.delivered += other.delivered;
        self.failed += other.failed;
        self.deduplicated += other.deduplicated;
        self.buffered += other.buffered;
        self.suppressed += other.suppressed;
        self.dropped += other.dropped;
    }
}

/// Outcome of a batch announcement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub sent: usize,
    pub failed: usize,
    /// Recipients skipped because they switched all email off.
    pub suppressed: usize,
}

/// Events waiting per digest class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PendingDigests {
    pub daily: usize,
    pub weekly: usize,
}

/// Snapshot returned by the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    #[serde(flatten)]
    pub transport: TransportStatus,
    pub pending_digests: PendingDigests,
    pub deliveries: DeliveryStats,
}

/// Dispatch engine facade used by the roster API and the scheduler.
pub struct NotificationService {
    resolver: PreferenceResolver,
    accumulator: Arc<DigestAccumulator>,
    notifier: Arc<Notifier>,
    portal_url: String,
}

impl NotificationService {
    pub fn new(
        store: Arc<dyn PreferenceStore>,
        accumulator: Arc<DigestAccumulator>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            resolver: PreferenceResolver::new(store),
            accumulator,
            notifier,
            portal_url: "http://localhost:8000".to_string(),
        }
    }

    pub fn with_portal_url(mut self, portal_url: impl Into<String>) -> Self {
        self.portal_url = portal_url.into();
        self
    }

    pub fn store(&self) -> &Arc<dyn PreferenceStore> {
        self.resolver.store()
    }

    pub fn accumulator(&self) -> &Arc<DigestAccumulator> {
        &self.accumulator
    }

    pub fn notifier(&self) -> &Arc<Notifier> {
        &self.notifier
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Resolve an event and act on every decision without waiting for delivery.
    ///
    /// Immediate sends run as background tasks; the caller only waits for the
    /// preference lookup and the digest append.
    #[instrument(skip(self, event), fields(event_id = %event.id, kind = %event.kind))]
    pub async fn submit(&self, event: NotificationEvent) -> NotificationResult<Vec<DispatchDecision>> {
        let decisions = self.resolver.resolve(&event, ResolvePath::Ordinary).await?;

        for decision in &decisions {
            match decision {
                DispatchDecision::SendNow(delivery) => {
                    // Detached: the notifier logs and counts the outcome.
                    drop(self.notifier.spawn_delivery(delivery.clone().into()));
                }
                DispatchDecision::BufferForDigest { recipient, class, event } => {
                    self.accumulator.buffer(recipient, *class, event.clone()).await;
                }
                DispatchDecision::Suppress { .. } => {}
            }
        }

        info!(recipients = decisions.len(), "Event dispatched");
        Ok(decisions)
    }

    /// Resolve an event and wait for every immediate delivery. Used by sweeps.
    pub async fn dispatch_and_wait(
        &self,
        event: &NotificationEvent,
        path: ResolvePath,
    ) -> NotificationResult<DispatchTally> {
        let decisions = self.resolver.resolve(event, path).await?;
        let mut tally = DispatchTally::default();
        let mut sends = Vec::new();

        for decision in decisions {
            match decision {
                DispatchDecision::SendNow(delivery) => sends.push(self.notifier.deliver(delivery.into())),
                DispatchDecision::BufferForDigest { recipient, class, event } => {
                    self.accumulator.buffer(&recipient, class, event).await;
                    tally.buffered += 1;
                }
                DispatchDecision::Suppress { .. } => tally.suppressed += 1,
            }
        }

        for result in join_all(sends).await {
            tally.record(&result);
        }
        Ok(tally)
    }

    /// Take every bucket of `class` and send one aggregated message per recipient.
    ///
    /// CC follows the recipient's record at flush time. Recipients who have
    /// since switched everything off get nothing and their events are dropped,
    /// as are events whose category was revoked after buffering.
    #[instrument(skip(self), fields(class = %class))]
    pub async fn flush_digests(
        &self,
        class: DigestClass,
        occurred_at: DateTime<Utc>,
    ) -> NotificationResult<DispatchTally> {
        let batch = self.accumulator.flush(class).await;
        let mut tally = DispatchTally::default();
        if batch.is_empty() {
            debug!("No pending digests");
            return Ok(tally);
        }

        let recipients: Vec<String> = batch.digests.iter().map(|d| d.recipient.clone()).collect();
        let records = match self.store().get_many(&recipients).await {
            Ok(records) => records,
            Err(e) => {
                // Put the batch back so the next flush retries it.
                let buckets = batch
                    .digests
                    .into_iter()
                    .map(|d| DigestBucket {
                        recipient: d.recipient,
                        class: d.class,
                        pending_events: d.events,
                    })
                    .collect();
                self.accumulator.restore(buckets).await;
                return Err(e);
            }
        };

        let recipient_count = batch.digests.len();
        let event_count = batch.event_count();
        let mut sends = Vec::new();
        for (mut digest, record) in batch.digests.into_iter().zip(records.iter()) {
            if record.is_silenced() {
                info!(recipient = %digest.recipient, events = digest.events.len(), "Dropping digest for opted-out recipient");
                tally.dropped += digest.events.len();
                continue;
            }

            let buffered = digest.events.len();
            digest.events.retain(|event| record.accepts_buffered(event.kind));
            let revoked = buffered - digest.events.len();
            if revoked > 0 {
                info!(recipient = %digest.recipient, events = revoked, "Dropping buffered events no longer wanted");
                tally.dropped += revoked;
            }
            if digest.events.is_empty() {
                continue;
            }

            let request = DeliveryRequest::digest(
                &digest.recipient,
                record.cc_address(),
                class,
                digest.summary_context(),
                occurred_at,
            );
            sends.push(self.notifier.deliver(request));
        }

        for result in join_all(sends).await {
            tally.record(&result);
        }

        info!(
            recipients = recipient_count,
            events = event_count,
            delivered = tally.delivered,
            failed = tally.failed,
            "Digest flush complete"
        );
        Ok(tally)
    }

    // ------------------------------------------------------------------
    // Event constructors
    // ------------------------------------------------------------------

    pub async fn signup_confirmation(
        &self,
        student_email: &str,
        activity: &Activity,
    ) -> NotificationResult<Vec<DispatchDecision>> {
        let event = NotificationEvent::new(
            NotificationKind::SignupConfirmation,
            [student_email],
            json!({
                "activity_name": activity.name,
                "schedule": activity.schedule,
                "description": activity.description,
            }),
        );
        self.submit(event).await
    }

    pub async fn unregister_confirmation(
        &self,
        student_email: &str,
        activity: &Activity,
    ) -> NotificationResult<Vec<DispatchDecision>> {
        let event = NotificationEvent::new(
            NotificationKind::UnregisterConfirmation,
            [student_email],
            json!({
                "activity_name": activity.name,
                "schedule": activity.schedule,
            }),
        );
        self.submit(event).await
    }

    pub async fn activity_changed(
        &self,
        recipients: &[String],
        activity_name: &str,
        change_description: &str,
        new_schedule: Option<&str>,
    ) -> NotificationResult<Vec<DispatchDecision>> {
        let event = NotificationEvent::new(
            NotificationKind::ActivityChanges,
            recipients,
            json!({
                "activity_name": activity_name,
                "change_description": change_description,
                "new_schedule": new_schedule,
            }),
        );
        self.submit(event).await
    }

    /// Announce an activity. Without explicit recipients, everyone with a
    /// stored, enabled record that accepts `new_activities` is notified.
    pub async fn announce_new_activity(
        &self,
        activity: &Activity,
        recipients: Option<Vec<String>>,
    ) -> NotificationResult<Vec<DispatchDecision>> {
        let recipients = match recipients {
            Some(recipients) => recipients,
            None => self
                .store()
                .list()
                .await?
                .into_iter()
                .filter(|r| r.enabled && r.allows(NotificationKind::NewActivities))
                .map(|r| r.email)
                .collect(),
        };

        let event = NotificationEvent::new(
            NotificationKind::NewActivities,
            recipients,
            json!({
                "activity_name": activity.name,
                "schedule": activity.schedule,
                "description": activity.description,
                "max_participants": activity.max_participants,
                "portal_url": self.portal_url,
            }),
        );
        self.submit(event).await
    }

    pub async fn attendance(
        &self,
        recipient: &str,
        student_name: &str,
        activity_name: &str,
        date: &str,
        attendance_status: &str,
        note: Option<&str>,
    ) -> NotificationResult<Vec<DispatchDecision>> {
        let event = NotificationEvent::new(
            NotificationKind::Attendance,
            [recipient],
            json!({
                "student_name": student_name,
                "activity_name": activity_name,
                "date": date,
                "attendance_status": attendance_status,
                "note": note,
            }),
        );
        self.submit(event).await
    }

    /// Send an administrator's message to every listed recipient and wait
    /// for the outcome.
    ///
    /// Category flags do not apply to announcements; recipients with the
    /// master switch off or `frequency=disabled` are still skipped.
    #[instrument(skip(self, batch), fields(template = %batch.template_name))]
    pub async fn send_batch(&self, batch: BatchAnnouncement) -> NotificationResult<BatchReport> {
        let kind = MessageKind::from_template_name(&batch.template_name).ok_or_else(|| {
            NotificationError::InvalidRequest(format!("Unknown template: {}", batch.template_name))
        })?;

        let mut recipients: Vec<String> = Vec::with_capacity(batch.recipients.len());
        for recipient in batch.recipients.iter().map(|r| normalize_email(r)) {
            if !recipient.is_empty() && !recipients.contains(&recipient) {
                recipients.push(recipient);
            }
        }
        if recipients.is_empty() {
            return Err(NotificationError::InvalidRequest("No recipients specified".to_string()));
        }

        let subject = batch.subject.trim();
        if subject.is_empty() {
            return Err(NotificationError::InvalidRequest("Subject is required".to_string()));
        }

        let mut context = match batch.context {
            Value::Null => json!({}),
            Value::Object(map) => Value::Object(map),
            _ => {
                return Err(NotificationError::InvalidRequest(
                    "Context must be a JSON object".to_string(),
                ))
            }
        };
        if let Value::Object(map) = &mut context {
            map.entry("subject").or_insert_with(|| json!(subject));
        }

        let records = self.store().get_many(&recipients).await?;
        let occurred_at = Utc::now();
        let mut report = BatchReport {
            total: recipients.len(),
            ..BatchReport::default()
        };

        let mut sends = Vec::new();
        for (recipient, record) in recipients.iter().zip(records.iter()) {
            if record.is_silenced() {
                debug!(recipient = %recipient, "Skipping announcement for opted-out recipient");
                report.suppressed += 1;
                continue;
            }
            let request = DeliveryRequest::announcement(recipient, kind, subject, context.clone(), occurred_at);
            sends.push(self.notifier.deliver(request));
        }

        for result in join_all(sends).await {
            match result {
                DeliveryResult::Delivered | DeliveryResult::Deduplicated => report.sent += 1,
                DeliveryResult::Failed(_) => report.failed += 1,
            }
        }

        info!(
            total = report.total,
            sent = report.sent,
            failed = report.failed,
            suppressed = report.suppressed,
            "Batch announcement complete"
        );
        Ok(report)
    }

    // ------------------------------------------------------------------
    // Preferences
    // ------------------------------------------------------------------

    pub async fn get_preferences(&self, email: &str) -> NotificationResult<PreferenceRecord> {
        self.store().get(email).await
    }

    pub async fn list_preferences(&self) -> NotificationResult<Vec<PreferenceRecord>> {
        self.store().list().await
    }

    /// Validate and store a record.
    pub async fn update_preferences(&self, record: PreferenceRecord) -> NotificationResult<PreferenceRecord> {
        if !is_plausible_email(&record.email) {
            return Err(NotificationError::InvalidEmail(record.email));
        }
        if let Some(parent) = record.parent_email.as_deref().filter(|p| !p.trim().is_empty()) {
            if !is_plausible_email(parent) {
                return Err(NotificationError::InvalidEmail(parent.to_string()));
            }
        }
        self.store().put(record).await
    }

    pub async fn delete_preferences(&self, email: &str) -> NotificationResult<()> {
        if self.store().delete(email).await? {
            Ok(())
        } else {
            Err(NotificationError::NotFound(format!(
                "No preferences stored for {}",
                normalize_email(email)
            )))
        }
    }

    // ------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------

    pub async fn status(&self) -> ServiceStatus {
        ServiceStatus {
            transport: self.notifier.transport_status().await,
            pending_digests: PendingDigests {
                daily: self.accumulator.pending_count(DigestClass::Daily).await,
                weekly: self.accumulator.pending_count(DigestClass::Weekly).await,
            },
            deliveries: self.notifier.stats(),
        }
    }
}
