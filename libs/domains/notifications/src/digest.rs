//! Digest accumulator: buffers events per (recipient, class) until a flush.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::models::{normalize_email, DigestClass, NotificationKind, PendingEvent};

/// A recoverable bucket: one recipient's pending events for one class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigestBucket {
    pub recipient: String,
    pub class: DigestClass,
    pub pending_events: Vec<PendingEvent>,
}

/// Everything drained from one recipient's bucket by a flush.
#[derive(Debug, Clone, PartialEq)]
pub struct RecipientDigest {
    pub recipient: String,
    pub class: DigestClass,
    /// Arrival order.
    pub events: Vec<PendingEvent>,
}

impl RecipientDigest {
    /// Events grouped by kind. Groups are ordered by the first arrival of
    /// their kind; events inside a group keep arrival order.
    pub fn grouped(&self) -> Vec<(NotificationKind, Vec<&PendingEvent>)> {
        let mut groups: Vec<(NotificationKind, Vec<&PendingEvent>)> = Vec::new();
        for event in &self.events {
            match groups.iter_mut().find(|(kind, _)| *kind == event.kind) {
                Some((_, items)) => items.push(event),
                None => groups.push((event.kind, vec![event])),
            }
        }
        groups
    }

    /// Template variables for the aggregated digest message.
    pub fn summary_context(&self) -> Value {
        let groups: Vec<Value> = self
            .grouped()
            .into_iter()
            .map(|(kind, items)| {
                json!({
                    "kind": kind,
                    "count": items.len(),
                    "items": items.iter().map(|e| e.context.clone()).collect::<Vec<_>>(),
                })
            })
            .collect();

        json!({
            "recipient": self.recipient,
            "class": self.class,
            "count": self.events.len(),
            "groups": groups,
        })
    }
}

/// Result of flushing one digest class.
#[derive(Debug, Clone, PartialEq)]
pub struct DigestBatch {
    pub class: DigestClass,
    /// One entry per recipient with at least one pending event, ordered by recipient.
    pub digests: Vec<RecipientDigest>,
}

impl DigestBatch {
    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }

    pub fn event_count(&self) -> usize {
        self.digests.iter().map(|d| d.events.len()).sum()
    }
}

type Buckets = HashMap<DigestClass, HashMap<String, Vec<PendingEvent>>>;

/// Shared buffer of events awaiting a digest flush.
///
/// `buffer` and `flush` serialise on one lock, so every buffered event lands
/// either in the batch being flushed or in the bucket left behind for the
/// next flush.
#[derive(Debug, Default)]
pub struct DigestAccumulator {
    buckets: Mutex<Buckets>,
}

impl DigestAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event to the (recipient, class) bucket, creating it if needed.
    pub async fn buffer(&self, recipient: &str, class: DigestClass, event: PendingEvent) {
        let recipient = normalize_email(recipient);
        let mut buckets = self.buckets.lock().await;
        buckets
            .entry(class)
            .or_default()
            .entry(recipient)
            .or_default()
            .push(event);
    }

    /// Take and clear every bucket of `class`. Buckets are kept (empty) for reuse;
    /// empty buckets produce no digest.
    pub async fn flush(&self, class: DigestClass) -> DigestBatch {
        let mut digests: Vec<RecipientDigest> = {
            let mut buckets = self.buckets.lock().await;
            match buckets.get_mut(&class) {
                Some(by_recipient) => by_recipient
                    .iter_mut()
                    .filter(|(_, events)| !events.is_empty())
                    .map(|(recipient, events)| RecipientDigest {
                        recipient: recipient.clone(),
                        class,
                        events: std::mem::take(events),
                    })
                    .collect(),
                None => Vec::new(),
            }
        };

        digests.sort_by(|a, b| a.recipient.cmp(&b.recipient));
        DigestBatch { class, digests }
    }

    /// Number of events waiting in `class`.
    pub async fn pending_count(&self, class: DigestClass) -> usize {
        let buckets = self.buckets.lock().await;
        buckets
            .get(&class)
            .map(|by_recipient| by_recipient.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// Snapshot of all non-empty buckets, ordered by class then recipient.
    pub async fn export(&self) -> Vec<DigestBucket> {
        let buckets = self.buckets.lock().await;
        let mut out: Vec<DigestBucket> = buckets
            .iter()
            .flat_map(|(class, by_recipient)| {
                by_recipient
                    .iter()
                    .filter(|(_, events)| !events.is_empty())
                    .map(|(recipient, events)| DigestBucket {
                        recipient: recipient.clone(),
                        class: *class,
                        pending_events: events.clone(),
                    })
            })
            .collect();
        out.sort_by(|a, b| (a.class, &a.recipient).cmp(&(b.class, &b.recipient)));
        out
    }

    /// Put buckets back. Restored events are older than anything buffered
    /// since, so they go in front.
    pub async fn restore(&self, restored: Vec<DigestBucket>) {
        let mut buckets = self.buckets.lock().await;
        for bucket in restored {
            let existing = buckets
                .entry(bucket.class)
                .or_default()
                .entry(normalize_email(&bucket.recipient))
                .or_default();
            let mut events = bucket.pending_events;
            events.append(existing);
            *existing = events;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashSet;
    use std::sync::Arc;
    use uuid::Uuid;

    fn pending(kind: NotificationKind, label: &str) -> PendingEvent {
        PendingEvent {
            event_id: Uuid::new_v4(),
            kind,
            context: json!({ "activity_name": label }),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_flush_empty_is_noop() {
        let acc = DigestAccumulator::new();
        assert!(acc.flush(DigestClass::Daily).await.is_empty());

        acc.buffer("a@x.edu", DigestClass::Daily, pending(NotificationKind::Reminders, "Chess"))
            .await;
        assert_eq!(acc.flush(DigestClass::Daily).await.digests.len(), 1);

        let again = acc.flush(DigestClass::Daily).await;
        assert!(again.is_empty());
        assert_eq!(acc.pending_count(DigestClass::Daily).await, 0);
    }

    #[tokio::test]
    async fn test_flush_only_touches_its_class() {
        let acc = DigestAccumulator::new();
        acc.buffer("a@x.edu", DigestClass::Daily, pending(NotificationKind::Reminders, "Chess"))
            .await;
        acc.buffer("a@x.edu", DigestClass::Weekly, pending(NotificationKind::Attendance, "Chess"))
            .await;

        let batch = acc.flush(DigestClass::Weekly).await;
        assert_eq!(batch.event_count(), 1);
        assert_eq!(acc.pending_count(DigestClass::Daily).await, 1);
    }

    #[tokio::test]
    async fn test_two_reminders_aggregate_in_arrival_order() {
        let acc = DigestAccumulator::new();
        acc.buffer("d@x.edu", DigestClass::Daily, pending(NotificationKind::Reminders, "Chess Club"))
            .await;
        acc.buffer("D@x.edu", DigestClass::Daily, pending(NotificationKind::Reminders, "Art Club"))
            .await;

        let batch = acc.flush(DigestClass::Daily).await;
        assert_eq!(batch.digests.len(), 1);
        let digest = &batch.digests[0];
        assert_eq!(digest.recipient, "d@x.edu");

        let context = digest.summary_context();
        assert_eq!(context["count"], 2);
        assert_eq!(context["groups"][0]["kind"], "reminders");
        assert_eq!(context["groups"][0]["items"][0]["activity_name"], "Chess Club");
        assert_eq!(context["groups"][0]["items"][1]["activity_name"], "Art Club");
    }

    #[tokio::test]
    async fn test_groups_follow_first_arrival_of_kind() {
        let digest = RecipientDigest {
            recipient: "a@x.edu".into(),
            class: DigestClass::Weekly,
            events: vec![
                pending(NotificationKind::ActivityChanges, "1"),
                pending(NotificationKind::SignupConfirmation, "2"),
                pending(NotificationKind::ActivityChanges, "3"),
            ],
        };
        let groups = digest.grouped();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, NotificationKind::ActivityChanges);
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].0, NotificationKind::SignupConfirmation);
    }

    #[tokio::test]
    async fn test_export_and_restore() {
        let acc = DigestAccumulator::new();
        acc.buffer("b@x.edu", DigestClass::Weekly, pending(NotificationKind::Reminders, "x"))
            .await;
        acc.buffer("a@x.edu", DigestClass::Daily, pending(NotificationKind::Reminders, "y"))
            .await;

        let exported = acc.export().await;
        assert_eq!(exported.len(), 2);
        assert_eq!(exported[0].class, DigestClass::Daily);

        let restored = DigestAccumulator::new();
        restored.restore(exported.clone()).await;
        assert_eq!(restored.export().await, exported);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_buffer_and_flush_neither_lose_nor_duplicate() {
        let acc = Arc::new(DigestAccumulator::new());
        let mut handles = Vec::new();
        let mut expected = HashSet::new();

        for producer in 0..8 {
            let mut ids = Vec::new();
            for _ in 0..50 {
                let event = pending(NotificationKind::Reminders, "r");
                expected.insert(event.event_id);
                ids.push(event);
            }
            let acc = acc.clone();
            handles.push(tokio::spawn(async move {
                for event in ids {
                    acc.buffer(&format!("user{}@x.edu", producer % 3), DigestClass::Daily, event)
                        .await;
                    tokio::task::yield_now().await;
                }
            }));
        }

        let flusher = {
            let acc = acc.clone();
            tokio::spawn(async move { acc.flush(DigestClass::Daily).await })
        };

        for handle in handles {
            handle.await.unwrap();
        }
        let first = flusher.await.unwrap();
        let second = acc.flush(DigestClass::Daily).await;

        let mut seen = HashSet::new();
        for digest in first.digests.iter().chain(second.digests.iter()) {
            for event in &digest.events {
                assert!(seen.insert(event.event_id), "event flushed twice");
            }
        }
        assert_eq!(seen, expected);
    }
}
