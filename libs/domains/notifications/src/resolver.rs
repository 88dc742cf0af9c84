//! Per-recipient dispatch decisions.
//!
//! The decision itself is a pure function of `(record, event, path)`; the
//! store is only consulted to fetch one consistent snapshot of the records
//! for all recipients of an event.

use std::sync::Arc;

use tracing::debug;

use crate::error::NotificationResult;
use crate::models::{
    DispatchDecision, Frequency, ImmediateDelivery, NotificationEvent, NotificationKind,
    PreferenceRecord, SuppressReason,
};
use crate::repository::PreferenceStore;

/// How an event reached the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvePath {
    /// Raised by the roster or an admin action.
    Ordinary,
    /// Synthesised by the weekly sweep; `weekly_digest` is only accepted here.
    Scheduled,
}

/// Applies preference rules to events.
#[derive(Clone)]
pub struct PreferenceResolver {
    store: Arc<dyn PreferenceStore>,
}

impl PreferenceResolver {
    pub fn new(store: Arc<dyn PreferenceStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn PreferenceStore> {
        &self.store
    }

    /// Resolve every recipient of `event`, one decision per recipient in order.
    pub async fn resolve(
        &self,
        event: &NotificationEvent,
        path: ResolvePath,
    ) -> NotificationResult<Vec<DispatchDecision>> {
        let records = self.store.get_many(&event.recipients).await?;

        Ok(event
            .recipients
            .iter()
            .zip(records.iter())
            .map(|(recipient, record)| decide(record, recipient, event, path))
            .collect())
    }
}

/// Decide what happens to one recipient of an event.
pub fn decide(
    record: &PreferenceRecord,
    recipient: &str,
    event: &NotificationEvent,
    path: ResolvePath,
) -> DispatchDecision {
    let suppress = |reason: SuppressReason| {
        debug!(recipient = %recipient, kind = %event.kind, reason = %reason, "Suppressed notification");
        DispatchDecision::Suppress {
            recipient: recipient.to_string(),
            reason,
        }
    };

    if !record.enabled {
        return suppress(SuppressReason::MasterSwitchOff);
    }
    if record.frequency == Frequency::Disabled {
        return suppress(SuppressReason::FrequencyDisabled);
    }

    let is_summary = event.kind == NotificationKind::WeeklyDigest;
    if is_summary && path == ResolvePath::Ordinary {
        return suppress(SuppressReason::ScheduledKindOnly);
    }
    if record.digest_only && !is_summary {
        return suppress(SuppressReason::DigestOnly);
    }
    if !record.allows(event.kind) {
        return suppress(SuppressReason::CategoryOptedOut);
    }

    let send_now = || {
        DispatchDecision::SendNow(ImmediateDelivery {
            recipient: recipient.to_string(),
            kind: event.kind,
            context: event.context.clone(),
            cc: record.cc_address(),
            created_at: event.created_at,
        })
    };

    // The weekly summary is itself the scheduled delivery and is never buffered.
    if is_summary {
        return send_now();
    }

    match record.frequency.digest_class() {
        Some(class) => DispatchDecision::BufferForDigest {
            recipient: recipient.to_string(),
            class,
            event: event.pending(),
        },
        None => send_now(),
    }
}
