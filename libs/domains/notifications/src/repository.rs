use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::NotificationResult;
use crate::models::{normalize_email, PreferenceRecord};

/// Storage for per-recipient delivery preferences.
///
/// Lookups are case-insensitive. A miss is not an error: `get` returns the
/// default record for the address.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// Get the record for an email, or the default record when none is stored
    async fn get(&self, email: &str) -> NotificationResult<PreferenceRecord>;

    /// Get the stored record for an email, if any
    async fn find(&self, email: &str) -> NotificationResult<Option<PreferenceRecord>>;

    /// Get records for several emails from a single consistent snapshot
    async fn get_many(&self, emails: &[String]) -> NotificationResult<Vec<PreferenceRecord>>;

    /// Insert or replace a record, keyed by its normalised email
    async fn put(&self, record: PreferenceRecord) -> NotificationResult<PreferenceRecord>;

    /// Delete a record. Returns whether one existed.
    async fn delete(&self, email: &str) -> NotificationResult<bool>;

    /// List all stored records ordered by email
    async fn list(&self) -> NotificationResult<Vec<PreferenceRecord>>;
}

/// In-memory implementation of PreferenceStore
#[derive(Debug, Default, Clone)]
pub struct InMemoryPreferenceStore {
    records: Arc<RwLock<HashMap<String, PreferenceRecord>>>,
}

impl InMemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated with records (used when restoring a snapshot).
    pub fn with_records(records: impl IntoIterator<Item = PreferenceRecord>) -> Self {
        let records = records
            .into_iter()
            .map(|mut r| {
                r.email = r.key();
                (r.email.clone(), r)
            })
            .collect();
        Self {
            records: Arc::new(RwLock::new(records)),
        }
    }
}

#[async_trait]
impl PreferenceStore for InMemoryPreferenceStore {
    async fn get(&self, email: &str) -> NotificationResult<PreferenceRecord> {
        Ok(self
            .find(email)
            .await?
            .unwrap_or_else(|| PreferenceRecord::default_for(email)))
    }

    async fn find(&self, email: &str) -> NotificationResult<Option<PreferenceRecord>> {
        let records = self.records.read().await;
        Ok(records.get(&normalize_email(email)).cloned())
    }

    async fn get_many(&self, emails: &[String]) -> NotificationResult<Vec<PreferenceRecord>> {
        let records = self.records.read().await;
        Ok(emails
            .iter()
            .map(|email| {
                records
                    .get(&normalize_email(email))
                    .cloned()
                    .unwrap_or_else(|| PreferenceRecord::default_for(email))
            })
            .collect())
    }

    async fn put(&self, mut record: PreferenceRecord) -> NotificationResult<PreferenceRecord> {
        record.email = record.key();
        if let Some(parent) = record.parent_email.take() {
            let parent = normalize_email(&parent);
            record.parent_email = (!parent.is_empty()).then_some(parent);
        }

        let mut records = self.records.write().await;
        records.insert(record.email.clone(), record.clone());

        tracing::debug!(email = %record.email, frequency = %record.frequency, "Stored preferences");
        Ok(record)
    }

    async fn delete(&self, email: &str) -> NotificationResult<bool> {
        let mut records = self.records.write().await;
        Ok(records.remove(&normalize_email(email)).is_some())
    }

    async fn list(&self) -> NotificationResult<Vec<PreferenceRecord>> {
        let records = self.records.read().await;
        let mut result: Vec<PreferenceRecord> = records.values().cloned().collect();
        result.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(result)
    }
}
