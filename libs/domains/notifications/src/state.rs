//! JSON snapshot of the engine's mutable state.
//!
//! Preferences are stored as flat records keyed by lowercase email and digest
//! buckets keep their event order, so a restart loses nothing that was saved.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::digest::{DigestAccumulator, DigestBucket};
use crate::error::NotificationResult;
use crate::models::PreferenceRecord;
use crate::repository::PreferenceStore;
use crate::scheduler::SchedulerState;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineState {
    #[serde(default)]
    pub preferences: Vec<PreferenceRecord>,
    #[serde(default)]
    pub buckets: Vec<DigestBucket>,
    #[serde(default)]
    pub scheduler: SchedulerState,
}

impl EngineState {
    /// Capture the current state of the engine.
    pub async fn capture(
        store: &dyn PreferenceStore,
        accumulator: &DigestAccumulator,
        scheduler: SchedulerState,
    ) -> NotificationResult<Self> {
        Ok(Self {
            preferences: store.list().await?,
            buckets: accumulator.export().await,
            scheduler,
        })
    }

    /// Load a snapshot. A missing file is not an error.
    pub async fn load(path: &Path) -> NotificationResult<Option<Self>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let state: EngineState = serde_json::from_slice(&bytes)?;
                info!(
                    path = %path.display(),
                    preferences = state.preferences.len(),
                    buckets = state.buckets.len(),
                    "Loaded engine state"
                );
                Ok(Some(state))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write the snapshot atomically (temp file then rename).
    pub async fn save(&self, path: &Path) -> NotificationResult<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        info!(
            path = %path.display(),
            preferences = self.preferences.len(),
            buckets = self.buckets.len(),
            "Saved engine state"
        );
        Ok(())
    }

    /// Push preferences and buckets into a store and accumulator.
    /// The scheduler markers are handed back to the caller.
    pub async fn apply(
        self,
        store: &dyn PreferenceStore,
        accumulator: &DigestAccumulator,
    ) -> NotificationResult<SchedulerState> {
        for record in self.preferences {
            store.put(record).await?;
        }
        accumulator.restore(self.buckets).await;
        Ok(self.scheduler)
    }
}
