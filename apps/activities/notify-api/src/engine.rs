//! Wiring of store, accumulator, notifier, scheduler and roster.

use domain_notifications::{
    DigestAccumulator, DispatchScheduler, EmailProvider, EngineState, InMemoryActivityDirectory,
    InMemoryPreferenceStore, NotificationService, Notifier, NotifyConfig, SchedulerState,
    SmtpProvider, TemplateEngine,
};
use eyre::WrapErr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::seed;

/// Everything the HTTP surface and the CLI commands share.
pub struct Engine {
    pub service: Arc<NotificationService>,
    pub roster: InMemoryActivityDirectory,
    pub scheduler: Arc<DispatchScheduler>,
    state_file: Option<PathBuf>,
}

impl Engine {
    /// Build the engine, restoring the snapshot at `NOTIFY_STATE_FILE` if one exists.
    pub async fn build(config: &NotifyConfig) -> eyre::Result<Self> {
        let provider: Option<Arc<dyn EmailProvider>> = match &config.smtp {
            Some(smtp) => {
                let provider = SmtpProvider::new(smtp.clone()).wrap_err("Failed to create SMTP transport")?;
                info!(host = %smtp.host, port = smtp.port, tls = smtp.use_tls, "SMTP transport configured");
                Some(Arc::new(provider))
            }
            None => {
                warn!("SMTP_HOST not set, email delivery is disabled");
                None
            }
        };

        let renderer = Arc::new(TemplateEngine::new().wrap_err("Failed to load email templates")?);
        let notifier = Notifier::new(provider, renderer)
            .with_retry_policy(config.retry)
            .with_dedup_policy(config.dedup);

        let store = Arc::new(InMemoryPreferenceStore::new());
        let accumulator = Arc::new(DigestAccumulator::new());

        let mut scheduler_state = SchedulerState::default();
        if let Some(path) = &config.state_file {
            let snapshot = EngineState::load(path)
                .await
                .wrap_err_with(|| format!("Failed to read state file {}", path.display()))?;
            if let Some(snapshot) = snapshot {
                scheduler_state = snapshot.apply(store.as_ref(), &accumulator).await?;
            }
        }

        let service = Arc::new(
            NotificationService::new(store, accumulator, Arc::new(notifier))
                .with_portal_url(config.portal_url.clone()),
        );
        let roster = seed::roster();
        let scheduler = Arc::new(
            DispatchScheduler::new(service.clone(), Arc::new(roster.clone()), config.scheduler)
                .with_state(scheduler_state),
        );

        Ok(Self {
            service,
            roster,
            scheduler,
            state_file: config.state_file.clone(),
        })
    }

    /// Whether scheduler markers and buffered digests survive a restart.
    pub fn persists_state(&self) -> bool {
        self.state_file.is_some()
    }

    /// Write the snapshot if a state file is configured.
    pub async fn save_state(&self) -> eyre::Result<()> {
        let Some(path) = &self.state_file else {
            return Ok(());
        };

        let state = EngineState::capture(
            self.service.store().as_ref(),
            self.service.accumulator(),
            self.scheduler.state().await,
        )
        .await?;
        state
            .save(path)
            .await
            .wrap_err_with(|| format!("Failed to write state file {}", path.display()))
    }
}
