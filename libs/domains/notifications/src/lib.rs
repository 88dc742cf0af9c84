//! Notifications Domain
//!
//! Preference-aware dispatch of activity notifications for Mergington High
//! School: every event is checked against the recipient's stored email
//! preferences, then sent at once, buffered for a daily/weekly digest, or
//! suppressed.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  Activity Event │  ← signup, unregister, changes, attendance, ...
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │    Resolver     │  ← PreferenceStore lookup, one decision per recipient
//! └───┬─────────┬───┘
//!     │         │
//!     │  ┌──────▼──────┐
//!     │  │ Accumulator │  ← per (recipient, daily|weekly) buckets
//!     │  └──────▲──────┘
//!     │         │ flush
//!     │  ┌──────┴──────┐
//!     │  │  Scheduler  │  ← daily reminders + digest, weekly digest + summary
//!     │  └──────┬──────┘
//!     │         │
//! ┌───▼─────────▼───┐
//! │    Notifier     │  ← render, dedup, retry with backoff
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │ Email Provider  │  ← SMTP, or unconfigured
//! └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use domain_notifications::{
//!     DigestAccumulator, InMemoryPreferenceStore, Notifier, NotificationService, TemplateEngine,
//! };
//!
//! let notifier = Arc::new(Notifier::new(provider, Arc::new(TemplateEngine::new()?)));
//! let service = NotificationService::new(
//!     Arc::new(InMemoryPreferenceStore::new()),
//!     Arc::new(DigestAccumulator::new()),
//!     notifier,
//! );
//!
//! service.signup_confirmation("student@mergington.edu", &activity).await?;
//! ```

pub mod config;
pub mod digest;
pub mod error;
pub mod models;
pub mod notifier;
pub mod providers;
pub mod repository;
pub mod resolver;
pub mod roster;
pub mod scheduler;
pub mod service;
pub mod state;
pub mod templates;

// Re-export commonly used types
pub use config::NotifyConfig;
pub use digest::{DigestAccumulator, DigestBatch, DigestBucket, RecipientDigest};
pub use error::{NotificationError, NotificationResult};
pub use models::{
    BatchAnnouncement, DigestClass, DispatchDecision, Frequency, ImmediateDelivery, MessageKind,
    NotificationEvent, NotificationKind, PendingEvent, PreferenceRecord, SuppressReason,
};
pub use notifier::{DedupPolicy, DeliveryResult, Notifier, RetryPolicy, TransportStatus};
pub use providers::{EmailProvider, MockEmailProvider, SmtpConfig, SmtpProvider};
pub use repository::{InMemoryPreferenceStore, PreferenceStore};
pub use resolver::{PreferenceResolver, ResolvePath};
pub use roster::{Activity, ActivityDirectory, InMemoryActivityDirectory, MeetingSlot};
pub use scheduler::{DispatchScheduler, SchedulerConfig, SchedulerState, SweepJob, SweepReport};
pub use service::{BatchReport, DispatchTally, NotificationService, ServiceStatus};
pub use state::EngineState;
pub use templates::{MessageRenderer, TemplateEngine};
