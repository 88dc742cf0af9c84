//! Data models for the notifications domain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};
use uuid::Uuid;

/// Normalise an email address for use as a lookup key.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Cheap shape check for an email address: one `@` with text on both sides
/// and a dot in the domain part.
pub fn is_plausible_email(email: &str) -> bool {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

// ============================================================================
// Categories and frequencies
// ============================================================================

/// Kinds of notification a recipient can opt in to or out of.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NotificationKind {
    SignupConfirmation,
    UnregisterConfirmation,
    ActivityChanges,
    Reminders,
    /// Synthesised by the weekly sweep only; never accepted from the ordinary event path.
    WeeklyDigest,
    NewActivities,
    Attendance,
}

/// How a recipient wants to receive notifications.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Frequency {
    #[default]
    Immediate,
    Daily,
    Weekly,
    Disabled,
}

impl Frequency {
    /// The digest class a frequency batches into, if any.
    pub fn digest_class(&self) -> Option<DigestClass> {
        match self {
            Frequency::Daily => Some(DigestClass::Daily),
            Frequency::Weekly => Some(DigestClass::Weekly),
            Frequency::Immediate | Frequency::Disabled => None,
        }
    }
}

/// Batching granularity of a digest bucket.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DigestClass {
    Daily,
    Weekly,
}

/// What the renderer is asked to produce: a single-event message, an
/// aggregated digest, or a free-form announcement from an administrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum MessageKind {
    Event(NotificationKind),
    Digest(DigestClass),
    Announcement,
}

impl MessageKind {
    /// Stable template name for this message kind.
    pub fn template_name(&self) -> String {
        match self {
            MessageKind::Event(kind) => kind.to_string(),
            MessageKind::Digest(DigestClass::Daily) => "daily_digest".to_string(),
            MessageKind::Digest(DigestClass::Weekly) => "weekly_updates".to_string(),
            MessageKind::Announcement => "announcement".to_string(),
        }
    }

    /// Every message kind the renderer must know about.
    pub fn all() -> Vec<MessageKind> {
        NotificationKind::iter()
            .map(MessageKind::Event)
            .chain(DigestClass::iter().map(MessageKind::Digest))
            .chain(std::iter::once(MessageKind::Announcement))
            .collect()
    }

    /// Look a message kind up by its template name.
    pub fn from_template_name(name: &str) -> Option<MessageKind> {
        let name = name.trim().trim_end_matches(".html");
        Self::all().into_iter().find(|kind| kind.template_name() == name)
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.template_name())
    }
}

// ============================================================================
// Preference record
// ============================================================================

fn all_categories() -> BTreeSet<NotificationKind> {
    NotificationKind::iter().collect()
}

fn enabled_default() -> bool {
    true
}

/// Delivery preferences for one recipient email.
///
/// A missing record is equivalent to [`PreferenceRecord::default_for`].
/// On the wire the category set may also be given as one boolean per
/// category (`"reminders": false`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "PreferenceRecordWire", into = "PreferenceRecordWire")]
pub struct PreferenceRecord {
    /// Owner email; compared case-insensitively.
    pub email: String,
    /// Master switch. `false` suppresses every category.
    pub enabled: bool,
    pub frequency: Frequency,
    /// Enabled notification kinds. Kinds not present are suppressed.
    pub categories: BTreeSet<NotificationKind>,
    pub parent_email: Option<String>,
    pub parent_cc_enabled: bool,
    /// Only the weekly summary is delivered; everything else is suppressed.
    pub digest_only: bool,
}

/// Serialized form of [`PreferenceRecord`].
///
/// Per-category flags are applied on top of `categories` (or of every
/// category when the set is absent). Unknown fields are rejected so a
/// misspelt opt-out never passes silently.
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct PreferenceRecordWire {
    email: String,
    #[serde(default = "enabled_default")]
    enabled: bool,
    #[serde(default)]
    frequency: Frequency,
    #[serde(default)]
    categories: Option<BTreeSet<NotificationKind>>,
    #[serde(default)]
    parent_email: Option<String>,
    #[serde(default)]
    parent_cc_enabled: bool,
    #[serde(default)]
    digest_only: bool,
    #[serde(default)]
    signup_confirmation: Option<bool>,
    #[serde(default)]
    unregister_confirmation: Option<bool>,
    #[serde(default)]
    activity_changes: Option<bool>,
    #[serde(default)]
    reminders: Option<bool>,
    #[serde(default)]
    weekly_digest: Option<bool>,
    #[serde(default)]
    new_activities: Option<bool>,
    #[serde(default)]
    attendance: Option<bool>,
}

impl PreferenceRecordWire {
    fn flag(&self, kind: NotificationKind) -> Option<bool> {
        match kind {
            NotificationKind::SignupConfirmation => self.signup_confirmation,
            NotificationKind::UnregisterConfirmation => self.unregister_confirmation,
            NotificationKind::ActivityChanges => self.activity_changes,
            NotificationKind::Reminders => self.reminders,
            NotificationKind::WeeklyDigest => self.weekly_digest,
            NotificationKind::NewActivities => self.new_activities,
            NotificationKind::Attendance => self.attendance,
        }
    }
}

impl From<PreferenceRecordWire> for PreferenceRecord {
    fn from(wire: PreferenceRecordWire) -> Self {
        let mut categories = wire.categories.clone().unwrap_or_else(all_categories);
        for kind in NotificationKind::iter() {
            match wire.flag(kind) {
                Some(true) => {
                    categories.insert(kind);
                }
                Some(false) => {
                    categories.remove(&kind);
                }
                None => {}
            }
        }

        Self {
            email: wire.email,
            enabled: wire.enabled,
            frequency: wire.frequency,
            categories,
            parent_email: wire.parent_email,
            parent_cc_enabled: wire.parent_cc_enabled,
            digest_only: wire.digest_only,
        }
    }
}

impl From<PreferenceRecord> for PreferenceRecordWire {
    fn from(record: PreferenceRecord) -> Self {
        let flag = |kind: NotificationKind| Some(record.allows(kind));
        let signup_confirmation = flag(NotificationKind::SignupConfirmation);
        let unregister_confirmation = flag(NotificationKind::UnregisterConfirmation);
        let activity_changes = flag(NotificationKind::ActivityChanges);
        let reminders = flag(NotificationKind::Reminders);
        let weekly_digest = flag(NotificationKind::WeeklyDigest);
        let new_activities = flag(NotificationKind::NewActivities);
        let attendance = flag(NotificationKind::Attendance);

        Self {
            email: record.email,
            enabled: record.enabled,
            frequency: record.frequency,
            categories: Some(record.categories),
            parent_email: record.parent_email,
            parent_cc_enabled: record.parent_cc_enabled,
            digest_only: record.digest_only,
            signup_confirmation,
            unregister_confirmation,
            activity_changes,
            reminders,
            weekly_digest,
            new_activities,
            attendance,
        }
    }
}

impl PreferenceRecord {
    /// The record implied for an email with nothing stored.
    pub fn default_for(email: &str) -> Self {
        Self {
            email: normalize_email(email),
            enabled: true,
            frequency: Frequency::Immediate,
            categories: all_categories(),
            parent_email: None,
            parent_cc_enabled: false,
            digest_only: false,
        }
    }

    /// Lookup key for this record.
    pub fn key(&self) -> String {
        normalize_email(&self.email)
    }

    pub fn with_frequency(mut self, frequency: Frequency) -> Self {
        self.frequency = frequency;
        self
    }

    pub fn with_categories(mut self, categories: impl IntoIterator<Item = NotificationKind>) -> Self {
        self.categories = categories.into_iter().collect();
        self
    }

    pub fn with_parent_cc(mut self, parent_email: &str) -> Self {
        self.parent_email = Some(normalize_email(parent_email));
        self.parent_cc_enabled = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Whether `kind` is in the enabled category set.
    pub fn allows(&self, kind: NotificationKind) -> bool {
        self.categories.contains(&kind)
    }

    /// Whether nothing at all may be delivered or buffered for this recipient.
    pub fn is_silenced(&self) -> bool {
        !self.enabled || self.frequency == Frequency::Disabled
    }

    /// Whether an already buffered event of `kind` may still go out in a digest.
    pub fn accepts_buffered(&self, kind: NotificationKind) -> bool {
        !self.is_silenced() && !self.digest_only && self.allows(kind)
    }

    /// The parent address to CC, when CC is enabled and an address is set.
    pub fn cc_address(&self) -> Option<String> {
        match (&self.parent_email, self.parent_cc_enabled) {
            (Some(parent), true) if !parent.trim().is_empty() => Some(normalize_email(parent)),
            _ => None,
        }
    }
}

// ============================================================================
// Events and decisions
// ============================================================================

/// An event raised by the roster (or by the scheduler) that may notify recipients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub kind: NotificationKind,
    /// Target emails in priority order.
    pub recipients: Vec<String>,
    /// Template variables, opaque to the resolver.
    #[serde(default)]
    pub context: serde_json::Value,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl NotificationEvent {
    /// Create an event stamped with the current time.
    ///
    /// Recipients are normalised; blanks and repeated addresses are dropped,
    /// keeping the first occurrence.
    pub fn new<I, S>(kind: NotificationKind, recipients: I, context: serde_json::Value) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = BTreeSet::new();
        let recipients = recipients
            .into_iter()
            .map(|r| normalize_email(r.as_ref()))
            .filter(|r| !r.is_empty() && seen.insert(r.clone()))
            .collect();

        Self {
            id: Uuid::new_v4(),
            kind,
            recipients,
            context,
            created_at: Utc::now(),
        }
    }

    /// Override the creation timestamp (used by the scheduler so re-runs are stable).
    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// The slice of this event that is buffered for one recipient.
    pub fn pending(&self) -> PendingEvent {
        PendingEvent {
            event_id: self.id,
            kind: self.kind,
            context: self.context.clone(),
            created_at: self.created_at,
        }
    }
}

/// An event waiting in a digest bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingEvent {
    pub event_id: Uuid,
    pub kind: NotificationKind,
    pub context: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Why a recipient was not notified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SuppressReason {
    /// `enabled == false`.
    MasterSwitchOff,
    /// `frequency == disabled`.
    FrequencyDisabled,
    /// `digest_only` is set and the kind is not the weekly summary.
    DigestOnly,
    /// The kind is not in the recipient's categories.
    CategoryOptedOut,
    /// The kind is only produced by the scheduler.
    ScheduledKindOnly,
}

/// A message to hand to the notifier right away.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImmediateDelivery {
    pub recipient: String,
    pub kind: NotificationKind,
    pub context: serde_json::Value,
    pub cc: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Outcome of resolving one recipient of an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum DispatchDecision {
    Suppress {
        recipient: String,
        reason: SuppressReason,
    },
    SendNow(ImmediateDelivery),
    BufferForDigest {
        recipient: String,
        class: DigestClass,
        event: PendingEvent,
    },
}

impl DispatchDecision {
    pub fn recipient(&self) -> &str {
        match self {
            DispatchDecision::Suppress { recipient, .. } => recipient,
            DispatchDecision::SendNow(delivery) => &delivery.recipient,
            DispatchDecision::BufferForDigest { recipient, .. } => recipient,
        }
    }

    pub fn is_suppressed(&self) -> bool {
        matches!(self, DispatchDecision::Suppress { .. })
    }
}

// ============================================================================
// Batch announcements
// ============================================================================

fn announcement_template() -> String {
    MessageKind::Announcement.template_name()
}

/// An administrator's message to an explicit recipient list.
///
/// `template_name` selects any registered template (`announcement` by
/// default); `subject` replaces the template's own subject line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchAnnouncement {
    pub recipients: Vec<String>,
    pub subject: String,
    #[serde(default = "announcement_template")]
    pub template_name: String,
    #[serde(default)]
    pub context: serde_json::Value,
}
