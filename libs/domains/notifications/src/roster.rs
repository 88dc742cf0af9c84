//! Read model of the activity roster, the event source the scheduler scans.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{NotificationError, NotificationResult};
use crate::models::normalize_email;

/// One weekly meeting of an activity, in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeetingSlot {
    pub weekday: Weekday,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl MeetingSlot {
    pub fn new(weekday: Weekday, start: NaiveTime, end: NaiveTime) -> Self {
        Self { weekday, start, end }
    }

    /// Earliest start of this slot strictly after `after`.
    pub fn next_start_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let today = after.date_naive();
        (0..=7)
            .filter_map(|offset| today.checked_add_signed(Duration::days(offset)))
            .filter(|date| date.weekday() == self.weekday)
            .map(|date| date.and_time(self.start).and_utc())
            .find(|start| *start > after)
    }
}

/// An extracurricular activity and its enrolled students.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub name: String,
    pub description: String,
    /// Human-readable schedule shown in messages.
    pub schedule: String,
    pub max_participants: usize,
    pub participants: Vec<String>,
    #[serde(default)]
    pub meetings: Vec<MeetingSlot>,
}

impl Activity {
    pub fn new(name: &str, description: &str, schedule: &str, max_participants: usize) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            schedule: schedule.to_string(),
            max_participants,
            participants: Vec::new(),
            meetings: Vec::new(),
        }
    }

    pub fn with_meeting(mut self, weekday: Weekday, start: NaiveTime, end: NaiveTime) -> Self {
        self.meetings.push(MeetingSlot::new(weekday, start, end));
        self
    }

    pub fn with_participants<I, S>(mut self, participants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.participants = participants
            .into_iter()
            .map(|p| normalize_email(p.as_ref()))
            .collect();
        self
    }

    /// Earliest meeting start strictly after `after`.
    pub fn next_session_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.meetings
            .iter()
            .filter_map(|slot| slot.next_start_after(after))
            .min()
    }

    pub fn is_enrolled(&self, email: &str) -> bool {
        let email = normalize_email(email);
        self.participants.iter().any(|p| *p == email)
    }

    pub fn spots_left(&self) -> usize {
        self.max_participants.saturating_sub(self.participants.len())
    }
}

/// Read access to activities.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ActivityDirectory: Send + Sync {
    /// List all activities ordered by name
    async fn list_activities(&self) -> NotificationResult<Vec<Activity>>;

    /// Get an activity by name
    async fn get_activity(&self, name: &str) -> NotificationResult<Option<Activity>>;
}

/// In-memory roster with the two mutations the API exposes.
#[derive(Debug, Default, Clone)]
pub struct InMemoryActivityDirectory {
    activities: Arc<RwLock<BTreeMap<String, Activity>>>,
}

impl InMemoryActivityDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_activities(activities: impl IntoIterator<Item = Activity>) -> Self {
        let activities = activities.into_iter().map(|a| (a.name.clone(), a)).collect();
        Self {
            activities: Arc::new(RwLock::new(activities)),
        }
    }

    pub async fn insert(&self, activity: Activity) {
        let mut activities = self.activities.write().await;
        activities.insert(activity.name.clone(), activity);
    }

    /// Enroll `email` in the named activity, returning the updated activity.
    pub async fn signup(&self, name: &str, email: &str) -> NotificationResult<Activity> {
        let email = normalize_email(email);
        let mut activities = self.activities.write().await;
        let activity = activities
            .get_mut(name)
            .ok_or_else(|| NotificationError::NotFound("Activity not found".to_string()))?;

        if activity.is_enrolled(&email) {
            return Err(NotificationError::Conflict(
                "Student is already signed up".to_string(),
            ));
        }
        if activity.spots_left() == 0 {
            return Err(NotificationError::Conflict("Activity is full".to_string()));
        }

        activity.participants.push(email.clone());
        tracing::info!(activity = %name, email = %email, "Signed up student");
        Ok(activity.clone())
    }

    /// Remove `email` from the named activity, returning the updated activity.
    pub async fn unregister(&self, name: &str, email: &str) -> NotificationResult<Activity> {
        let email = normalize_email(email);
        let mut activities = self.activities.write().await;
        let activity = activities
            .get_mut(name)
            .ok_or_else(|| NotificationError::NotFound("Activity not found".to_string()))?;

        let before = activity.participants.len();
        activity.participants.retain(|p| *p != email);
        if activity.participants.len() == before {
            return Err(NotificationError::Conflict(
                "Student is not signed up for this activity".to_string(),
            ));
        }

        tracing::info!(activity = %name, email = %email, "Unregistered student");
        Ok(activity.clone())
    }
}

#[async_trait]
impl ActivityDirectory for InMemoryActivityDirectory {
    async fn list_activities(&self) -> NotificationResult<Vec<Activity>> {
        let activities = self.activities.read().await;
        Ok(activities.values().cloned().collect())
    }

    async fn get_activity(&self, name: &str) -> NotificationResult<Option<Activity>> {
        let activities = self.activities.read().await;
        Ok(activities.get(name).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn chess() -> Activity {
        Activity::new("Chess Club", "Strategy", "Fridays, 3:30 PM - 5:00 PM", 2)
            .with_meeting(Weekday::Fri, time(15, 30), time(17, 0))
            .with_participants(["Michael@Mergington.edu"])
    }

    #[test]
    fn test_next_session_after() {
        // 2024-01-04 is a Thursday.
        let thursday_evening = Utc.with_ymd_and_hms(2024, 1, 4, 18, 0, 0).unwrap();
        assert_eq!(
            chess().next_session_after(thursday_evening),
            Some(Utc.with_ymd_and_hms(2024, 1, 5, 15, 30, 0).unwrap())
        );

        // Exactly at the start time rolls over to the following week.
        let friday_start = Utc.with_ymd_and_hms(2024, 1, 5, 15, 30, 0).unwrap();
        assert_eq!(
            chess().next_session_after(friday_start),
            Some(Utc.with_ymd_and_hms(2024, 1, 12, 15, 30, 0).unwrap())
        );
    }

    #[test]
    fn test_next_session_picks_earliest_slot() {
        let activity = Activity::new("Programming Class", "", "Tue/Thu", 20)
            .with_meeting(Weekday::Thu, time(15, 30), time(16, 30))
            .with_meeting(Weekday::Tue, time(15, 30), time(16, 30));
        let monday = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        assert_eq!(
            activity.next_session_after(monday),
            Some(Utc.with_ymd_and_hms(2024, 1, 2, 15, 30, 0).unwrap())
        );
        assert_eq!(Activity::new("x", "", "", 1).next_session_after(monday), None);
    }

    #[tokio::test]
    async fn test_signup_and_unregister() {
        let roster = InMemoryActivityDirectory::with_activities([chess()]);

        let updated = roster.signup("Chess Club", "Daniel@mergington.edu").await.unwrap();
        assert_eq!(updated.participants, vec!["michael@mergington.edu", "daniel@mergington.edu"]);

        let err = roster.signup("Chess Club", "emma@mergington.edu").await.unwrap_err();
        assert!(matches!(err, NotificationError::Conflict(_)));

        let err = roster.signup("Chess Club", "daniel@mergington.edu").await.unwrap_err();
        assert!(matches!(err, NotificationError::Conflict(_)));

        roster.unregister("Chess Club", "daniel@mergington.edu").await.unwrap();
        let err = roster.unregister("Chess Club", "daniel@mergington.edu").await.unwrap_err();
        assert!(matches!(err, NotificationError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_unknown_activity() {
        let roster = InMemoryActivityDirectory::new();
        let err = roster.signup("Nope", "a@x.edu").await.unwrap_err();
        assert!(matches!(err, NotificationError::NotFound(_)));
        assert!(roster.get_activity("Nope").await.unwrap().is_none());
    }
}
