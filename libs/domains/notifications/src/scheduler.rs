//! Dispatch scheduler: the daily reminder sweep and the weekly digest sweep.
//!
//! Each job remembers the last trigger instant it covered. A tick computes
//! the most recent trigger instant at or before `now`; if the marker is older
//! the job runs once for that instant, however many periods were missed.

use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use strum::{Display, EnumIter, EnumString};
use tokio::sync::{watch, Mutex};
use tracing::{error, info, instrument, warn};

use crate::error::NotificationResult;
use crate::models::{DigestClass, NotificationEvent, NotificationKind};
use crate::resolver::ResolvePath;
use crate::roster::ActivityDirectory;
use crate::service::{DispatchTally, NotificationService};

/// The two periodic jobs.
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
pub enum SweepJob {
    Daily,
    Weekly,
}

/// Wall-clock trigger of a job, in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSpec {
    Daily { at: NaiveTime },
    Weekly { weekday: Weekday, at: NaiveTime },
}

impl TriggerSpec {
    /// Most recent trigger instant at or before `now`.
    pub fn latest_due(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match *self {
            TriggerSpec::Daily { at } => {
                let today = now.date_naive().and_time(at).and_utc();
                if today <= now { today } else { today - Duration::days(1) }
            }
            TriggerSpec::Weekly { weekday, at } => {
                let back = (7 + now.weekday().num_days_from_monday() - weekday.num_days_from_monday()) % 7;
                let candidate = (now.date_naive() - Duration::days(back as i64)).and_time(at).and_utc();
                if candidate <= now { candidate } else { candidate - Duration::weeks(1) }
            }
        }
    }

    pub fn period_length(&self) -> Duration {
        match self {
            TriggerSpec::Daily { .. } => Duration::days(1),
            TriggerSpec::Weekly { .. } => Duration::weeks(1),
        }
    }

    /// Human key of the period a trigger instant covers, e.g. `week of 2024-01-01`.
    pub fn period_key(&self, instant: DateTime<Utc>) -> String {
        match self {
            TriggerSpec::Daily { .. } => format!("day of {}", instant.format("%Y-%m-%d")),
            TriggerSpec::Weekly { .. } => format!("week of {}", instant.format("%Y-%m-%d")),
        }
    }
}

/// Scheduler timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub daily: TriggerSpec,
    pub weekly: TriggerSpec,
    pub tick_interval: StdDuration,
    pub reminder_horizon: Duration,
}

impl SchedulerConfig {
    pub fn trigger(&self, job: SweepJob) -> TriggerSpec {
        match job {
            SweepJob::Daily => self.daily,
            SweepJob::Weekly => self.weekly,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            daily: TriggerSpec::Daily {
                at: NaiveTime::from_hms_opt(18, 0, 0).unwrap_or_default(),
            },
            weekly: TriggerSpec::Weekly {
                weekday: Weekday::Mon,
                at: NaiveTime::from_hms_opt(8, 0, 0).unwrap_or_default(),
            },
            tick_interval: StdDuration::from_secs(60),
            reminder_horizon: Duration::hours(24),
        }
    }
}

/// Last covered trigger instant per job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerState {
    #[serde(default)]
    pub markers: BTreeMap<SweepJob, DateTime<Utc>>,
}

/// What one sweep did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub job: SweepJob,
    pub period: DateTime<Utc>,
    pub period_key: String,
    /// Periods that elapsed uncovered before this one.
    pub missed_periods: i64,
    /// Reminder events synthesised (daily) or summaries synthesised (weekly).
    pub synthesized: usize,
    pub tally: DispatchTally,
}

/// Drives the periodic jobs. One instance per process.
pub struct DispatchScheduler {
    service: Arc<NotificationService>,
    directory: Arc<dyn ActivityDirectory>,
    config: SchedulerConfig,
    state: Mutex<SchedulerState>,
}

impl DispatchScheduler {
    pub fn new(
        service: Arc<NotificationService>,
        directory: Arc<dyn ActivityDirectory>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            service,
            directory,
            config,
            state: Mutex::new(SchedulerState::default()),
        }
    }

    pub fn with_state(self, state: SchedulerState) -> Self {
        Self {
            state: Mutex::new(state),
            ..self
        }
    }

    pub async fn state(&self) -> SchedulerState {
        self.state.lock().await.clone()
    }

    /// Treat every job without a marker as covered through its latest due
    /// period at `now`, so the first run happens at the next trigger.
    ///
    /// For processes that keep no state between runs: a restart must not
    /// repeat the sweep of the current period.
    pub async fn cover_elapsed_periods(&self, now: DateTime<Utc>) {
        let mut state = self.state.lock().await;
        for job in [SweepJob::Daily, SweepJob::Weekly] {
            let due = self.config.trigger(job).latest_due(now);
            state.markers.entry(job).or_insert(due);
        }
    }

    /// Run every job that has an uncovered period at `now`.
    pub async fn tick(&self, now: DateTime<Utc>) -> Vec<SweepReport> {
        let mut reports = Vec::new();
        for job in [SweepJob::Daily, SweepJob::Weekly] {
            match self.tick_job(job, now).await {
                Ok(Some(report)) => reports.push(report),
                Ok(None) => {}
                Err(e) => error!(job = %job, error = %e, "Sweep failed, will retry next tick"),
            }
        }
        reports
    }

    /// Run `job` for its latest due period unless that period is already covered.
    ///
    /// The marker only advances after the sweep returns, and the state lock is
    /// held throughout so a job never runs twice for the same period.
    #[instrument(skip(self), fields(job = %job))]
    pub async fn tick_job(&self, job: SweepJob, now: DateTime<Utc>) -> NotificationResult<Option<SweepReport>> {
        let trigger = self.config.trigger(job);
        let due = trigger.latest_due(now);

        let mut state = self.state.lock().await;
        let last = state.markers.get(&job).copied();
        if last.is_some_and(|last| last >= due) {
            return Ok(None);
        }

        let missed_periods = match last {
            Some(last) => ((due - last).num_seconds() / trigger.period_length().num_seconds() - 1).max(0),
            None => 0,
        };
        if missed_periods > 0 {
            warn!(
                missed_periods,
                period = %trigger.period_key(due),
                "Missed scheduler triggers, catching up once for the latest period"
            );
        }

        let (synthesized, tally) = match job {
            SweepJob::Daily => self.daily_sweep(due, now).await?,
            SweepJob::Weekly => self.weekly_sweep(due).await?,
        };

        state.markers.insert(job, due);
        let report = SweepReport {
            job,
            period: due,
            period_key: trigger.period_key(due),
            missed_periods,
            synthesized,
            tally,
        };
        info!(
            period = %report.period_key,
            synthesized,
            delivered = tally.delivered,
            buffered = tally.buffered,
            failed = tally.failed,
            "Sweep complete"
        );
        Ok(Some(report))
    }

    /// Reminders for sessions starting within the horizon, then the daily flush.
    ///
    /// Reminders go first so that a daily-digest recipient gets them in this
    /// sweep's flush.
    async fn daily_sweep(
        &self,
        period: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> NotificationResult<(usize, DispatchTally)> {
        let horizon_end = now + self.config.reminder_horizon;
        let mut tally = DispatchTally::default();
        let mut synthesized = 0;

        for activity in self.directory.list_activities().await? {
            let Some(next_session) = activity.next_session_after(now) else {
                continue;
            };
            if next_session > horizon_end || activity.participants.is_empty() {
                continue;
            }

            let event = NotificationEvent::new(
                NotificationKind::Reminders,
                &activity.participants,
                json!({
                    "activity_name": activity.name,
                    "schedule": activity.schedule,
                    "next_session": next_session.format("%A, %B %-d at %H:%M UTC").to_string(),
                }),
            )
            .at(period);

            tally.merge(self.service.dispatch_and_wait(&event, ResolvePath::Ordinary).await?);
            synthesized += 1;
        }

        tally.merge(self.service.flush_digests(DigestClass::Daily, period).await?);
        Ok((synthesized, tally))
    }

    /// The weekly flush, then one summary per enrolled student.
    async fn weekly_sweep(&self, period: DateTime<Utc>) -> NotificationResult<(usize, DispatchTally)> {
        let mut tally = self.service.flush_digests(DigestClass::Weekly, period).await?;

        let mut enrolled: BTreeMap<String, Vec<serde_json::Value>> = BTreeMap::new();
        for activity in self.directory.list_activities().await? {
            let participants: BTreeSet<&String> = activity.participants.iter().collect();
            for participant in participants {
                enrolled.entry(participant.clone()).or_default().push(json!({
                    "name": activity.name,
                    "schedule": activity.schedule,
                    "description": activity.description,
                }));
            }
        }

        let week_start = period.date_naive();
        let week_end = week_start + Duration::days(6);
        let mut synthesized = 0;

        for (student, activities) in enrolled {
            let event = NotificationEvent::new(
                NotificationKind::WeeklyDigest,
                [&student],
                json!({
                    "student_email": student,
                    "activities": activities,
                    "week_start": week_start.format("%Y-%m-%d").to_string(),
                    "week_end": week_end.format("%Y-%m-%d").to_string(),
                }),
            )
            .at(period);

            tally.merge(self.service.dispatch_and_wait(&event, ResolvePath::Scheduled).await?);
            synthesized += 1;
        }

        Ok((synthesized, tally))
    }

    /// Tick on an interval until `shutdown` flips to true.
    ///
    /// Shutdown is only observed between ticks, so a sweep that has taken its
    /// buckets always finishes delivering them.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            tick_secs = self.config.tick_interval.as_secs(),
            daily = ?self.config.daily,
            weekly = ?self.config.weekly,
            "Dispatch scheduler started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                _ = interval.tick() => {}
            }

            self.tick(Utc::now()).await;
        }

        info!("Received shutdown signal, dispatch scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::DigestAccumulator;
    use crate::models::{Frequency, PreferenceRecord};
    use crate::notifier::Notifier;
    use crate::providers::{EmailProvider, MockEmailProvider};
    use crate::repository::{InMemoryPreferenceStore, PreferenceStore};
    use crate::roster::{Activity, InMemoryActivityDirectory, MockActivityDirectory};
    use crate::error::NotificationError;
    use crate::templates::TemplateEngine;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    struct Harness {
        scheduler: DispatchScheduler,
        store: Arc<InMemoryPreferenceStore>,
        provider: MockEmailProvider,
        service: Arc<NotificationService>,
    }

    fn harness(activities: Vec<Activity>) -> Harness {
        let store = Arc::new(InMemoryPreferenceStore::new());
        let provider = MockEmailProvider::new();
        let transport: Arc<dyn EmailProvider> = Arc::new(provider.clone());
        let notifier = Arc::new(Notifier::new(Some(transport), Arc::new(TemplateEngine::new().unwrap())));
        let store_dyn: Arc<dyn PreferenceStore> = store.clone();
        let service = Arc::new(NotificationService::new(
            store_dyn,
            Arc::new(DigestAccumulator::new()),
            notifier,
        ));
        let directory = Arc::new(InMemoryActivityDirectory::with_activities(activities));
        let scheduler = DispatchScheduler::new(service.clone(), directory, SchedulerConfig::default());
        Harness {
            scheduler,
            store,
            provider,
            service,
        }
    }

    fn chess() -> Activity {
        // Fridays 15:30 UTC
        Activity::new("Chess Club", "Strategy", "Fridays, 3:30 PM - 5:00 PM", 12)
            .with_meeting(Weekday::Fri, time(15, 30), time(17, 0))
            .with_participants(["michael@mergington.edu", "daniel@mergington.edu"])
    }

    #[test]
    fn test_daily_latest_due() {
        let spec = TriggerSpec::Daily { at: time(18, 0) };
        assert_eq!(spec.latest_due(at(2024, 1, 5, 17, 59)), at(2024, 1, 4, 18, 0));
        assert_eq!(spec.latest_due(at(2024, 1, 5, 18, 0)), at(2024, 1, 5, 18, 0));
        assert_eq!(spec.latest_due(at(2024, 1, 5, 23, 0)), at(2024, 1, 5, 18, 0));
    }

    #[test]
    fn test_weekly_latest_due() {
        let spec = TriggerSpec::Weekly { weekday: Weekday::Mon, at: time(8, 0) };
        // 2024-01-01 is a Monday.
        assert_eq!(spec.latest_due(at(2024, 1, 1, 7, 0)), at(2023, 12, 25, 8, 0));
        assert_eq!(spec.latest_due(at(2024, 1, 1, 8, 0)), at(2024, 1, 1, 8, 0));
        assert_eq!(spec.latest_due(at(2024, 1, 7, 23, 0)), at(2024, 1, 1, 8, 0));
        assert_eq!(spec.period_key(at(2024, 1, 1, 8, 0)), "week of 2024-01-01");
    }

    #[tokio::test]
    async fn test_tick_runs_each_period_once() {
        let h = harness(vec![]);
        let now = at(2024, 1, 1, 9, 0);

        let first = h.scheduler.tick(now).await;
        assert_eq!(first.len(), 2);

        assert!(h.scheduler.tick(now).await.is_empty());
        assert!(h.scheduler.tick(at(2024, 1, 1, 17, 59)).await.is_empty());

        let evening = h.scheduler.tick(at(2024, 1, 1, 18, 0)).await;
        assert_eq!(evening.len(), 1);
        assert_eq!(evening[0].job, SweepJob::Daily);
    }

    #[tokio::test]
    async fn test_covered_periods_wait_for_next_trigger() {
        let h = harness(vec![chess()]);
        h.store
            .put(PreferenceRecord::default_for("michael@mergington.edu"))
            .await
            .unwrap();
        let mut state = SchedulerState::default();
        state.markers.insert(SweepJob::Daily, at(2023, 12, 30, 18, 0));
        let scheduler = h.scheduler.with_state(state);

        // Restart on Monday morning, after the weekly trigger.
        let now = at(2024, 1, 1, 9, 0);
        scheduler.cover_elapsed_periods(now).await;
        let markers = scheduler.state().await.markers;
        assert_eq!(markers[&SweepJob::Weekly], at(2024, 1, 1, 8, 0));
        assert_eq!(markers[&SweepJob::Daily], at(2023, 12, 30, 18, 0));

        let reports = scheduler.tick(now).await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].job, SweepJob::Daily);
        assert!(scheduler.tick_job(SweepJob::Weekly, now).await.unwrap().is_none());
        assert_eq!(h.provider.sent_count().await, 0);

        let next_week = scheduler.tick_job(SweepJob::Weekly, at(2024, 1, 8, 8, 0)).await.unwrap();
        assert!(next_week.is_some());
    }

    #[tokio::test]
    async fn test_missed_weekly_triggers_catch_up_once() {
        let h = harness(vec![]);
        let mut state = SchedulerState::default();
        state.markers.insert(SweepJob::Weekly, at(2024, 1, 1, 8, 0));
        state.markers.insert(SweepJob::Daily, at(2024, 2, 5, 18, 0));
        let scheduler = h.scheduler.with_state(state);

        // Four Mondays (Jan 8, 15, 22, 29) plus Feb 5 elapsed.
        let reports = scheduler.tick(at(2024, 2, 5, 9, 0)).await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].job, SweepJob::Weekly);
        assert_eq!(reports[0].period, at(2024, 2, 5, 8, 0));
        assert_eq!(reports[0].missed_periods, 4);

        assert!(scheduler.tick(at(2024, 2, 5, 10, 0)).await.is_empty());
        assert_eq!(scheduler.state().await.markers[&SweepJob::Weekly], at(2024, 2, 5, 8, 0));
    }

    #[tokio::test]
    async fn test_daily_sweep_reminds_and_flushes_daily_buffer() {
        let h = harness(vec![chess()]);
        h.store
            .put(PreferenceRecord::default_for("daniel@mergington.edu").with_frequency(Frequency::Daily))
            .await
            .unwrap();

        // Thursday 18:00, Chess meets Friday 15:30.
        let report = h
            .scheduler
            .tick_job(SweepJob::Daily, at(2024, 1, 4, 18, 0))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(report.synthesized, 1);
        // michael immediately, daniel via the daily digest of the same sweep.
        assert_eq!(report.tally.delivered, 2);
        assert_eq!(report.tally.buffered, 1);

        let sent = h.provider.sent_emails().await;
        let michael = sent.iter().find(|e| e.to_email == "michael@mergington.edu").unwrap();
        assert_eq!(michael.subject, "Reminder: Chess Club Coming Up!");
        let daniel = sent.iter().find(|e| e.to_email == "daniel@mergington.edu").unwrap();
        assert_eq!(daniel.subject, "Your daily activity digest (1 updates)");
        assert_eq!(h.service.accumulator().pending_count(DigestClass::Daily).await, 0);
    }

    #[tokio::test]
    async fn test_daily_sweep_skips_sessions_beyond_horizon() {
        let h = harness(vec![chess()]);
        // Monday evening: next session is four days out.
        let report = h
            .scheduler
            .tick_job(SweepJob::Daily, at(2024, 1, 1, 18, 0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.synthesized, 0);
        assert_eq!(h.provider.sent_count().await, 0);
    }

    #[tokio::test]
    async fn test_weekly_sweep_sends_summary_regardless_of_frequency() {
        let h = harness(vec![chess()]);
        h.store
            .put(PreferenceRecord::default_for("michael@mergington.edu").with_frequency(Frequency::Weekly))
            .await
            .unwrap();
        h.store
            .put(PreferenceRecord::default_for("daniel@mergington.edu").with_categories([NotificationKind::Reminders]))
            .await
            .unwrap();

        let report = h
            .scheduler
            .tick_job(SweepJob::Weekly, at(2024, 1, 1, 8, 0))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(report.synthesized, 2);
        assert_eq!(report.tally.delivered, 1);
        assert_eq!(report.tally.suppressed, 1);

        let sent = h.provider.sent_emails().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to_email, "michael@mergington.edu");
        assert_eq!(sent[0].subject, "Weekly Activity Digest: 2024-01-01 - 2024-01-07");
    }

    #[tokio::test]
    async fn test_failed_sweep_does_not_advance_marker() {
        let mut directory = MockActivityDirectory::new();
        directory
            .expect_list_activities()
            .returning(|| Err(NotificationError::Store("roster offline".into())));

        let h = harness(vec![]);
        let scheduler = DispatchScheduler::new(h.service.clone(), Arc::new(directory), SchedulerConfig::default());

        assert!(scheduler.tick_job(SweepJob::Daily, at(2024, 1, 4, 18, 0)).await.is_err());
        assert!(scheduler.state().await.markers.get(&SweepJob::Daily).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let h = harness(vec![]);
        let scheduler = Arc::new(h.scheduler);
        let (tx, rx) = watch::channel(false);

        let handle = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.run(rx).await })
        };

        tokio::time::sleep(StdDuration::from_secs(1)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(scheduler.state().await.markers.len(), 2);
    }
}
