//! Environment configuration for the dispatch engine.

use chrono::{NaiveTime, Weekday};
use core_config::{env_flag, env_optional, env_or_default, env_parse, ConfigError, FromEnv};
use std::path::PathBuf;
use std::time::Duration;

use crate::notifier::{DedupPolicy, RetryPolicy};
use crate::providers::SmtpConfig;
use crate::scheduler::{SchedulerConfig, TriggerSpec};

/// Everything the engine reads from the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct NotifyConfig {
    /// `None` when `SMTP_HOST` is unset: the transport is unconfigured.
    pub smtp: Option<SmtpConfig>,
    pub scheduler: SchedulerConfig,
    pub retry: RetryPolicy,
    pub dedup: DedupPolicy,
    pub state_file: Option<PathBuf>,
    pub portal_url: String,
}

fn parse_time(key: &str, default: &str) -> Result<NaiveTime, ConfigError> {
    let raw = env_or_default(key, default);
    NaiveTime::parse_from_str(raw.trim(), "%H:%M").map_err(|e| ConfigError::ParseError {
        key: key.to_string(),
        details: format!("expected HH:MM, got '{}': {}", raw, e),
    })
}

fn smtp_from_env() -> Result<Option<SmtpConfig>, ConfigError> {
    let Some(host) = env_optional("SMTP_HOST") else {
        return Ok(None);
    };

    let mut config = SmtpConfig::new(
        host,
        env_parse("SMTP_PORT", 587u16)?,
        env_or_default("SMTP_FROM_EMAIL", "noreply@mergington.edu"),
        env_or_default("SMTP_FROM_NAME", "Mergington High School"),
    )
    .with_tls(env_flag("SMTP_USE_TLS", true));

    if let (Some(username), Some(password)) = (env_optional("SMTP_USERNAME"), env_optional("SMTP_PASSWORD")) {
        config = config.with_credentials(username, password);
    }
    Ok(Some(config))
}

impl FromEnv for NotifyConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let weekly_day: Weekday = env_parse("NOTIFY_WEEKLY_SWEEP_DAY", Weekday::Mon)?;

        let scheduler = SchedulerConfig {
            daily: TriggerSpec::Daily {
                at: parse_time("NOTIFY_DAILY_SWEEP_AT", "18:00")?,
            },
            weekly: TriggerSpec::Weekly {
                weekday: weekly_day,
                at: parse_time("NOTIFY_WEEKLY_SWEEP_AT", "08:00")?,
            },
            tick_interval: Duration::from_secs(env_parse("NOTIFY_TICK_SECS", 60u64)?.max(1)),
            reminder_horizon: chrono::Duration::hours(env_parse("NOTIFY_REMINDER_HORIZON_HOURS", 24i64)?),
        };

        let retry = RetryPolicy {
            max_attempts: env_parse("NOTIFY_MAX_ATTEMPTS", 3u32)?.max(1),
            base_delay: Duration::from_millis(env_parse("NOTIFY_RETRY_BASE_MS", 500u64)?),
            max_delay: Duration::from_millis(env_parse("NOTIFY_RETRY_MAX_MS", 8000u64)?),
            send_timeout: Duration::from_secs(env_parse("NOTIFY_SEND_TIMEOUT_SECS", 15u64)?),
        };

        let dedup = DedupPolicy {
            window: Duration::from_secs(env_parse("NOTIFY_DEDUP_WINDOW_SECS", 3600u64)?),
            bucket: Duration::from_secs(env_parse("NOTIFY_DEDUP_BUCKET_SECS", 3600u64)?.max(1)),
        };

        Ok(Self {
            smtp: smtp_from_env()?,
            scheduler,
            retry,
            dedup,
            state_file: env_optional("NOTIFY_STATE_FILE").map(PathBuf::from),
            portal_url: env_or_default("PORTAL_URL", "http://localhost:8000"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_KEYS: &[&str] = &[
        "SMTP_HOST",
        "SMTP_PORT",
        "SMTP_USERNAME",
        "SMTP_PASSWORD",
        "SMTP_FROM_EMAIL",
        "SMTP_FROM_NAME",
        "SMTP_USE_TLS",
        "NOTIFY_DAILY_SWEEP_AT",
        "NOTIFY_WEEKLY_SWEEP_DAY",
        "NOTIFY_WEEKLY_SWEEP_AT",
        "NOTIFY_TICK_SECS",
        "NOTIFY_REMINDER_HORIZON_HOURS",
        "NOTIFY_MAX_ATTEMPTS",
        "NOTIFY_RETRY_BASE_MS",
        "NOTIFY_RETRY_MAX_MS",
        "NOTIFY_SEND_TIMEOUT_SECS",
        "NOTIFY_DEDUP_WINDOW_SECS",
        "NOTIFY_DEDUP_BUCKET_SECS",
        "NOTIFY_STATE_FILE",
        "PORTAL_URL",
    ];

    /// Every known key unset, except the given overrides.
    fn vars(overrides: &[(&'static str, &'static str)]) -> Vec<(&'static str, Option<&'static str>)> {
        ALL_KEYS
            .iter()
            .map(|key| {
                let value = overrides.iter().find(|(k, _)| k == key).map(|(_, v)| *v);
                (*key, value)
            })
            .collect()
    }

    #[test]
    fn test_defaults() {
        temp_env::with_vars(vars(&[]), || {
            let config = NotifyConfig::from_env().unwrap();
            assert!(config.smtp.is_none());
            assert_eq!(config.scheduler, SchedulerConfig::default());
            assert_eq!(config.retry, RetryPolicy::default());
            assert_eq!(config.dedup, DedupPolicy::default());
            assert_eq!(config.state_file, None);
            assert_eq!(config.portal_url, "http://localhost:8000");
        });
    }

    #[test]
    fn test_smtp_configured_by_host() {
        let vars = vars(&[
            ("SMTP_HOST", "localhost"),
            ("SMTP_PORT", "1025"),
            ("SMTP_USE_TLS", "false"),
            ("SMTP_USERNAME", "user"),
            ("SMTP_PASSWORD", "secret"),
        ]);
        temp_env::with_vars(vars, || {
            let smtp = NotifyConfig::from_env().unwrap().smtp.unwrap();
            assert_eq!(smtp.host, "localhost");
            assert_eq!(smtp.port, 1025);
            assert!(!smtp.use_tls);
            assert_eq!(smtp.username.as_deref(), Some("user"));
            assert_eq!(smtp.from_email, "noreply@mergington.edu");
        });
    }

    #[test]
    fn test_custom_schedule() {
        let vars = vars(&[("NOTIFY_DAILY_SWEEP_AT", "07:30"), ("NOTIFY_WEEKLY_SWEEP_DAY", "fri")]);
        temp_env::with_vars(vars, || {
            let config = NotifyConfig::from_env().unwrap();
            assert_eq!(
                config.scheduler.daily,
                TriggerSpec::Daily { at: NaiveTime::from_hms_opt(7, 30, 0).unwrap() }
            );
            assert!(matches!(
                config.scheduler.weekly,
                TriggerSpec::Weekly { weekday: Weekday::Fri, .. }
            ));
        });
    }

    #[test]
    fn test_bad_time_is_an_error() {
        temp_env::with_vars(vars(&[("NOTIFY_DAILY_SWEEP_AT", "six pm")]), || {
            let err = NotifyConfig::from_env().unwrap_err();
            assert!(err.to_string().contains("NOTIFY_DAILY_SWEEP_AT"));
        });
    }
}
