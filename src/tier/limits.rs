//! Tier limits and types for the freemium model
//!
//! Free accounts get a fixed number of analyses per day. Pro accounts, and
//! accounts inside a trial window, are unlimited.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Analyses a free account may run per UTC day
pub const DAILY_LIMIT: u32 = 10;

/// Length of the one-off Pro trial (30 minutes)
pub const TRIAL_DURATION_MS: i64 = 30 * 60 * 1000;

pub fn trial_duration() -> Duration {
    Duration::from_millis(TRIAL_DURATION_MS as u64)
}

/// Remaining analyses for today.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quota {
    Limited(u32),
    Unlimited,
}

impl Quota {
    /// `None` stands for unlimited in serialized status.
    pub fn as_option(self) -> Option<u32> {
        match self {
            Quota::Limited(n) => Some(n),
            Quota::Unlimited => None,
        }
    }
}

/// Lifecycle of the one-off trial
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrialStatus {
    Inactive,
    Active,
    Expired,
}

/// Result of checking whether another analysis may run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FeatureGate {
    Allowed,
    DailyLimitReached {
        used: u32,
        limit: u32,
        resets_at: DateTime<Utc>,
    },
}

impl FeatureGate {
    pub fn is_allowed(&self) -> bool {
        matches!(self, FeatureGate::Allowed)
    }
}

/// Next midnight UTC after `now`
pub fn next_reset_time(now: DateTime<Utc>) -> DateTime<Utc> {
    let tomorrow = now.date_naive() + chrono::Duration::days(1);
    tomorrow.and_time(chrono::NaiveTime::default()).and_utc()
}

/// Render a countdown as `m:ss`
pub fn format_time_left(left: Duration) -> String {
    let ms = left.as_millis();
    let minutes = ms / 60_000;
    let seconds = (ms % 60_000) / 1000;
    format!("{}:{:02}", minutes, seconds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_time_left() {
        assert_eq!(format_time_left(Duration::from_millis(125_000)), "2:05");
        assert_eq!(format_time_left(Duration::from_millis(59_000)), "0:59");
        assert_eq!(format_time_left(trial_duration()), "30:00");
        assert_eq!(format_time_left(Duration::from_millis(999)), "0:00");
    }

    #[test]
    fn test_next_reset_time() {
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 23, 59, 0).unwrap();
        let reset = next_reset_time(now);
        assert_eq!(reset, Utc.with_ymd_and_hms(2026, 10, 17, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_quota_as_option() {
        assert_eq!(Quota::Limited(3).as_option(), Some(3));
        assert_eq!(Quota::Unlimited.as_option(), None);
    }

    #[test]
    fn test_feature_gate_json() {
        let gate = FeatureGate::Allowed;
        let json = serde_json::to_string(&gate).unwrap();
        assert_eq!(json, r#"{"status":"allowed"}"#);
    }
}
