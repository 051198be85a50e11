//! Usage and entitlement records
//!
//! Daily usage resets lazily: a record whose `lastReset` is not today counts
//! as zero the next time it is read or written.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::limits::{
    next_reset_time, FeatureGate, Quota, TrialStatus, DAILY_LIMIT, TRIAL_DURATION_MS,
};
use crate::account::Metadata;

const USAGE_KEY: &str = "usage";
const IS_PRO_KEY: &str = "isPro";
const TRIAL_USED_KEY: &str = "proDemoUsed";
const TRIAL_ACTIVE_KEY: &str = "proDemoActive";
const TRIAL_START_KEY: &str = "proDemoStartTime";

/// Analyses performed on `last_reset`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub count: u32,
    pub last_reset: NaiveDate,
}

impl UsageRecord {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            count: 0,
            last_reset: today,
        }
    }

    /// Returns true if the count was zeroed.
    pub fn reset_if_new_day(&mut self, today: NaiveDate) -> bool {
        if self.last_reset != today {
            self.last_reset = today;
            self.count = 0;
            true
        } else {
            false
        }
    }

    fn from_value(value: Option<&Value>) -> Self {
        let count = value
            .and_then(|v| v.get("count"))
            .and_then(as_non_negative)
            .map(|n| n.min(u32::MAX as u64) as u32)
            .unwrap_or(0);

        // A missing date is stale, so the next reset zeroes the count
        let last_reset = value
            .and_then(|v| v.get("lastReset"))
            .and_then(Value::as_str)
            .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
            .unwrap_or(NaiveDate::MIN);

        Self { count, last_reset }
    }

    fn to_value(&self) -> Value {
        json!({
            "count": self.count,
            "lastReset": self.last_reset.format("%Y-%m-%d").to_string(),
        })
    }
}

fn as_non_negative(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
}

/// Pro and trial status of one identity together with its daily usage
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Entitlement {
    pub usage: UsageRecord,
    pub is_pro: bool,
    pub trial_used: bool,
    pub trial_active: bool,
    /// Trial start in milliseconds since the Unix epoch
    pub trial_start: Option<i64>,
}

impl Entitlement {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            usage: UsageRecord::new(today),
            is_pro: false,
            trial_used: false,
            trial_active: false,
            trial_start: None,
        }
    }

    /// Parse the fields this tracker owns out of a metadata object.
    /// Missing or mistyped fields take their zero value.
    pub fn from_metadata(metadata: &Metadata) -> Self {
        let flag = |key: &str| metadata.get(key).and_then(Value::as_bool).unwrap_or(false);

        Self {
            usage: UsageRecord::from_value(metadata.get(USAGE_KEY)),
            is_pro: flag(IS_PRO_KEY),
            trial_used: flag(TRIAL_USED_KEY),
            trial_active: flag(TRIAL_ACTIVE_KEY),
            trial_start: metadata.get(TRIAL_START_KEY).and_then(|v| {
                v.as_i64().or_else(|| v.as_f64().map(|f| f as i64))
            }),
        }
    }

    /// Write the owned fields into `metadata`, leaving other keys alone.
    pub fn write_into(&self, metadata: &mut Metadata) {
        metadata.insert(USAGE_KEY.to_string(), self.usage.to_value());
        metadata.insert(IS_PRO_KEY.to_string(), Value::Bool(self.is_pro));
        metadata.insert(TRIAL_USED_KEY.to_string(), Value::Bool(self.trial_used));
        metadata.insert(TRIAL_ACTIVE_KEY.to_string(), Value::Bool(self.trial_active));
        metadata.insert(
            TRIAL_START_KEY.to_string(),
            self.trial_start.map(Value::from).unwrap_or(Value::Null),
        );
    }

    pub fn merged_into(&self, base: &Metadata) -> Metadata {
        let mut metadata = base.clone();
        self.write_into(&mut metadata);
        metadata
    }

    /// End the trial if its window has passed. An active trial without a
    /// start time cannot be timed and ends too. Returns true on transition.
    pub fn expire_if_elapsed(&mut self, now: DateTime<Utc>) -> bool {
        if !self.trial_active {
            return false;
        }

        let elapsed_out = match self.trial_start {
            Some(start) => now.timestamp_millis() - start >= TRIAL_DURATION_MS,
            None => true,
        };

        if elapsed_out {
            self.trial_active = false;
            self.trial_used = true;
        }
        elapsed_out
    }

    /// True while the trial flag is set and its window has time left. A trial
    /// whose expiry has not been written back yet grants nothing.
    pub fn trial_running(&self, now: DateTime<Utc>) -> bool {
        self.time_left(now).is_some_and(|left| !left.is_zero())
    }

    pub fn is_unlimited(&self, now: DateTime<Utc>) -> bool {
        self.is_pro || self.trial_running(now)
    }

    pub fn remaining_quota(&self, now: DateTime<Utc>) -> Quota {
        if self.is_unlimited(now) {
            Quota::Unlimited
        } else {
            Quota::Limited(DAILY_LIMIT.saturating_sub(self.usage.count))
        }
    }

    pub fn is_limit_reached(&self, now: DateTime<Utc>) -> bool {
        !self.is_unlimited(now) && self.usage.count >= DAILY_LIMIT
    }

    pub fn time_left(&self, now: DateTime<Utc>) -> Option<Duration> {
        if !self.trial_active {
            return None;
        }
        let start = self.trial_start?;
        let remaining = TRIAL_DURATION_MS - (now.timestamp_millis() - start);
        Some(Duration::from_millis(
            remaining.clamp(0, TRIAL_DURATION_MS) as u64,
        ))
    }

    pub fn trial_status(&self) -> TrialStatus {
        if self.trial_active {
            TrialStatus::Active
        } else if self.trial_used {
            TrialStatus::Expired
        } else {
            TrialStatus::Inactive
        }
    }

    /// Check whether another analysis may run
    pub fn check_analysis(&self, now: DateTime<Utc>) -> FeatureGate {
        if self.is_limit_reached(now) {
            FeatureGate::DailyLimitReached {
                used: self.usage.count,
                limit: DAILY_LIMIT,
                resets_at: next_reset_time(now),
            }
        } else {
            FeatureGate::Allowed
        }
    }
}

/// Count one analysis inside a raw metadata object, applying the daily reset
/// first. Used as an in-store update so concurrent writers do not lose counts.
pub fn bump_usage(metadata: &mut Metadata, today: NaiveDate) {
    let mut usage = UsageRecord::from_value(metadata.get(USAGE_KEY));
    usage.reset_if_new_day(today);
    usage.count = usage.count.saturating_add(1);
    metadata.insert(USAGE_KEY.to_string(), usage.to_value());
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap()
    }

    fn today() -> NaiveDate {
        now().date_naive()
    }

    fn metadata(value: Value) -> Metadata {
        value.as_object().cloned().unwrap()
    }

    fn free_with_count(count: u32) -> Entitlement {
        let mut entitlement = Entitlement::new(today());
        entitlement.usage.count = count;
        entitlement
    }

    #[test]
    fn test_from_empty_metadata() {
        let entitlement = Entitlement::from_metadata(&Metadata::new());
        assert_eq!(entitlement.usage.count, 0);
        assert!(!entitlement.is_pro);
        assert!(!entitlement.trial_active);
        assert_eq!(entitlement.trial_start, None);
    }

    #[test]
    fn test_from_metadata_wire_names() {
        let entitlement = Entitlement::from_metadata(&metadata(json!({
            "usage": { "count": 4, "lastReset": "2026-10-16" },
            "isPro": false,
            "proDemoUsed": false,
            "proDemoActive": true,
            "proDemoStartTime": 1_792_137_600_000i64,
        })));

        assert_eq!(entitlement.usage.count, 4);
        assert_eq!(entitlement.usage.last_reset, today());
        assert!(entitlement.trial_active);
        assert_eq!(entitlement.trial_start, Some(1_792_137_600_000));
    }

    #[test]
    fn test_mistyped_fields_default() {
        let entitlement = Entitlement::from_metadata(&metadata(json!({
            "usage": { "count": "lots", "lastReset": 7 },
            "isPro": "yes",
        })));
        assert_eq!(entitlement.usage.count, 0);
        assert_eq!(entitlement.usage.last_reset, NaiveDate::MIN);
        assert!(!entitlement.is_pro);
    }

    #[test]
    fn test_lazy_reset() {
        let mut usage = UsageRecord {
            count: 7,
            last_reset: today() - chrono::Duration::days(1),
        };
        assert!(usage.reset_if_new_day(today()));
        assert_eq!(usage, UsageRecord::new(today()));
        assert!(!usage.reset_if_new_day(today()));
    }

    #[test]
    fn test_write_keeps_foreign_keys() {
        let base = metadata(json!({ "theme": "dark", "isPro": false }));
        let mut entitlement = Entitlement::new(today());
        entitlement.is_pro = true;

        let merged = entitlement.merged_into(&base);
        assert_eq!(merged.get("theme"), Some(&json!("dark")));
        assert_eq!(merged.get("isPro"), Some(&json!(true)));
        assert_eq!(
            merged.get("usage"),
            Some(&json!({ "count": 0, "lastReset": "2026-10-16" }))
        );
        assert_eq!(merged.get("proDemoStartTime"), Some(&Value::Null));
    }

    #[test]
    fn test_quota_arithmetic() {
        assert_eq!(free_with_count(3).remaining_quota(now()), Quota::Limited(7));
        assert!(!free_with_count(9).is_limit_reached(now()));

        let at_limit = free_with_count(10);
        assert_eq!(at_limit.remaining_quota(now()), Quota::Limited(0));
        assert!(at_limit.is_limit_reached(now()));

        let over = free_with_count(11);
        assert_eq!(over.remaining_quota(now()), Quota::Limited(0));
        assert!(over.is_limit_reached(now()));
    }

    #[test]
    fn test_unlimited_override() {
        for count in [0, 10, 500] {
            let mut pro = free_with_count(count);
            pro.is_pro = true;
            assert!(!pro.is_limit_reached(now()));
            assert_eq!(pro.remaining_quota(now()), Quota::Unlimited);

            let mut trial = free_with_count(count);
            trial.trial_active = true;
            trial.trial_start = Some(now().timestamp_millis());
            assert!(!trial.is_limit_reached(now()));
            assert_eq!(trial.remaining_quota(now()), Quota::Unlimited);
        }
    }

    #[test]
    fn test_elapsed_trial_is_not_unlimited() {
        let mut trial = free_with_count(10);
        trial.trial_active = true;
        trial.trial_start = Some(now().timestamp_millis() - TRIAL_DURATION_MS);

        assert!(!trial.trial_running(now()));
        assert!(!trial.is_unlimited(now()));
        assert_eq!(trial.remaining_quota(now()), Quota::Limited(0));
        assert!(!trial.check_analysis(now()).is_allowed());

        trial.trial_start = None;
        assert!(!trial.is_unlimited(now()));
    }

    #[test]
    fn test_check_analysis_gate() {
        assert!(free_with_count(2).check_analysis(now()).is_allowed());

        match free_with_count(10).check_analysis(now()) {
            FeatureGate::DailyLimitReached { used, limit, .. } => {
                assert_eq!(used, 10);
                assert_eq!(limit, 10);
            }
            other => panic!("Expected limit gate, got {:?}", other),
        }
    }

    #[test]
    fn test_trial_expiry() {
        let mut entitlement = Entitlement::new(today());
        entitlement.trial_active = true;
        entitlement.trial_start = Some(now().timestamp_millis() - TRIAL_DURATION_MS - 1);

        assert!(entitlement.expire_if_elapsed(now()));
        assert!(!entitlement.trial_active);
        assert!(entitlement.trial_used);
        assert_eq!(entitlement.trial_status(), TrialStatus::Expired);

        // Only transitions once
        assert!(!entitlement.expire_if_elapsed(now()));
    }

    #[test]
    fn test_trial_still_running() {
        let mut entitlement = Entitlement::new(today());
        entitlement.trial_active = true;
        entitlement.trial_start = Some(now().timestamp_millis() - 5 * 60 * 1000);

        assert!(!entitlement.expire_if_elapsed(now()));
        assert_eq!(
            entitlement.time_left(now()),
            Some(Duration::from_millis(25 * 60 * 1000))
        );
    }

    #[test]
    fn test_active_trial_without_start_expires() {
        let mut entitlement = Entitlement::new(today());
        entitlement.trial_active = true;

        assert_eq!(entitlement.time_left(now()), None);
        assert!(entitlement.expire_if_elapsed(now()));
        assert!(entitlement.trial_used);
    }

    #[test]
    fn test_time_left_never_negative() {
        let mut entitlement = Entitlement::new(today());
        entitlement.trial_active = true;
        entitlement.trial_start = Some(now().timestamp_millis() - 2 * TRIAL_DURATION_MS);
        assert_eq!(entitlement.time_left(now()), Some(Duration::ZERO));
    }

    #[test]
    fn test_bump_usage_resets_stale_day() {
        let mut raw = metadata(json!({
            "usage": { "count": 9, "lastReset": "2026-10-15" },
            "note": "keep",
        }));
        bump_usage(&mut raw, today());

        let entitlement = Entitlement::from_metadata(&raw);
        assert_eq!(entitlement.usage, UsageRecord { count: 1, last_reset: today() });
        assert_eq!(raw.get("note"), Some(&json!("keep")));
    }
}
