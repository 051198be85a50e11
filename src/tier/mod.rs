pub mod clock;
pub mod countdown;
pub mod limits;
pub mod middleware;
pub mod tracker;
pub mod usage;

pub use clock::{Clock, SystemClock};
pub use countdown::TrialCountdown;
pub use limits::{format_time_left, FeatureGate, Quota, TrialStatus, DAILY_LIMIT};
pub use middleware::{extract_identity_from_headers, TierErrorResponse};
pub use tracker::{EntitlementTracker, SharedTracker, TierError, UsageStatus};
pub use usage::{Entitlement, UsageRecord};
