//! Entitlement tracker
//!
//! Holds the current identity's entitlement in memory and mediates every
//! change against the account store. Loads are generation-stamped so a
//! response for an identity that has since been replaced is dropped.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;

use super::clock::Clock;
use super::limits::{format_time_left, FeatureGate, Quota, DAILY_LIMIT};
use super::usage::{bump_usage, Entitlement, UsageRecord};
use crate::account::{AccountStore, Identity, Metadata, StoreError};

#[derive(Error, Debug)]
pub enum TierError {
    #[error("No signed-in user")]
    NoIdentity,
    #[error("Pro trial already used")]
    TrialAlreadyUsed,
    #[error("Pro trial already running")]
    TrialAlreadyActive,
    #[error("Account is already Pro")]
    AlreadyPro,
    #[error("Account store error: {0}")]
    Store(#[from] StoreError),
}

/// Serializable view of the tracker for clients
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UsageStatus {
    pub usage: UsageRecord,
    pub is_pro: bool,
    pub pro_demo_used: bool,
    pub pro_demo_active: bool,
    /// Milliseconds left in the trial
    pub time_left: Option<u64>,
    pub time_left_formatted: Option<String>,
    pub limit: u32,
    /// `None` when unlimited
    pub remaining: Option<u32>,
    pub is_limit_reached: bool,
    pub loading: bool,
}

#[derive(Debug, Clone)]
struct TrackerState {
    identity: Option<Identity>,
    entitlement: Entitlement,
    /// Last metadata object seen from the store, kept so writes do not drop
    /// keys owned by other features
    raw: Metadata,
    ready: bool,
}

pub struct EntitlementTracker<S: AccountStore + ?Sized> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    state: RwLock<TrackerState>,
    generation: AtomicU64,
}

pub type SharedTracker<S> = Arc<EntitlementTracker<S>>;

impl<S: AccountStore + ?Sized> EntitlementTracker<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        let today = clock.today();
        Self {
            store,
            clock,
            state: RwLock::new(TrackerState {
                identity: None,
                entitlement: Entitlement::new(today),
                raw: Metadata::new(),
                ready: false,
            }),
            generation: AtomicU64::new(0),
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    fn is_superseded(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) != generation
    }

    /// Load the entitlement for `identity`, or reset to the signed-out
    /// defaults when there is none.
    ///
    /// A trial found past its window is closed and written back before the
    /// state is exposed. On a failed read the previous state is kept.
    pub async fn load(&self, identity: Option<Identity>) -> Result<(), TierError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let Some(identity) = identity else {
            let mut state = self.state.write().await;
            *state = TrackerState {
                identity: None,
                entitlement: Entitlement::new(self.clock.today()),
                raw: Metadata::new(),
                ready: true,
            };
            return Ok(());
        };

        let raw = match self.store.get(&identity).await {
            Ok(raw) => raw,
            Err(_) if self.is_superseded(generation) => {
                tracing::debug!("Discarding failed load for {}: superseded", identity.user_id);
                return Ok(());
            }
            Err(e) => {
                tracing::warn!("Failed to load entitlement for {}: {}", identity.user_id, e);
                return Err(e.into());
            }
        };

        if self.is_superseded(generation) {
            tracing::debug!("Discarding stale load for {}", identity.user_id);
            return Ok(());
        }

        let now = self.clock.now();
        let mut entitlement = Entitlement::from_metadata(&raw);
        entitlement.usage.reset_if_new_day(now.date_naive());

        let raw = if entitlement.expire_if_elapsed(now) {
            tracing::info!("Pro trial expired for {}", identity.user_id);
            match self
                .store
                .update(&identity, entitlement.merged_into(&raw))
                .await
            {
                Ok(stored) => stored,
                Err(e) => {
                    tracing::warn!(
                        "Failed to persist trial expiry for {}: {}",
                        identity.user_id,
                        e
                    );
                    return Err(e.into());
                }
            }
        } else {
            raw
        };

        if self.is_superseded(generation) {
            tracing::debug!("Discarding stale load for {}", identity.user_id);
            return Ok(());
        }

        let mut state = self.state.write().await;
        *state = TrackerState {
            identity: Some(identity),
            entitlement,
            raw,
            ready: true,
        };
        Ok(())
    }

    /// Reload the current identity.
    pub async fn refresh(&self) -> Result<(), TierError> {
        let identity = self.state.read().await.identity.clone();
        self.load(identity).await
    }

    async fn snapshot(&self) -> Result<(Identity, Entitlement, Metadata), TierError> {
        let state = self.state.read().await;
        let identity = state.identity.clone().ok_or(TierError::NoIdentity)?;
        Ok((identity, state.entitlement.clone(), state.raw.clone()))
    }

    /// Take a stored record as the current state, unless the tracker has
    /// moved to another identity while the write was in flight.
    async fn adopt(&self, identity: &Identity, stored: Metadata) {
        let mut entitlement = Entitlement::from_metadata(&stored);
        entitlement.usage.reset_if_new_day(self.clock.today());

        let mut state = self.state.write().await;
        if state.identity.as_ref() != Some(identity) {
            tracing::debug!("Identity changed during write for {}", identity.user_id);
            return;
        }
        state.entitlement = entitlement;
        state.raw = stored;
    }

    async fn write(&self, identity: &Identity, metadata: Metadata) -> Result<(), TierError> {
        match self.store.update(identity, metadata).await {
            Ok(stored) => {
                self.adopt(identity, stored).await;
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Failed to save entitlement for {}: {}", identity.user_id, e);
                Err(e.into())
            }
        }
    }

    /// Count one analysis. The increment runs inside the store so parallel
    /// sessions for the same identity cannot overwrite each other's counts.
    pub async fn increment_usage(&self) -> Result<(), TierError> {
        let (identity, _, _) = self.snapshot().await?;
        let today = self.clock.today();

        match self
            .store
            .modify(&identity, &|metadata: &mut Metadata| bump_usage(metadata, today))
            .await
        {
            Ok(stored) => {
                self.adopt(&identity, stored).await;
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Failed to record usage for {}: {}", identity.user_id, e);
                Err(e.into())
            }
        }
    }

    /// Begin the one-off Pro trial.
    pub async fn start_trial(&self) -> Result<(), TierError> {
        let (identity, mut entitlement, raw) = self.snapshot().await?;

        if entitlement.is_pro {
            return Err(TierError::AlreadyPro);
        }
        if entitlement.trial_used {
            return Err(TierError::TrialAlreadyUsed);
        }
        if entitlement.trial_active {
            return Err(TierError::TrialAlreadyActive);
        }

        entitlement.trial_active = true;
        entitlement.trial_start = Some(self.clock.now().timestamp_millis());

        self.write(&identity, entitlement.merged_into(&raw)).await?;
        tracing::info!("Pro trial started for {}", identity.user_id);
        Ok(())
    }

    /// Flip the Pro flag. Not gated on payment.
    pub async fn toggle_pro(&self) -> Result<(), TierError> {
        let (identity, mut entitlement, raw) = self.snapshot().await?;
        entitlement.is_pro = !entitlement.is_pro;

        self.write(&identity, entitlement.merged_into(&raw)).await?;
        tracing::info!("Pro set to {} for {}", entitlement.is_pro, identity.user_id);
        Ok(())
    }

    pub async fn identity(&self) -> Option<Identity> {
        self.state.read().await.identity.clone()
    }

    pub async fn is_ready(&self) -> bool {
        self.state.read().await.ready
    }

    pub async fn entitlement(&self) -> Entitlement {
        self.state.read().await.entitlement.clone()
    }

    pub async fn remaining_quota(&self) -> Quota {
        let now = self.clock.now();
        self.state.read().await.entitlement.remaining_quota(now)
    }

    pub async fn is_limit_reached(&self) -> bool {
        let now = self.clock.now();
        self.state.read().await.entitlement.is_limit_reached(now)
    }

    pub async fn time_left(&self) -> Option<Duration> {
        self.state
            .read()
            .await
            .entitlement
            .time_left(self.clock.now())
    }

    pub async fn check_analysis(&self) -> FeatureGate {
        self.state
            .read()
            .await
            .entitlement
            .check_analysis(self.clock.now())
    }

    pub async fn status(&self) -> UsageStatus {
        let state = self.state.read().await;
        let entitlement = &state.entitlement;
        let now = self.clock.now();
        let time_left = entitlement.time_left(now);

        UsageStatus {
            usage: entitlement.usage.clone(),
            is_pro: entitlement.is_pro,
            pro_demo_used: entitlement.trial_used,
            pro_demo_active: entitlement.trial_active,
            time_left: time_left.map(|d| d.as_millis() as u64),
            time_left_formatted: time_left.map(format_time_left),
            limit: DAILY_LIMIT,
            remaining: entitlement.remaining_quota(now).as_option(),
            is_limit_reached: entitlement.is_limit_reached(now),
            loading: !state.ready,
        }
    }
}
