//! Once-a-second trial countdown
//!
//! Publishes the remaining trial time on a watch channel. When it hits zero
//! the tracker is refreshed, which closes and persists the trial, and the
//! task ends once no trial is left. A failed refresh is retried every tick.
//! Dropping the handle stops the task.

use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use super::tracker::SharedTracker;
use crate::account::AccountStore;

const TICK_INTERVAL: Duration = Duration::from_secs(1);

pub struct TrialCountdown {
    time_left: watch::Receiver<Option<Duration>>,
    stop_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl TrialCountdown {
    pub fn spawn<S>(tracker: SharedTracker<S>) -> Self
    where
        S: AccountStore + ?Sized + 'static,
    {
        let (tx, rx) = watch::channel(None);
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK_INTERVAL);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let left = tracker.time_left().await;
                        tx.send_replace(left);

                        match left {
                            None => break,
                            Some(left) if left.is_zero() => {
                                // A failed refresh leaves the trial open; retry on the next tick
                                if let Err(e) = tracker.refresh().await {
                                    tracing::warn!("Failed to close expired trial: {}", e);
                                    continue;
                                }
                                let left = tracker.time_left().await;
                                tx.send_replace(left);
                                if left.is_none() {
                                    break;
                                }
                            }
                            Some(_) => {}
                        }
                    }
                    _ = &mut stop_rx => break,
                }
            }
        });

        Self {
            time_left: rx,
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Duration>> {
        self.time_left.clone()
    }

    pub fn time_left(&self) -> Option<Duration> {
        *self.time_left.borrow()
    }

    /// True once the task has ended, whether stopped or expired.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |handle| handle.is_finished())
    }

    /// Stop ticking and wait for the task to end.
    pub async fn stop(mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        self.finished().await;
    }

    /// Wait for the countdown to end on its own.
    pub async fn finished(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::error!("Trial countdown task failed: {}", e);
            }
        }
    }
}

impl Drop for TrialCountdown {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{Identity, Metadata, MemoryAccountStore, StoreError};
    use crate::tier::clock::ManualClock;
    use crate::tier::limits::Quota;
    use crate::tier::tracker::EntitlementTracker;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryAccountStore,
        down: AtomicBool,
    }

    impl FlakyStore {
        fn check(&self) -> Result<(), StoreError> {
            if self.down.load(Ordering::SeqCst) {
                Err(StoreError::Http {
                    status: 503,
                    body: "unavailable".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl AccountStore for FlakyStore {
        async fn get(&self, identity: &Identity) -> Result<Metadata, StoreError> {
            self.check()?;
            self.inner.get(identity).await
        }

        async fn update(&self, identity: &Identity, metadata: Metadata) -> Result<Metadata, StoreError> {
            self.check()?;
            self.inner.update(identity, metadata).await
        }

        fn name(&self) -> &'static str {
            "flaky"
        }
    }

    async fn trial_tracker() -> (
        Arc<EntitlementTracker<MemoryAccountStore>>,
        Arc<MemoryAccountStore>,
        Arc<ManualClock>,
    ) {
        let store = Arc::new(MemoryAccountStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap(),
        ));
        let tracker = Arc::new(EntitlementTracker::new(store.clone(), clock.clone()));
        tracker.load(Some(Identity::new("user-1"))).await.unwrap();
        tracker.start_trial().await.unwrap();
        (tracker, store, clock)
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_expires_trial() {
        let (tracker, store, clock) = trial_tracker().await;
        clock.advance(chrono::Duration::seconds(29 * 60 + 59));

        let mut countdown = TrialCountdown::spawn(tracker.clone());
        let mut rx = countdown.subscribe();

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), Some(Duration::from_secs(1)));

        assert!(!countdown.is_finished());
        clock.advance(chrono::Duration::seconds(1));
        countdown.finished().await;

        assert!(countdown.is_finished());
        assert_eq!(countdown.time_left(), None);
        let entitlement = tracker.entitlement().await;
        assert!(!entitlement.trial_active);
        assert!(entitlement.trial_used);

        let stored = store.get(&Identity::new("user-1")).await.unwrap();
        assert_eq!(stored["proDemoActive"], json!(false));
        assert_eq!(stored["proDemoUsed"], json!(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_retries_failed_expiry() {
        let store = Arc::new(FlakyStore::default());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap(),
        ));
        let tracker = Arc::new(EntitlementTracker::new(store.clone(), clock.clone()));
        let user = Identity::new("user-1");
        tracker.load(Some(user.clone())).await.unwrap();
        tracker.start_trial().await.unwrap();

        clock.advance(chrono::Duration::minutes(31));
        store.down.store(true, Ordering::SeqCst);

        let mut countdown = TrialCountdown::spawn(tracker.clone());
        tokio::time::sleep(Duration::from_millis(2500)).await;

        // Still flagged active, but the elapsed window grants nothing
        assert!(tracker.entitlement().await.trial_active);
        assert_eq!(tracker.remaining_quota().await, Quota::Limited(10));
        assert_eq!(countdown.time_left(), Some(Duration::ZERO));

        store.down.store(false, Ordering::SeqCst);
        countdown.finished().await;

        assert_eq!(countdown.time_left(), None);
        let entitlement = tracker.entitlement().await;
        assert!(!entitlement.trial_active);
        assert!(entitlement.trial_used);

        let stored = store.inner.get(&user).await.unwrap();
        assert_eq!(stored["proDemoActive"], json!(false));
        assert_eq!(stored["proDemoUsed"], json!(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_without_trial_stops() {
        let store = Arc::new(MemoryAccountStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let tracker = Arc::new(EntitlementTracker::new(store, clock));
        tracker.load(Some(Identity::new("user-1"))).await.unwrap();

        let mut countdown = TrialCountdown::spawn(tracker);
        countdown.finished().await;
        assert_eq!(countdown.time_left(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_stop() {
        let (tracker, _, _) = trial_tracker().await;

        let countdown = TrialCountdown::spawn(tracker.clone());
        let mut rx = countdown.subscribe();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), Some(Duration::from_secs(30 * 60)));

        countdown.stop().await;
        assert!(tracker.entitlement().await.trial_active);
    }
}
