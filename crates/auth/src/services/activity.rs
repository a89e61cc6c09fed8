//! Idle-session timeout.
//!
//! Activity is stamped into the same storage medium the identity provider
//! persists its session into:
//!
//! - on every session-token write (see [`ActivityTrackingStorage`](crate::storage::ActivityTrackingStorage))
//! - on reported interactions and inbound HTTP requests
//! - once at start-up
//!
//! A session idle for longer than [`IDLE_TIMEOUT`] is signed out globally,
//! regardless of token expiry. The check runs at start-up and every
//! [`CHECK_INTERVAL`] while an [`ActivityGuard`] is held.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::clock::Clock;
use crate::provider::{IdentityProvider, SignOutScope};
use crate::storage::{
    SessionStorage, StorageError, clear_local_state, read_activity, stamp_activity,
};

/// Idle time after which the session is forcibly ended.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// How often the idle check runs.
pub const CHECK_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Coarse interaction kinds that count as activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionKind {
    #[serde(alias = "mousedown")]
    PointerDown,
    KeyDown,
    Scroll,
    TouchStart,
    Click,
}

/// Result of one idle check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InactivityCheck {
    /// No stamp has ever been stored; nothing to decide.
    NoActivityRecorded,
    /// Within the threshold.
    Active { idle: Duration },
    /// Over the threshold; a global sign-out was issued.
    Expired { idle: Duration },
}

/// Tracks the last interaction and enforces the idle timeout.
#[derive(Clone)]
pub struct ActivityMonitor {
    storage: Arc<dyn SessionStorage>,
    provider: Arc<dyn IdentityProvider>,
    clock: Arc<dyn Clock>,
    idle_timeout: Duration,
    check_interval: Duration,
}

impl ActivityMonitor {
    /// Monitor with the production thresholds.
    #[must_use]
    pub fn new(
        storage: Arc<dyn SessionStorage>,
        provider: Arc<dyn IdentityProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_timeouts(storage, provider, clock, IDLE_TIMEOUT, CHECK_INTERVAL)
    }

    #[must_use]
    pub fn with_timeouts(
        storage: Arc<dyn SessionStorage>,
        provider: Arc<dyn IdentityProvider>,
        clock: Arc<dyn Clock>,
        idle_timeout: Duration,
        check_interval: Duration,
    ) -> Self {
        Self {
            storage,
            provider,
            clock,
            idle_timeout,
            check_interval,
        }
    }

    /// Stamp the current time. Never moves the stored stamp backwards.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the medium cannot be read or written.
    pub fn update_activity(&self) -> Result<DateTime<Utc>, StorageError> {
        let stamped = stamp_activity(&*self.storage, self.clock.now_millis())?;
        Ok(DateTime::from_timestamp_millis(stamped).unwrap_or_else(|| self.clock.now()))
    }

    /// Fire-and-forget stamp for an interaction; failures are only logged.
    pub fn record_interaction(&self, kind: InteractionKind) {
        tracing::trace!(?kind, "interaction");
        if let Err(e) = self.update_activity() {
            tracing::warn!(error = %e, "Failed to record activity");
        }
    }

    /// The stored activity stamp, if any.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the medium cannot be read.
    pub fn last_activity(&self) -> Result<Option<DateTime<Utc>>, StorageError> {
        Ok(read_activity(&*self.storage)?.and_then(DateTime::from_timestamp_millis))
    }

    /// Sign out globally if the session has been idle past the threshold.
    ///
    /// A forced sign-out clears all local state (session blob, activity stamp,
    /// cached locale), so repeated checks trigger at most one sign-out per idle
    /// period. A failed sign-out call is logged; local state is cleared either way.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the medium cannot be read or written.
    pub async fn check_inactivity(&self) -> Result<InactivityCheck, StorageError> {
        let Some(last) = read_activity(&*self.storage)? else {
            return Ok(InactivityCheck::NoActivityRecorded);
        };

        let elapsed_ms = self.clock.now_millis().saturating_sub(last).max(0);
        let idle = Duration::from_millis(elapsed_ms.unsigned_abs());
        if idle <= self.idle_timeout {
            return Ok(InactivityCheck::Active { idle });
        }

        tracing::info!(idle_secs = idle.as_secs(), "Idle timeout exceeded, signing out");
        if let Err(e) = self.provider.sign_out(SignOutScope::Global).await {
            tracing::warn!(error = %e, "Forced sign-out failed at the identity provider");
        }
        clear_local_state(&*self.storage)?;

        Ok(InactivityCheck::Expired { idle })
    }

    /// Remove the activity stamp, cached locale and session blob.
    ///
    /// # Errors
    ///
    /// Returns the first `StorageError`; later keys are still attempted.
    pub fn clear_local_state(&self) -> Result<(), StorageError> {
        clear_local_state(&*self.storage)
    }

    /// Run the start-up check, stamp start-up activity, then keep checking
    /// on the interval until the returned guard is released or dropped.
    pub async fn start(&self) -> ActivityGuard {
        match self.check_inactivity().await {
            Ok(InactivityCheck::Expired { .. }) => {
                tracing::info!("Session expired while the process was not running");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Start-up idle check failed"),
        }
        if let Err(e) = self.update_activity() {
            tracing::warn!(error = %e, "Failed to stamp start-up activity");
        }

        let monitor = self.clone();
        let period = self.check_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = monitor.check_inactivity().await {
                    tracing::warn!(error = %e, "Idle check failed");
                }
            }
        });

        ActivityGuard {
            handle: Some(handle),
        }
    }
}

/// Owns the periodic idle check. Dropping it stops the check.
#[derive(Debug)]
pub struct ActivityGuard {
    handle: Option<JoinHandle<()>>,
}

impl ActivityGuard {
    /// Stop the periodic check now.
    pub fn release(mut self) {
        self.stop();
    }

    /// Whether the periodic check is still scheduled.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::storage::{MemoryStorage, keys};
    use crate::testing::{FakeIdentityProvider, ManualClock};

    struct Harness {
        storage: Arc<MemoryStorage>,
        provider: Arc<FakeIdentityProvider>,
        clock: Arc<ManualClock>,
        monitor: ActivityMonitor,
    }

    fn harness(check_interval: Duration) -> Harness {
        let storage = Arc::new(MemoryStorage::new());
        let provider = Arc::new(FakeIdentityProvider::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 5, 4, 9, 30, 0).unwrap(),
        ));
        let monitor = ActivityMonitor::with_timeouts(
            storage.clone(),
            provider.clone(),
            clock.clone(),
            IDLE_TIMEOUT,
            check_interval,
        );
        Harness {
            storage,
            provider,
            clock,
            monitor,
        }
    }

    #[tokio::test]
    async fn test_no_stamp_means_no_sign_out() {
        let h = harness(CHECK_INTERVAL);

        let check = h.monitor.check_inactivity().await.unwrap();

        assert_eq!(check, InactivityCheck::NoActivityRecorded);
        assert!(h.provider.sign_outs().is_empty());
    }

    #[tokio::test]
    async fn test_recent_activity_keeps_session() {
        let h = harness(CHECK_INTERVAL);
        h.monitor.update_activity().unwrap();
        h.clock.advance(chrono::Duration::hours(23));

        let check = h.monitor.check_inactivity().await.unwrap();

        assert!(matches!(check, InactivityCheck::Active { .. }));
        assert!(h.provider.sign_outs().is_empty());
    }

    #[tokio::test]
    async fn test_stale_activity_signs_out_once() {
        let h = harness(CHECK_INTERVAL);
        h.storage.set_item(keys::SESSION, "{}").unwrap();
        h.storage.set_item(keys::LOCALE, "fr").unwrap();
        h.monitor.update_activity().unwrap();
        h.clock.advance(chrono::Duration::hours(25));

        let first = h.monitor.check_inactivity().await.unwrap();
        let second = h.monitor.check_inactivity().await.unwrap();

        assert!(matches!(first, InactivityCheck::Expired { .. }));
        assert_eq!(second, InactivityCheck::NoActivityRecorded);
        assert_eq!(h.provider.sign_outs(), vec![SignOutScope::Global]);
        for key in [keys::SESSION, keys::LAST_ACTIVITY, keys::LOCALE] {
            assert_eq!(h.storage.get_item(key).unwrap(), None, "{key} left behind");
        }
    }

    #[tokio::test]
    async fn test_update_never_moves_backwards() {
        let h = harness(CHECK_INTERVAL);
        let first = h.monitor.update_activity().unwrap();
        h.clock.advance(chrono::Duration::minutes(-10));

        let second = h.monitor.update_activity().unwrap();

        assert_eq!(first, second);
        assert_eq!(h.monitor.last_activity().unwrap(), Some(first));
    }

    #[tokio::test]
    async fn test_start_checks_before_stamping() {
        let h = harness(CHECK_INTERVAL);
        h.monitor.update_activity().unwrap();
        h.clock.advance(chrono::Duration::days(2));

        let guard = h.monitor.start().await;

        assert_eq!(h.provider.sign_outs(), vec![SignOutScope::Global]);
        assert_eq!(h.monitor.last_activity().unwrap(), Some(h.clock.now()));
        guard.release();
    }

    #[tokio::test]
    async fn test_periodic_check_runs_while_guard_held() {
        let h = harness(Duration::from_millis(10));
        let guard = h.monitor.start().await;
        assert!(guard.is_running());

        h.clock.advance(chrono::Duration::hours(30));
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(h.provider.sign_outs(), vec![SignOutScope::Global]);
        drop(guard);
    }

    #[tokio::test]
    async fn test_released_guard_stops_checks() {
        let h = harness(Duration::from_millis(10));
        let guard = h.monitor.start().await;
        guard.release();

        h.clock.advance(chrono::Duration::hours(30));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(h.provider.sign_outs().is_empty());
    }

    #[test]
    fn test_clear_local_state_removes_all_keys() {
        let h = harness(CHECK_INTERVAL);
        for key in [keys::SESSION, keys::LAST_ACTIVITY, keys::LOCALE] {
            h.storage.set_item(key, "x").unwrap();
        }

        h.monitor.clear_local_state().unwrap();

        for key in [keys::SESSION, keys::LAST_ACTIVITY, keys::LOCALE] {
            assert_eq!(h.storage.get_item(key).unwrap(), None);
        }
    }

    #[test]
    fn test_interaction_kind_names() {
        let kind: InteractionKind = serde_json::from_str("\"mousedown\"").unwrap();
        assert_eq!(kind, InteractionKind::PointerDown);
        let kind: InteractionKind = serde_json::from_str("\"touchstart\"").unwrap();
        assert_eq!(kind, InteractionKind::TouchStart);
    }
}
