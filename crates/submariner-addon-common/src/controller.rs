//! Shared controller plumbing: requeue backoff and result logging

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use kube::runtime::controller::Action;
use tracing::{debug, error, warn};

use crate::Error;

/// Watcher timeout (seconds); must stay below the client read timeout
pub const WATCH_TIMEOUT_SECS: u32 = 25;

/// First requeue delay after a failed reconcile
pub const BACKOFF_BASE: Duration = Duration::from_secs(5);

/// Upper bound for the requeue delay
pub const BACKOFF_MAX: Duration = Duration::from_secs(300);

/// Failure entries untouched for this long belong to deleted objects
const STALE_AFTER: Duration = Duration::from_secs(2 * BACKOFF_MAX.as_secs());

#[derive(Debug)]
struct Failures {
    count: u32,
    last: Instant,
}

/// Per-key exponential requeue backoff.
///
/// Retryable errors double the delay on every consecutive failure of the
/// same key; errors that need a config fix go straight to the cap. A
/// successful reconcile resets the key. A failing key requeues at least
/// every [`BACKOFF_MAX`], so entries idle for twice that are dropped.
#[derive(Debug, Default)]
pub struct ReconcileBackoff {
    failures: Mutex<HashMap<String, Failures>>,
}

impl ReconcileBackoff {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure for `key` and return the requeue action
    pub fn on_error(&self, key: &str, error: &Error) -> Action {
        let delay = if error.is_retryable() {
            delay_for(self.record_failure(key, Instant::now()))
        } else {
            BACKOFF_MAX
        };

        error!(key, error = %error, requeue_secs = delay.as_secs(), "Reconciliation failed");
        Action::requeue(delay)
    }

    fn record_failure(&self, key: &str, now: Instant) -> u32 {
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        failures.retain(|_, f| now.saturating_duration_since(f.last) < STALE_AFTER);
        let entry = failures.entry(key.to_string()).or_insert(Failures {
            count: 0,
            last: now,
        });
        entry.count = entry.count.saturating_add(1);
        entry.last = now;
        entry.count
    }

    /// Number of keys currently backing off
    pub fn tracked(&self) -> usize {
        self.failures.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Forget failures for `key`; also called once a deleted object is cleaned up
    pub fn on_success(&self, key: &str) {
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        if failures.remove(key).is_some() {
            debug!(key, "Backoff reset");
        }
    }
}

fn delay_for(attempts: u32) -> Duration {
    let exp = attempts.saturating_sub(1).min(16);
    BACKOFF_BASE
        .checked_mul(1u32 << exp)
        .map_or(BACKOFF_MAX, |d| d.min(BACKOFF_MAX))
}

/// Log the outcome of each reconcile emitted by a `Controller` stream
pub fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => warn!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::api_error;

    #[test]
    fn delay_doubles_and_caps() {
        assert_eq!(delay_for(1), Duration::from_secs(5));
        assert_eq!(delay_for(2), Duration::from_secs(10));
        assert_eq!(delay_for(3), Duration::from_secs(20));
        assert_eq!(delay_for(7), BACKOFF_MAX);
        assert_eq!(delay_for(u32::MAX), BACKOFF_MAX);
    }

    #[test]
    fn retryable_errors_back_off_per_key() {
        let backoff = ReconcileBackoff::new();
        let err = Error::from(api_error(500, "InternalError"));

        assert_eq!(backoff.on_error("a", &err), Action::requeue(Duration::from_secs(5)));
        assert_eq!(backoff.on_error("a", &err), Action::requeue(Duration::from_secs(10)));
        assert_eq!(backoff.on_error("b", &err), Action::requeue(Duration::from_secs(5)));

        backoff.on_success("a");
        assert_eq!(backoff.on_error("a", &err), Action::requeue(Duration::from_secs(5)));
    }

    #[test]
    fn idle_keys_are_dropped() {
        let backoff = ReconcileBackoff::new();
        let start = Instant::now();

        assert_eq!(backoff.record_failure("deleted", start), 1);
        assert_eq!(backoff.record_failure("live", start), 1);
        assert_eq!(backoff.record_failure("live", start + BACKOFF_MAX), 2);
        assert_eq!(backoff.tracked(), 2);

        let later = start + STALE_AFTER + Duration::from_secs(1);
        assert_eq!(backoff.record_failure("live", later), 3);
        assert_eq!(backoff.tracked(), 1);
    }

    #[test]
    fn permanent_errors_wait_the_maximum() {
        let backoff = ReconcileBackoff::new();
        let err = Error::validation_for("cluster1/submariner", "missing credentials");
        assert_eq!(backoff.on_error("a", &err), Action::requeue(BACKOFF_MAX));
    }
}
