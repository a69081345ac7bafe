//! Conflict retry for read-modify-write sequences
//!
//! Status and finalizer updates re-read the object on every attempt, so a
//! 409 only means "someone wrote first": retry a few times on a short,
//! flat schedule and let the controller requeue if contention persists.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::Error;

/// Attempts before a conflict is returned to the caller
pub const CONFLICT_ATTEMPTS: u32 = 5;

/// Delay between conflict attempts, before jitter
pub const CONFLICT_DELAY: Duration = Duration::from_millis(10);

/// Upper bound of the jitter, as a fraction of [`CONFLICT_DELAY`]
const CONFLICT_JITTER: f64 = 0.1;

fn jittered(delay: Duration, jitter: f64) -> Duration {
    let factor = rand::thread_rng().gen_range(1.0..=1.0 + jitter);
    delay.mul_f64(factor)
}

/// Re-run `operation` while it fails with a 409 Conflict
///
/// Any other error is returned at once. After [`CONFLICT_ATTEMPTS`]
/// conflicts the last one is returned.
pub async fn retry_on_conflict<F, Fut, T>(operation_name: &str, mut operation: F) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_conflict() => return Err(e),
            Err(e) if attempt >= CONFLICT_ATTEMPTS => {
                warn!(operation = %operation_name, attempt, "Conflict persisted, giving up");
                return Err(e);
            }
            Err(_) => {
                debug!(operation = %operation_name, attempt, "Conflict, retrying");
                tokio::time::sleep(jittered(CONFLICT_DELAY, CONFLICT_JITTER)).await;
            }
        }
    }
}
