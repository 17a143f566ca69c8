//! Fixed-interval polling with a deadline.
//!
//! Every wait in this crate (force deletion, pod readiness) goes through
//! [`PollPolicy`]. The interval is constant: objects are expected to converge
//! within a few cycles once the blocking condition is cleared, so backing off
//! would only slow convergence down.
//!
//! When the deadline passes the check runs one final time before the wait is
//! declared failed, so a timeout is never reported purely because the clock
//! ran out.
//!
//! # Example
//!
//! ```ignore
//! use chaosctl::retry::{PollPolicy, Probe};
//!
//! let policy = PollPolicy::new(Duration::from_secs(2), Duration::from_secs(60));
//! let gone = policy
//!     .poll("wait_absent", || async {
//!         match client.get(name).await {
//!             Err(e) if e.is_not_found() => Probe::Ready(()),
//!             _ => Probe::Pending,
//!         }
//!     })
//!     .await;
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{trace, warn};

/// Default interval between checks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Result of a single check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe<T> {
    /// Condition met, stop polling
    Ready(T),
    /// Condition not met yet, keep polling
    Pending,
}

/// Polling schedule: a fixed interval bounded by a total timeout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollPolicy {
    /// Time between checks
    pub interval: Duration,
    /// Total budget before the final check
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            timeout: Duration::from_secs(60),
        }
    }
}

impl PollPolicy {
    /// Create a policy with the given interval and timeout
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Same interval, different timeout
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }

    /// Run `check` until it returns [`Probe::Ready`] or the timeout elapses.
    ///
    /// Returns `Some(value)` on success. After the deadline `check` is called
    /// exactly once more; `None` means that final check was still pending.
    pub async fn poll<F, Fut, T>(&self, operation: &str, mut check: F) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Probe<T>>,
    {
        let deadline = Instant::now() + self.timeout;
        let mut attempt = 0u32;

        while Instant::now() < deadline {
            attempt += 1;
            if let Probe::Ready(value) = check().await {
                return Some(value);
            }
            trace!(operation, attempt, "condition not yet met, retrying");
            tokio::time::sleep(self.interval).await;
        }

        match check().await {
            Probe::Ready(value) => Some(value),
            Probe::Pending => {
                warn!(
                    operation,
                    attempts = attempt + 1,
                    timeout_secs = self.timeout.as_secs(),
                    "condition not met before deadline"
                );
                None
            }
        }
    }
}
