//! Deadline-bounded convergence polling.
//!
//! [`spin`] is the building block of every "wait until healthy" assertion in
//! the suite: it calls a producer at a fixed interval, judges each value with
//! a predicate, and stops at the first value the predicate accepts or when the
//! wait budget runs out. There is no backoff.
//!
//! Producers must not fail. A producer that talks to a flaky endpoint maps its
//! errors into a value the predicate rejects, so the poll keeps going.

use crate::errors::{ChaosError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

/// Default overall wait budget for one poll.
pub const DEFAULT_WAIT_BUDGET: Duration = Duration::from_secs(300);

/// Deadline used when the wait budget does not fit into an [`Instant`].
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Default delay between two producer calls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Options for a single [`spin`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpinOptions {
    /// Overall time allowed before the poll gives up.
    pub wait_budget: Duration,
    /// Fixed delay between attempts.
    pub interval: Duration,
    /// Raise [`ChaosError::Timeout`] on deadline instead of returning the
    /// last value.
    pub assert_success: bool,
}

impl Default for SpinOptions {
    fn default() -> Self {
        Self {
            wait_budget: DEFAULT_WAIT_BUDGET,
            interval: DEFAULT_POLL_INTERVAL,
            assert_success: true,
        }
    }
}

impl SpinOptions {
    pub fn new(wait_budget: Duration, interval: Duration) -> Self {
        Self {
            wait_budget,
            interval,
            assert_success: true,
        }
    }

    pub fn with_budget(mut self, wait_budget: Duration) -> Self {
        self.wait_budget = wait_budget;
        self
    }

    /// Return the last value on deadline instead of failing.
    pub fn tolerant(mut self) -> Self {
        self.assert_success = false;
        self
    }

    pub fn asserting(mut self, assert_success: bool) -> Self {
        self.assert_success = assert_success;
        self
    }
}

/// Predicate output: did the value converge, and why (not).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub converged: bool,
    pub message: String,
}

impl Verdict {
    pub fn new(converged: bool, message: impl Into<String>) -> Self {
        Self {
            converged,
            message: message.into(),
        }
    }

    pub fn pending(message: impl Into<String>) -> Self {
        Self::new(false, message)
    }
}

/// What a [`spin`] call ended with.
#[derive(Debug, Clone)]
pub struct SpinOutcome<T> {
    /// The accepted value, or the last produced one when the poll timed out
    /// in tolerant mode.
    pub value: T,
    pub converged: bool,
    /// Number of producer calls made.
    pub attempts: u32,
    pub elapsed: Duration,
    /// Diagnostic from the last predicate call.
    pub message: String,
}

/// Poll `producer` until `predicate` accepts a value or the budget runs out.
///
/// The producer is called at least once, even with a zero budget. On deadline
/// the error embeds the last predicate message when `assert_success` is set;
/// otherwise the last value comes back with `converged == false`.
pub async fn spin<T, P, Fut, V>(
    label: &str,
    options: &SpinOptions,
    mut producer: P,
    mut predicate: V,
) -> Result<SpinOutcome<T>>
where
    P: FnMut() -> Fut,
    Fut: Future<Output = T>,
    V: FnMut(&T) -> Verdict,
{
    let start = Instant::now();
    let deadline = start
        .checked_add(options.wait_budget)
        .unwrap_or_else(|| start + FAR_FUTURE);
    let mut attempts = 0u32;

    loop {
        let value = producer().await;
        attempts += 1;
        let verdict = predicate(&value);
        let now = Instant::now();
        let elapsed = now.duration_since(start);

        if verdict.converged {
            info!(
                label,
                attempts,
                elapsed_ms = elapsed.as_millis() as u64,
                "Success state reached"
            );
            return Ok(SpinOutcome {
                value,
                converged: true,
                attempts,
                elapsed,
                message: verdict.message,
            });
        }

        if now >= deadline {
            warn!(
                label,
                attempts,
                elapsed_ms = elapsed.as_millis() as u64,
                error = %verdict.message,
                "Poll deadline reached"
            );
            if options.assert_success {
                return Err(ChaosError::Timeout {
                    label: label.to_string(),
                    waited: elapsed,
                    message: verdict.message,
                });
            }
            return Ok(SpinOutcome {
                value,
                converged: false,
                attempts,
                elapsed,
                message: verdict.message,
            });
        }

        let remaining = deadline.duration_since(now);
        debug!(
            label,
            attempts,
            remaining_secs = remaining.as_secs_f64(),
            error = %verdict.message,
            "Waiting for success state"
        );
        sleep(options.interval.min(remaining)).await;
    }
}
