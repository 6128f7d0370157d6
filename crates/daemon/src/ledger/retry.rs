// Bounded retry with exponential backoff around ledger calls.
//
// A fixed number of attempts, never unbounded: after the last failure the
// error reaches the caller, which rolls its optimistic state back.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::LedgerError;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_DELAY_MS: u64 = 250;
const DEFAULT_MAX_DELAY_MS: u64 = 5_000;

/// Retry policy for ledger operations; also the `[retry]` config section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first (minimum 1).
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles per attempt.
    pub base_delay_ms: u64,
    /// Upper bound for any single delay.
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self { max_attempts: 1, base_delay_ms: 0, max_delay_ms: 0 }
    }

    /// Delay after failed attempt number `attempt` (0-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.min(16); // cap exponent to avoid overflow
        let delay_ms = self.base_delay_ms.saturating_mul(1u64 << exp).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }

    /// Run `attempt_fn` until it succeeds, fails with a non-retryable error,
    /// or attempts run out. Returns the last error.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut attempt_fn: F) -> Result<T, LedgerError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match attempt_fn(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_retryable() && attempt + 1 < attempts => {
                    let delay = self.backoff_delay(attempt);
                    debug!(
                        operation,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "ledger call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => {
                    warn!(operation, attempts = attempt + 1, error = %error, "ledger call failed");
                    return Err(error);
                }
            }
        }
    }
}
