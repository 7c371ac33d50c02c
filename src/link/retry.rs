//! Retry governor — classifies failures and retries transient ones.
//!
//! ```text
//!  attempt 1 ──fail(transient)──▶ sleep base×1 ──▶ attempt 2 ──fail──▶ sleep base×2 ──▶ …
//!      │                                               │
//!      └──fail(permanent)──▶ surface immediately       └──ok──▶ resolve
//! ```
//!
//! Each attempt races a hard wall-clock deadline; losing the race counts as
//! a transient [`Error::Timeout`].

use core::future::Future;
use core::time::Duration;

use async_io_mini::Timer;
use futures_lite::future;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Attempt budget, backoff base and per-attempt deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u8,
    /// Backoff unit; the pause after attempt `n` is `base_delay_ms × n`.
    pub base_delay_ms: u32,
    /// Hard deadline for a single attempt.
    pub attempt_timeout_ms: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 150,
            attempt_timeout_ms: 6500,
        }
    }
}

impl RetryPolicy {
    /// One attempt, same deadline. Used for probes and Phase 0.
    pub const fn single_shot(attempt_timeout_ms: u32) -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 0,
            attempt_timeout_ms,
        }
    }

    /// Pause inserted after failed attempt number `attempt` (1-based).
    pub fn backoff_after(&self, attempt: u8) -> Duration {
        Duration::from_millis(u64::from(self.base_delay_ms) * u64::from(attempt))
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.attempt_timeout_ms))
    }
}

/// Race `fut` against `limit`; the loser is dropped.
pub async fn with_deadline<T, F>(limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    future::or(fut, async {
        Timer::after(limit).await;
        Err(Error::Timeout)
    })
    .await
}

/// Run `op` until it succeeds, fails permanently, or the budget is spent.
///
/// `op` receives the 1-based attempt number. The last error is surfaced
/// when every attempt fails transiently.
pub async fn run_with_retry<T, F, Fut>(label: &str, policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut(u8) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1u8;
    loop {
        match with_deadline(policy.attempt_timeout(), op(attempt)).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("retry: {label} succeeded on attempt {attempt}/{attempts}");
                }
                return Ok(value);
            }
            Err(e) if !e.is_transient() => {
                debug!("retry: {label} failed permanently: {e}");
                return Err(e);
            }
            Err(e) if attempt >= attempts => {
                warn!("retry: {label} exhausted {attempts} attempts: {e}");
                return Err(e);
            }
            Err(e) => {
                let pause = policy.backoff_after(attempt);
                debug!(
                    "retry: {label} attempt {attempt}/{attempts} failed ({e}), backing off {}ms",
                    pause.as_millis()
                );
                Timer::after(pause).await;
                attempt += 1;
            }
        }
    }
}
