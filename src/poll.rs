//! Retry-until-success polling for advisory reads.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::CancelToken;
use crate::error::{EngineResult, GatewayError, GatewayResult};

/// Fixed-delay retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay between attempts, in milliseconds.
    pub delay_ms: u64,
    /// Give up after this many attempts. `None` retries until cancelled.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay_ms: 5_000,
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    /// Unbounded policy with the given delay.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn with_delay(delay: Duration) -> Self {
        Self {
            delay_ms: delay.as_millis() as u64,
            max_attempts: None,
        }
    }

    #[must_use]
    pub const fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Runs `query` until it succeeds.
///
/// Every failure is treated the same way. Cancellation is checked after each
/// failure and interrupts a pending delay immediately.
///
/// # Errors
/// [`GatewayError::Cancelled`] once `cancel` fires, or
/// [`GatewayError::Exhausted`] when a bounded policy runs out.
pub fn poll_until_success<T, F>(policy: &RetryPolicy, cancel: &CancelToken, mut query: F) -> GatewayResult<T>
where
    F: FnMut() -> EngineResult<T>,
{
    let mut attempts: u32 = 0;
    loop {
        attempts = attempts.saturating_add(1);
        let err = match query() {
            Ok(v) => return Ok(v),
            Err(e) => e,
        };

        if cancel.is_cancelled() {
            return Err(GatewayError::Cancelled);
        }
        if policy.max_attempts.is_some_and(|max| attempts >= max) {
            return Err(GatewayError::Exhausted { attempts, last: err });
        }

        debug!(attempt = attempts, error = %err, delay_ms = policy.delay_ms, "query failed, retrying");
        if cancel.wait_timeout(policy.delay()) {
            return Err(GatewayError::Cancelled);
        }
    }
}
