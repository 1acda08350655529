//! Retry policy applied to resource creation calls.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::clock::Clock;

/// Delay before the single creation retry.
pub const DEFAULT_CREATE_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Bounded retry with a fixed delay between attempts.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    /// Creates a policy allowing `max_attempts` calls (at least one) spaced
    /// by `delay`.
    #[must_use]
    pub const fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: if max_attempts == 0 { 1 } else { max_attempts },
            delay,
        }
    }

    /// One initial attempt plus one retry after `delay`.
    #[must_use]
    pub const fn single_retry(delay: Duration) -> Self {
        Self::fixed(2, delay)
    }

    /// Never retries.
    #[must_use]
    pub const fn no_retry() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    /// Total number of attempts allowed.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay to wait before the 1-based `attempt`, or `None` when that attempt
    /// must not happen. The first attempt never waits.
    #[must_use]
    pub const fn delay_before(&self, attempt: u32) -> Option<Duration> {
        if attempt <= 1 || attempt > self.max_attempts {
            None
        } else {
            Some(self.delay)
        }
    }

    /// Runs `operation` until it succeeds or the attempts are exhausted,
    /// returning the last error in the latter case.
    ///
    /// # Errors
    ///
    /// Returns the error of the final attempt.
    pub async fn run<C, T, E, F, Fut>(&self, clock: &C, label: &str, mut operation: F) -> Result<T, E>
    where
        C: Clock + ?Sized,
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            let next = attempt + 1;
            let Some(delay) = self.delay_before(next) else {
                return Err(err);
            };
            warn!(
                operation = label,
                attempt,
                error = %err,
                delay_secs = delay.as_secs(),
                "call failed; sleeping before trying again"
            );
            clock.sleep(delay).await;
            attempt = next;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::single_retry(DEFAULT_CREATE_RETRY_DELAY)
    }
}
