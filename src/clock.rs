//! Time source used by retry delays and build polling.
//!
//! Two readings are exposed on purpose: deadlines compare against the
//! monotonic clock while progress reports use wall-clock time. The two are
//! allowed to drift apart.

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant, SystemTime};

/// Future returned by [`Clock::sleep`].
pub type SleepFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Injectable clock and sleeper.
pub trait Clock: Send + Sync {
    /// Current monotonic instant, used for deadlines.
    fn monotonic(&self) -> Instant;

    /// Current wall-clock time, used for human readable progress.
    fn wall(&self) -> SystemTime;

    /// Suspends the caller for `duration`.
    fn sleep(&self, duration: Duration) -> SleepFuture<'_>;
}

/// Real clock backed by the OS and the tokio timer.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn monotonic(&self) -> Instant {
        Instant::now()
    }

    fn wall(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) -> SleepFuture<'_> {
        Box::pin(tokio::time::sleep(duration))
    }
}
