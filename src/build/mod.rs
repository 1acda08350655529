//! Waiting for an environment build to reach a terminal status.
//!
//! The waiter runs as a small state machine:
//!
//! * `Discovering` lists the environment's builds oldest first. A prior
//!   successful build satisfies the request immediately; failed builds are
//!   skipped; the newest non-failed build is carried into polling.
//! * `Polling` fetches that build once per interval until it succeeds, fails,
//!   reports an unrecognised status, or the monotonic deadline passes.
//!
//! Progress is reported on the wall clock and never influences termination.

use std::time::{Duration, Instant, SystemTime};

use tracing::info;

use crate::api::{Build, BuildStatus, ResourceApi};
use crate::clock::Clock;
use crate::error::ProvisionError;
use crate::links::ConsoleLinks;

/// Delay between two status fetches.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Minimum wall-clock spacing between two progress reports.
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(30);

/// Default build deadline.
pub const DEFAULT_BUILD_TIMEOUT: Duration = Duration::from_secs(600);

/// Longest wait honoured; larger timeouts are clamped to it.
pub const MAX_BUILD_TIMEOUT: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Outcome of scanning an environment's builds.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Discovery {
    /// A build already succeeded.
    Ready(String),
    /// The newest scanned build is still running and must be awaited.
    Pending(String),
    /// Every build failed; carries the newest one.
    AllFailed(String),
    /// The environment has no builds.
    Empty,
}

/// Scans `builds` oldest to newest and classifies them.
#[must_use]
pub fn discover(mut builds: Vec<Build>) -> Discovery {
    builds.sort_by_key(|build| build.created_at);

    let mut last = None;
    for build in builds {
        match build.status {
            BuildStatus::Succeeded => return Discovery::Ready(build.id),
            BuildStatus::Failed => last = Some((build.id, true)),
            _ => last = Some((build.id, false)),
        }
    }

    match last {
        None => Discovery::Empty,
        Some((id, true)) => Discovery::AllFailed(id),
        Some((id, false)) => Discovery::Pending(id),
    }
}

/// Monotonic deadline `timeout` after `now`, with `timeout` clamped to
/// [`MAX_BUILD_TIMEOUT`]. A deadline that still cannot be represented falls
/// back to `now`, which times the wait out on its first active status.
#[must_use]
pub fn deadline_after(now: Instant, timeout: Duration) -> Instant {
    now.checked_add(timeout.min(MAX_BUILD_TIMEOUT))
        .unwrap_or(now)
}

/// Wall-clock progress cadence.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ProgressReport {
    started: SystemTime,
    next_report: SystemTime,
    interval: Duration,
}

impl ProgressReport {
    /// Starts reporting at `now`; the first report is due one interval later.
    #[must_use]
    pub fn start(now: SystemTime, interval: Duration) -> Self {
        Self {
            started: now,
            next_report: now.checked_add(interval).unwrap_or(now),
            interval,
        }
    }

    /// Returns the elapsed wall time when a report is due at `now`.
    pub fn due(&mut self, now: SystemTime) -> Option<Duration> {
        if now <= self.next_report {
            return None;
        }
        self.next_report = self
            .next_report
            .checked_add(self.interval)
            .unwrap_or(self.next_report);
        Some(now.duration_since(self.started).unwrap_or_default())
    }
}

#[derive(Debug)]
struct PollContext {
    build_id: String,
    deadline: Instant,
    progress: ProgressReport,
}

#[derive(Debug)]
enum WaitState<E>
where
    E: std::error::Error + 'static,
{
    Discovering,
    Polling(PollContext),
    Succeeded(String),
    Failed(ProvisionError<E>),
    TimedOut,
}

/// Identifies the environment whose build is awaited.
#[derive(Clone, Copy, Debug)]
pub struct BuildTarget<'a> {
    /// Environment identifier.
    pub environment_id: &'a str,
    /// Environment name used in messages.
    pub environment_name: &'a str,
}

/// Discovers and awaits environment builds.
#[derive(Debug)]
pub struct BuildWaiter<'a, A: ?Sized, C: ?Sized> {
    api: &'a A,
    clock: &'a C,
    links: &'a ConsoleLinks,
    poll_interval: Duration,
    report_interval: Duration,
}

impl<'a, A, C> BuildWaiter<'a, A, C>
where
    A: ResourceApi + ?Sized,
    C: Clock + ?Sized,
{
    /// Creates a waiter with the default poll and report intervals.
    #[must_use]
    pub const fn new(api: &'a A, clock: &'a C, links: &'a ConsoleLinks) -> Self {
        Self {
            api,
            clock,
            links,
            poll_interval: DEFAULT_POLL_INTERVAL,
            report_interval: DEFAULT_REPORT_INTERVAL,
        }
    }

    /// Overrides the delay between status fetches.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Overrides the progress report cadence.
    #[must_use]
    pub const fn with_report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = interval;
        self
    }

    /// Returns the identifier of a successful build of `target`, waiting at
    /// most `timeout` for a running one to finish.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::NoBuildFound`], [`ProvisionError::NoUsableBuild`],
    /// [`ProvisionError::BuildFailed`], or [`ProvisionError::UnknownBuildStatus`]
    /// when no usable build can be obtained, [`ProvisionError::BuildTimeout`]
    /// when the deadline passes, and [`ProvisionError::Api`] when a remote call
    /// fails.
    pub async fn wait_for_build(
        &self,
        target: BuildTarget<'_>,
        timeout: Duration,
    ) -> Result<String, ProvisionError<A::Error>> {
        let mut state = WaitState::Discovering;
        loop {
            state = match state {
                WaitState::Discovering => self.discover_state(target, timeout).await,
                WaitState::Polling(context) => self.poll_state(context).await,
                WaitState::Succeeded(build_id) => return Ok(build_id),
                WaitState::Failed(err) => return Err(err),
                WaitState::TimedOut => {
                    return Err(ProvisionError::BuildTimeout {
                        environment: target.environment_name.to_owned(),
                        environment_id: target.environment_id.to_owned(),
                    });
                }
            };
        }
    }

    async fn discover_state(
        &self,
        target: BuildTarget<'_>,
        timeout: Duration,
    ) -> WaitState<A::Error> {
        let builds = match self.api.list_environment_builds(target.environment_id).await {
            Ok(builds) => builds,
            Err(err) => return WaitState::Failed(ProvisionError::Api(err)),
        };

        match discover(builds) {
            Discovery::Ready(build_id) => {
                info!(
                    %build_id,
                    link = %self.links.build(&build_id),
                    "environment already has a successful build"
                );
                WaitState::Succeeded(build_id)
            }
            Discovery::Pending(build_id) => {
                info!(
                    %build_id,
                    link = %self.links.build(&build_id),
                    "waiting for build to finish"
                );
                WaitState::Polling(PollContext {
                    deadline: deadline_after(self.clock.monotonic(), timeout),
                    progress: ProgressReport::start(self.clock.wall(), self.report_interval),
                    build_id,
                })
            }
            Discovery::AllFailed(build_id) => {
                WaitState::Failed(ProvisionError::NoUsableBuild {
                    environment: target.environment_name.to_owned(),
                    link: self.links.build(&build_id),
                    build_id,
                })
            }
            Discovery::Empty => WaitState::Failed(ProvisionError::NoBuildFound {
                environment: target.environment_name.to_owned(),
            }),
        }
    }

    async fn poll_state(&self, mut context: PollContext) -> WaitState<A::Error> {
        if let Some(elapsed) = context.progress.due(self.clock.wall()) {
            info!(
                build_id = %context.build_id,
                elapsed_secs = elapsed.as_secs(),
                "still waiting for build to finish"
            );
        }

        let snapshot = match self.api.get_build(&context.build_id).await {
            Ok(snapshot) => snapshot,
            Err(err) => return WaitState::Failed(ProvisionError::Api(err)),
        };

        match snapshot.status {
            BuildStatus::Succeeded => {
                info!(build_id = %context.build_id, "build succeeded");
                WaitState::Succeeded(context.build_id)
            }
            BuildStatus::Failed => WaitState::Failed(ProvisionError::BuildFailed {
                link: self.links.build(&context.build_id),
                build_id: context.build_id,
            }),
            BuildStatus::Unknown(status) => {
                WaitState::Failed(ProvisionError::UnknownBuildStatus {
                    link: self.links.build(&context.build_id),
                    build_id: context.build_id,
                    status,
                })
            }
            BuildStatus::Pending | BuildStatus::InProgress => {
                if self.clock.monotonic() > context.deadline {
                    return WaitState::TimedOut;
                }
                self.clock.sleep(self.poll_interval).await;
                WaitState::Polling(context)
            }
        }
    }
}
