//! Test doubles shared across unit and integration tests.
//!
//! [`ScriptedApi`] answers remote calls from pre-seeded scripts and records
//! every call; [`ManualClock`] turns sleeps into instant virtual time
//! advances so retry and polling scenarios run without real delays.

use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, TimeZone, Utc};
use thiserror::Error;

use crate::api::{
    ApiFuture, Build, BuildSnapshot, BuildStatus, CreateRequest, Page, ResourceApi,
    ResourceSummary, SearchQuery,
};
use crate::clock::{Clock, SleepFuture};
use crate::session::TeardownTarget;

/// Identifier returned by unscripted environment creations.
pub const CREATED_ENVIRONMENT_ID: &str = "env-created";

/// Identifier returned by unscripted compute template creations.
pub const CREATED_COMPUTE_TEMPLATE_ID: &str = "cpt-created";

/// Error produced by [`ScriptedApi`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("scripted failure: {0}")]
pub struct ScriptedApiError(pub String);

/// Remote call recorded by [`ScriptedApi`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ApiCall {
    /// `search_environments`.
    SearchEnvironments(SearchQuery),
    /// `create_environment` with the requested name.
    CreateEnvironment(String),
    /// `list_environment_builds` for an environment id.
    ListBuilds(String),
    /// `get_build` for a build id.
    GetBuild(String),
    /// `search_compute_templates`.
    SearchComputeTemplates(SearchQuery),
    /// `create_compute_template` with the requested name.
    CreateComputeTemplate(String),
    /// Deletion of a recorded resource.
    Delete(TeardownTarget, String),
}

#[derive(Debug, Default)]
struct Script {
    environment_pages: VecDeque<Page<ResourceSummary>>,
    compute_pages: VecDeque<Page<ResourceSummary>>,
    environment_creates: VecDeque<Result<String, ScriptedApiError>>,
    compute_creates: VecDeque<Result<String, ScriptedApiError>>,
    builds: Vec<Build>,
    build_statuses: VecDeque<BuildStatus>,
    failing_deletes: BTreeSet<TeardownTarget>,
    calls: Vec<ApiCall>,
}

/// Scripted [`ResourceApi`] implementation.
///
/// Searches pop pages in FIFO order and return an empty final page once the
/// script runs dry. Creations pop scripted results and succeed with a fixed
/// identifier once the script runs dry. Build status scripts repeat their
/// last entry forever.
#[derive(Clone, Debug, Default)]
pub struct ScriptedApi {
    script: Arc<Mutex<Script>>,
}

impl ScriptedApi {
    /// Creates an API with empty scripts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues an environment search page.
    pub fn push_environment_page(&self, page: Page<ResourceSummary>) {
        self.lock().environment_pages.push_back(page);
    }

    /// Queues a compute template search page.
    pub fn push_compute_page(&self, page: Page<ResourceSummary>) {
        self.lock().compute_pages.push_back(page);
    }

    /// Queues the outcome of the next environment creation.
    pub fn push_environment_create(&self, outcome: Result<&str, &str>) {
        self.lock()
            .environment_creates
            .push_back(scripted_outcome(outcome));
    }

    /// Queues the outcome of the next compute template creation.
    pub fn push_compute_create(&self, outcome: Result<&str, &str>) {
        self.lock().compute_creates.push_back(scripted_outcome(outcome));
    }

    /// Sets the builds returned when listing environment builds.
    pub fn set_builds(&self, builds: Vec<Build>) {
        self.lock().builds = builds;
    }

    /// Queues statuses returned by successive `get_build` calls.
    pub fn push_build_statuses(&self, statuses: impl IntoIterator<Item = BuildStatus>) {
        self.lock().build_statuses.extend(statuses);
    }

    /// Makes deletions of `target` fail.
    pub fn fail_delete(&self, target: TeardownTarget) {
        self.lock().failing_deletes.insert(target);
    }

    /// Returns every call recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<ApiCall> {
        self.lock().calls.clone()
    }

    /// Counts recorded calls matching `predicate`.
    #[must_use]
    pub fn count_calls(&self, predicate: impl Fn(&ApiCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|call| predicate(call)).count()
    }

    fn record(&self, call: ApiCall) -> MutexGuard<'_, Script> {
        let mut script = self.lock();
        script.calls.push(call);
        script
    }

    fn delete(&self, target: TeardownTarget, id: &str) -> Result<(), ScriptedApiError> {
        let script = self.record(ApiCall::Delete(target, id.to_owned()));
        if script.failing_deletes.contains(&target) {
            return Err(ScriptedApiError(format!("cannot delete {target} {id}")));
        }
        Ok(())
    }
}

fn scripted_outcome(outcome: Result<&str, &str>) -> Result<String, ScriptedApiError> {
    outcome
        .map(str::to_owned)
        .map_err(|message| ScriptedApiError(message.to_owned()))
}

impl ResourceApi for ScriptedApi {
    type Error = ScriptedApiError;

    fn search_environments<'a>(
        &'a self,
        query: &'a SearchQuery,
    ) -> ApiFuture<'a, Page<ResourceSummary>, Self::Error> {
        let page = self
            .record(ApiCall::SearchEnvironments(query.clone()))
            .environment_pages
            .pop_front()
            .unwrap_or_else(|| Page::last(Vec::new()));
        Box::pin(async move { Ok(page) })
    }

    fn create_environment<'a>(
        &'a self,
        request: &'a CreateRequest,
    ) -> ApiFuture<'a, String, Self::Error> {
        let outcome = self
            .record(ApiCall::CreateEnvironment(request.name.clone()))
            .environment_creates
            .pop_front()
            .unwrap_or_else(|| Ok(CREATED_ENVIRONMENT_ID.to_owned()));
        Box::pin(async move { outcome })
    }

    fn list_environment_builds<'a>(
        &'a self,
        environment_id: &'a str,
    ) -> ApiFuture<'a, Vec<Build>, Self::Error> {
        let builds = self
            .record(ApiCall::ListBuilds(environment_id.to_owned()))
            .builds
            .clone();
        Box::pin(async move { Ok(builds) })
    }

    fn get_build<'a>(&'a self, build_id: &'a str) -> ApiFuture<'a, BuildSnapshot, Self::Error> {
        let mut script = self.record(ApiCall::GetBuild(build_id.to_owned()));
        let status = if script.build_statuses.len() > 1 {
            script.build_statuses.pop_front()
        } else {
            script.build_statuses.front().cloned()
        };
        drop(script);
        let outcome = status
            .map(|status| BuildSnapshot {
                id: build_id.to_owned(),
                status,
            })
            .ok_or_else(|| ScriptedApiError(format!("no status scripted for {build_id}")));
        Box::pin(async move { outcome })
    }

    fn search_compute_templates<'a>(
        &'a self,
        query: &'a SearchQuery,
    ) -> ApiFuture<'a, Page<ResourceSummary>, Self::Error> {
        let page = self
            .record(ApiCall::SearchComputeTemplates(query.clone()))
            .compute_pages
            .pop_front()
            .unwrap_or_else(|| Page::last(Vec::new()));
        Box::pin(async move { Ok(page) })
    }

    fn create_compute_template<'a>(
        &'a self,
        request: &'a CreateRequest,
    ) -> ApiFuture<'a, String, Self::Error> {
        let outcome = self
            .record(ApiCall::CreateComputeTemplate(request.name.clone()))
            .compute_creates
            .pop_front()
            .unwrap_or_else(|| Ok(CREATED_COMPUTE_TEMPLATE_ID.to_owned()));
        Box::pin(async move { outcome })
    }

    fn delete_cluster<'a>(&'a self, cluster_id: &'a str) -> ApiFuture<'a, (), Self::Error> {
        let outcome = self.delete(TeardownTarget::Cluster, cluster_id);
        Box::pin(async move { outcome })
    }

    fn delete_environment_build<'a>(
        &'a self,
        build_id: &'a str,
    ) -> ApiFuture<'a, (), Self::Error> {
        let outcome = self.delete(TeardownTarget::Build, build_id);
        Box::pin(async move { outcome })
    }

    fn delete_environment<'a>(
        &'a self,
        environment_id: &'a str,
    ) -> ApiFuture<'a, (), Self::Error> {
        let outcome = self.delete(TeardownTarget::Environment, environment_id);
        Box::pin(async move { outcome })
    }

    fn delete_compute_template<'a>(
        &'a self,
        compute_template_id: &'a str,
    ) -> ApiFuture<'a, (), Self::Error> {
        let outcome = self.delete(TeardownTarget::ComputeTemplate, compute_template_id);
        Box::pin(async move { outcome })
    }
}

/// Builds a [`Build`] created `offset_secs` after a fixed reference time.
#[must_use]
pub fn build_at(id: &str, status: BuildStatus, offset_secs: i64) -> Build {
    let reference: DateTime<Utc> = Utc
        .timestamp_opt(1_700_000_000, 0)
        .single()
        .unwrap_or_default();
    Build {
        id: id.to_owned(),
        status,
        created_at: reference + chrono::Duration::seconds(offset_secs),
    }
}

/// Step change applied to the wall clock only.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WallJump {
    /// Moves the wall clock forward.
    Forward(Duration),
    /// Moves the wall clock backward.
    Backward(Duration),
}

#[derive(Debug)]
struct ManualState {
    origin: Instant,
    elapsed: Duration,
    wall_ahead: Duration,
    wall_behind: Duration,
    sleeps: Vec<Duration>,
    scheduled_jumps: Vec<(usize, WallJump)>,
}

impl ManualState {
    fn apply(&mut self, jump: WallJump) {
        match jump {
            WallJump::Forward(duration) => self.wall_ahead += duration,
            WallJump::Backward(duration) => self.wall_behind += duration,
        }
    }
}

/// Virtual clock whose sleeps complete immediately and advance time.
#[derive(Clone, Debug)]
pub struct ManualClock {
    state: Arc<Mutex<ManualState>>,
}

impl ManualClock {
    /// Wall-clock reading at virtual time zero.
    pub const WALL_ORIGIN_SECS: u64 = 1_700_000_000;

    /// Creates a clock at virtual time zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ManualState {
                origin: Instant::now(),
                elapsed: Duration::ZERO,
                wall_ahead: Duration::ZERO,
                wall_behind: Duration::ZERO,
                sleeps: Vec::new(),
                scheduled_jumps: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Advances both clocks without recording a sleep.
    pub fn advance(&self, duration: Duration) {
        self.lock().elapsed += duration;
    }

    /// Applies `jump` to the wall clock once the `after_sleeps`-th sleep
    /// completes.
    pub fn schedule_wall_jump(&self, after_sleeps: usize, jump: WallJump) {
        self.lock().scheduled_jumps.push((after_sleeps, jump));
    }

    /// Virtual time elapsed on the monotonic clock.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.lock().elapsed
    }

    /// Every sleep requested so far, in order.
    #[must_use]
    pub fn sleeps(&self) -> Vec<Duration> {
        self.lock().sleeps.clone()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn monotonic(&self) -> Instant {
        let state = self.lock();
        state.origin + state.elapsed
    }

    fn wall(&self) -> SystemTime {
        let state = self.lock();
        let ahead = UNIX_EPOCH
            + Duration::from_secs(Self::WALL_ORIGIN_SECS)
            + state.elapsed
            + state.wall_ahead;
        ahead.checked_sub(state.wall_behind).unwrap_or(UNIX_EPOCH)
    }

    fn sleep(&self, duration: Duration) -> SleepFuture<'_> {
        let mut state = self.lock();
        state.sleeps.push(duration);
        state.elapsed += duration;
        let completed = state.sleeps.len();
        let due: Vec<WallJump> = state
            .scheduled_jumps
            .iter()
            .filter(|(after, _)| *after == completed)
            .map(|(_, jump)| *jump)
            .collect();
        for jump in due {
            state.apply(jump);
        }
        drop(state);
        Box::pin(std::future::ready(()))
    }
}
