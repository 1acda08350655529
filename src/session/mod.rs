//! Provisioning session: resolves the compute template and environment,
//! waits for the environment build, and tears everything down again.
//!
//! Each session owns its identifier slots for a single run; slots are only
//! written by the step that resolves them and cleared by teardown. Starting
//! and stopping the cluster itself is left to the caller.

use std::fmt;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::api::{ApiFuture, ResourceApi, ResourceKind};
use crate::build::{BuildTarget, BuildWaiter, DEFAULT_POLL_INTERVAL, DEFAULT_REPORT_INTERVAL};
use crate::clock::{Clock, TokioClock};
use crate::descriptor::ResourceDescriptor;
use crate::error::{DeletedResource, ProvisionError, TeardownError, TeardownFailure};
use crate::links::ConsoleLinks;
use crate::resolve::Resolver;
use crate::retry::RetryPolicy;
use crate::slot::{IdSlot, SlotError};

const COMPUTE_TEMPLATE_SLOT: &str = "compute template";
const ENVIRONMENT_SLOT: &str = "environment";
const BUILD_SLOT: &str = "build";
const CLUSTER_SLOT: &str = "cluster";

/// Resources removed by [`ProvisioningSession::teardown`], in deletion order.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum TeardownTarget {
    /// Running cluster registered through [`ProvisioningSession::record_cluster`].
    Cluster,
    /// Environment build.
    Build,
    /// Environment.
    Environment,
    /// Compute template.
    ComputeTemplate,
}

impl TeardownTarget {
    /// Deletion order: dependents before the resources they depend on.
    pub const ORDER: [Self; 4] = [
        Self::Cluster,
        Self::Build,
        Self::Environment,
        Self::ComputeTemplate,
    ];

    /// Returns a short human readable label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Cluster => CLUSTER_SLOT,
            Self::Build => BUILD_SLOT,
            Self::Environment => ENVIRONMENT_SLOT,
            Self::ComputeTemplate => COMPUTE_TEMPLATE_SLOT,
        }
    }
}

impl fmt::Display for TeardownTarget {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.label())
    }
}

/// Tunables shared by every step of a session.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SessionSettings {
    /// Project owning every resource.
    pub project_id: String,
    /// Console link formatter.
    pub links: ConsoleLinks,
    /// Retry policy for creation calls.
    pub retry: RetryPolicy,
    /// Delay between build status fetches.
    pub poll_interval: Duration,
    /// Wall-clock spacing of progress reports.
    pub report_interval: Duration,
}

impl SessionSettings {
    /// Creates settings with default cadence for `project_id`.
    #[must_use]
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into().trim().to_owned(),
            links: ConsoleLinks::default(),
            retry: RetryPolicy::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            report_interval: DEFAULT_REPORT_INTERVAL,
        }
    }

    /// Overrides the console link formatter.
    #[must_use]
    pub fn with_links(mut self, links: ConsoleLinks) -> Self {
        self.links = links;
        self
    }

    /// Overrides the creation retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Overrides the build poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Overrides the progress report interval.
    #[must_use]
    pub const fn with_report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = interval;
        self
    }
}

/// Identifiers held by a session after [`ProvisioningSession::prepare`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PreparedResources {
    /// Resolved compute template, if one was described.
    pub compute_template_id: Option<String>,
    /// Resolved environment, if one was described.
    pub environment_id: Option<String>,
    /// Successful environment build, if an environment was described.
    pub build_id: Option<String>,
}

/// Resources deleted by a successful teardown.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TeardownSummary {
    /// Deleted resources in deletion order.
    pub deleted: Vec<DeletedResource>,
}

/// One provisioning run over an environment and a compute template.
#[derive(Debug)]
pub struct ProvisioningSession<A, C = TokioClock> {
    api: A,
    clock: C,
    settings: SessionSettings,
    environment: ResourceDescriptor,
    compute_template: ResourceDescriptor,
    compute_template_id: IdSlot,
    environment_id: IdSlot,
    build_id: IdSlot,
    cluster_id: IdSlot,
}

impl<A> ProvisioningSession<A, TokioClock>
where
    A: ResourceApi,
{
    /// Creates a session driven by the real clock.
    #[must_use]
    pub fn new(
        api: A,
        settings: SessionSettings,
        environment: ResourceDescriptor,
        compute_template: ResourceDescriptor,
    ) -> Self {
        Self::with_clock(api, TokioClock, settings, environment, compute_template)
    }
}

impl<A, C> ProvisioningSession<A, C>
where
    A: ResourceApi,
    C: Clock,
{
    /// Creates a session driven by `clock`.
    #[must_use]
    pub fn with_clock(
        api: A,
        clock: C,
        settings: SessionSettings,
        environment: ResourceDescriptor,
        compute_template: ResourceDescriptor,
    ) -> Self {
        Self {
            api,
            clock,
            settings,
            environment,
            compute_template,
            compute_template_id: IdSlot::Unset,
            environment_id: IdSlot::Unset,
            build_id: IdSlot::Unset,
            cluster_id: IdSlot::Unset,
        }
    }

    /// Borrows the remote API.
    #[must_use]
    pub const fn api(&self) -> &A {
        &self.api
    }

    /// Resolved compute template identifier.
    #[must_use]
    pub fn compute_template_id(&self) -> Option<&str> {
        self.compute_template_id.get()
    }

    /// Resolved environment identifier.
    #[must_use]
    pub fn environment_id(&self) -> Option<&str> {
        self.environment_id.get()
    }

    /// Successful build identifier.
    #[must_use]
    pub fn build_id(&self) -> Option<&str> {
        self.build_id.get()
    }

    /// Registered cluster identifier.
    #[must_use]
    pub fn cluster_id(&self) -> Option<&str> {
        self.cluster_id.get()
    }

    /// Resolves the compute template, then the environment, then waits up to
    /// `timeout` for an environment build. Steps whose descriptor has no spec
    /// are skipped. The first failure aborts the remaining steps.
    ///
    /// # Errors
    ///
    /// Returns the [`ProvisionError`] of the failing step unchanged.
    pub async fn prepare(
        &mut self,
        timeout: Duration,
    ) -> Result<PreparedResources, ProvisionError<A::Error>> {
        self.create_compute_template().await?;
        self.create_environment().await?;
        self.build_environment(timeout).await?;
        Ok(self.prepared())
    }

    /// Snapshot of the identifiers resolved so far.
    #[must_use]
    pub fn prepared(&self) -> PreparedResources {
        PreparedResources {
            compute_template_id: self.compute_template_id().map(str::to_owned),
            environment_id: self.environment_id().map(str::to_owned),
            build_id: self.build_id().map(str::to_owned),
        }
    }

    /// Finds or creates the compute template.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Slot`] when the template was already
    /// resolved this run, and resolver errors otherwise.
    pub async fn create_compute_template(&mut self) -> Result<(), ProvisionError<A::Error>> {
        self.compute_template_id.ensure_unset(COMPUTE_TEMPLATE_SLOT)?;
        let Some(id) = self.resolve_descriptor(ResourceKind::ComputeTemplate).await? else {
            return Ok(());
        };
        self.compute_template_id.set(COMPUTE_TEMPLATE_SLOT, id)?;
        Ok(())
    }

    /// Finds or creates the environment.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Slot`] when the environment was already
    /// resolved this run, and resolver errors otherwise.
    pub async fn create_environment(&mut self) -> Result<(), ProvisionError<A::Error>> {
        self.environment_id.ensure_unset(ENVIRONMENT_SLOT)?;
        let Some(id) = self.resolve_descriptor(ResourceKind::Environment).await? else {
            return Ok(());
        };
        self.environment_id.set(ENVIRONMENT_SLOT, id)?;
        Ok(())
    }

    /// Waits for a successful build of the resolved environment. Does nothing
    /// when no environment was resolved.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Slot`] when a build was already recorded and
    /// build waiter errors otherwise.
    pub async fn build_environment(
        &mut self,
        timeout: Duration,
    ) -> Result<(), ProvisionError<A::Error>> {
        self.build_id.ensure_unset(BUILD_SLOT)?;
        let Some(environment_id) = self.environment_id.get() else {
            debug!("no environment resolved; skipping build wait");
            return Ok(());
        };
        let target = BuildTarget {
            environment_id,
            environment_name: self.environment.name.as_deref().unwrap_or(environment_id),
        };
        let build_id = BuildWaiter::new(&self.api, &self.clock, &self.settings.links)
            .with_poll_interval(self.settings.poll_interval)
            .with_report_interval(self.settings.report_interval)
            .wait_for_build(target, timeout)
            .await?;
        self.build_id.set(BUILD_SLOT, build_id)?;
        Ok(())
    }

    /// Records a cluster started by the caller so teardown deletes it.
    ///
    /// # Errors
    ///
    /// Returns [`SlotError`] when a cluster is already recorded.
    pub fn record_cluster(&mut self, cluster_id: impl Into<String>) -> Result<(), SlotError> {
        self.cluster_id.set(CLUSTER_SLOT, cluster_id)
    }

    /// Cluster start is handled outside this crate; this is a no-op.
    pub fn start_cluster(&self) {
        debug!("cluster start is delegated to the caller");
    }

    /// Cluster termination is handled outside this crate; this is a no-op.
    pub fn terminate_cluster(&self) {
        debug!("cluster termination is delegated to the caller");
    }

    /// Deletes every recorded resource: cluster, build, environment, then
    /// compute template. Empty slots are skipped. A failed deletion does not
    /// stop the remaining ones; its slot stays populated.
    ///
    /// # Errors
    ///
    /// Returns [`TeardownError`] listing every failed deletion.
    pub async fn teardown(&mut self) -> Result<TeardownSummary, TeardownError> {
        let mut deleted = Vec::new();
        let mut failures = Vec::new();

        for target in TeardownTarget::ORDER {
            let Some(id) = self.slot(target).get().map(str::to_owned) else {
                debug!(%target, "nothing recorded; skipping delete");
                continue;
            };
            match self.delete(target, &id).await {
                Ok(()) => {
                    info!(%target, %id, "deleted");
                    self.slot_mut(target).take();
                    deleted.push(DeletedResource { target, id });
                }
                Err(err) => {
                    warn!(%target, %id, error = %err, "delete failed; continuing teardown");
                    failures.push(TeardownFailure {
                        target,
                        id,
                        message: err.to_string(),
                    });
                }
            }
        }

        if failures.is_empty() {
            Ok(TeardownSummary { deleted })
        } else {
            Err(TeardownError { deleted, failures })
        }
    }

    async fn resolve_descriptor(
        &self,
        kind: ResourceKind,
    ) -> Result<Option<String>, ProvisionError<A::Error>> {
        let descriptor = match kind {
            ResourceKind::Environment => &self.environment,
            ResourceKind::ComputeTemplate => &self.compute_template,
        };
        let Some(spec) = descriptor.spec.as_ref() else {
            debug!(%kind, "no spec provided; skipping");
            return Ok(None);
        };
        let name = descriptor
            .name
            .as_deref()
            .ok_or(ProvisionError::MissingName { kind })?;

        let resolution = Resolver::new(
            &self.api,
            &self.clock,
            &self.settings.project_id,
            self.settings.retry,
        )
        .resolve(kind, name, spec)
        .await?;
        Ok(Some(resolution.into_id()))
    }

    fn delete<'a>(&'a self, target: TeardownTarget, id: &'a str) -> ApiFuture<'a, (), A::Error> {
        match target {
            TeardownTarget::Cluster => self.api.delete_cluster(id),
            TeardownTarget::Build => self.api.delete_environment_build(id),
            TeardownTarget::Environment => self.api.delete_environment(id),
            TeardownTarget::ComputeTemplate => self.api.delete_compute_template(id),
        }
    }

    const fn slot(&self, target: TeardownTarget) -> &IdSlot {
        match target {
            TeardownTarget::Cluster => &self.cluster_id,
            TeardownTarget::Build => &self.build_id,
            TeardownTarget::Environment => &self.environment_id,
            TeardownTarget::ComputeTemplate => &self.compute_template_id,
        }
    }

    const fn slot_mut(&mut self, target: TeardownTarget) -> &mut IdSlot {
        match target {
            TeardownTarget::Cluster => &mut self.cluster_id,
            TeardownTarget::Build => &mut self.build_id,
            TeardownTarget::Environment => &mut self.environment_id,
            TeardownTarget::ComputeTemplate => &mut self.compute_template_id,
        }
    }
}
