//! Errors raised while preparing and tearing down provisioned resources.

use std::fmt::Write as _;

use thiserror::Error;

use crate::api::ResourceKind;
use crate::session::TeardownTarget;
use crate::slot::SlotError;

/// Errors surfaced by [`crate::ProvisioningSession::prepare`] and its steps.
#[derive(Debug, Error)]
pub enum ProvisionError<ApiError>
where
    ApiError: std::error::Error + 'static,
{
    /// Raised when a step would overwrite an identifier recorded earlier in
    /// the same run.
    #[error(transparent)]
    Slot(#[from] SlotError),
    /// Raised when a descriptor carries a spec but no usable name.
    #[error("{kind} has a spec but no name")]
    MissingName {
        /// Resource kind of the descriptor.
        kind: ResourceKind,
    },
    /// Raised when a search, listing, or status call fails.
    #[error("remote call failed: {0}")]
    Api(#[source] ApiError),
    /// Raised when creation still fails after the retry policy is exhausted.
    #[error("failed to create {kind} '{name}': {source}")]
    Create {
        /// Resource kind being created.
        kind: ResourceKind,
        /// Requested name.
        name: String,
        /// Error from the final attempt.
        #[source]
        source: ApiError,
    },
    /// Raised when the environment has no builds at all.
    #[error("no build found for environment '{environment}'")]
    NoBuildFound {
        /// Environment name.
        environment: String,
    },
    /// Raised when every build of the environment failed.
    #[error(
        "environment '{environment}' has no usable build; latest build {build_id} failed, see {link}"
    )]
    NoUsableBuild {
        /// Environment name.
        environment: String,
        /// Newest failed build.
        build_id: String,
        /// Console link for the build.
        link: String,
    },
    /// Raised when the awaited build finishes with `failed`.
    #[error("build {build_id} failed; see {link} for details")]
    BuildFailed {
        /// Build identifier.
        build_id: String,
        /// Console link for the build.
        link: String,
    },
    /// Raised when the awaited build reports a status outside the known set.
    #[error("unknown status '{status}' for build {build_id}; see {link} for details")]
    UnknownBuildStatus {
        /// Build identifier.
        build_id: String,
        /// Raw status reported by the service.
        status: String,
        /// Console link for the build.
        link: String,
    },
    /// Raised when the build is still running at the deadline.
    #[error("timed out waiting for build of environment '{environment}' ({environment_id})")]
    BuildTimeout {
        /// Environment name.
        environment: String,
        /// Environment identifier.
        environment_id: String,
    },
}

impl<ApiError> ProvisionError<ApiError>
where
    ApiError: std::error::Error + 'static,
{
    /// Returns `true` for errors meaning no usable build could be obtained.
    #[must_use]
    pub const fn is_build_failure(&self) -> bool {
        matches!(
            self,
            Self::NoBuildFound { .. }
                | Self::NoUsableBuild { .. }
                | Self::BuildFailed { .. }
                | Self::UnknownBuildStatus { .. }
        )
    }

    /// Returns `true` when the build deadline elapsed.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::BuildTimeout { .. })
    }
}

/// A resource that could not be deleted during teardown.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TeardownFailure {
    /// Resource kind.
    pub target: TeardownTarget,
    /// Identifier that was being deleted.
    pub id: String,
    /// Error reported by the service.
    pub message: String,
}

/// A resource deleted during teardown.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeletedResource {
    /// Resource kind.
    pub target: TeardownTarget,
    /// Identifier that was deleted.
    pub id: String,
}

/// Raised when at least one teardown deletion failed. Every recorded
/// resource was still attempted.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("teardown incomplete: {}", describe_failures(.failures))]
pub struct TeardownError {
    /// Resources deleted before and after the failures.
    pub deleted: Vec<DeletedResource>,
    /// Deletions that failed, in attempt order.
    pub failures: Vec<TeardownFailure>,
}

fn describe_failures(failures: &[TeardownFailure]) -> String {
    let mut rendered = String::new();
    for (index, failure) in failures.iter().enumerate() {
        if index > 0 {
            rendered.push_str("; ");
        }
        write!(
            rendered,
            "{} {}: {}",
            failure.target, failure.id, failure.message
        )
        .ok();
    }
    rendered
}
