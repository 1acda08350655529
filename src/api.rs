//! Abstraction over the remote resource-management service.
//!
//! The service manages two named resource kinds (environments and compute
//! templates) plus the asynchronous builds that materialise environments.
//! Everything the provisioning core needs from it is expressed by
//! [`ResourceApi`]; the HTTP client in [`crate::http`] is one implementation
//! and [`crate::test_support::ScriptedApi`] is another.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

/// Future returned by remote API operations.
pub type ApiFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Named resource kinds resolved by the provisioning core.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ResourceKind {
    /// Buildable runtime image definition.
    Environment,
    /// Hardware and node layout for a cluster.
    ComputeTemplate,
}

impl ResourceKind {
    /// Returns a short human readable label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Environment => "environment",
            Self::ComputeTemplate => "compute template",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.label())
    }
}

/// Exact-name search against one of the resource collections.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SearchQuery {
    /// Project scoping the search.
    pub project_id: String,
    /// Name passed to the service's `equals` filter.
    pub name: String,
    /// Includes caller-private resources. Only meaningful for compute
    /// templates.
    pub include_anonymous: bool,
    /// Page size hint; `None` leaves it to the service.
    pub page_size: Option<u32>,
    /// Continuation token returned by the previous page.
    pub page_token: Option<String>,
}

/// Identifier and name of a resource returned by a search.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct ResourceSummary {
    /// Service assigned identifier.
    pub id: String,
    /// Resource name. Searches may return prefix or fuzzy matches.
    pub name: String,
}

impl ResourceSummary {
    /// Creates a summary.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// One page of a paginated listing.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Page<T> {
    /// Items on this page.
    pub items: Vec<T>,
    /// Token for the next page; absent or empty once the listing is done.
    pub next_page_token: Option<String>,
}

impl<T> Page<T> {
    /// Builds a page that ends the listing.
    #[must_use]
    pub const fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_page_token: None,
        }
    }

    /// Builds a page followed by another one.
    #[must_use]
    pub fn with_next(items: Vec<T>, token: impl Into<String>) -> Self {
        Self {
            items,
            next_page_token: Some(token.into()),
        }
    }

    /// Returns the continuation token, treating an empty token as absent.
    #[must_use]
    pub fn next_token(&self) -> Option<&str> {
        self.next_page_token
            .as_deref()
            .filter(|token| !token.is_empty())
    }
}

/// Payload for creating either resource kind.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CreateRequest {
    /// Desired resource name.
    pub name: String,
    /// Owning project.
    pub project_id: String,
    /// Opaque resource configuration forwarded verbatim.
    pub config: Value,
}

/// Status reported for an environment build.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq)]
#[serde(from = "String")]
pub enum BuildStatus {
    /// Queued, not yet started.
    Pending,
    /// Running.
    InProgress,
    /// Finished; the environment can be used.
    Succeeded,
    /// Finished unsuccessfully.
    Failed,
    /// Any status this crate does not recognise.
    Unknown(String),
}

impl BuildStatus {
    /// Returns the wire representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Unknown(raw) => raw,
        }
    }

    /// Returns `true` while the build may still change status.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::InProgress)
    }
}

impl From<&str> for BuildStatus {
    fn from(value: &str) -> Self {
        match value {
            "pending" => Self::Pending,
            "in_progress" => Self::InProgress,
            "succeeded" => Self::Succeeded,
            "failed" => Self::Failed,
            other => Self::Unknown(other.to_owned()),
        }
    }
}

impl From<String> for BuildStatus {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Build entry returned when listing an environment's builds.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct Build {
    /// Build identifier.
    pub id: String,
    /// Status at listing time.
    pub status: BuildStatus,
    /// Creation timestamp used to order builds.
    pub created_at: DateTime<Utc>,
}

/// Current state of a single build.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct BuildSnapshot {
    /// Build identifier.
    pub id: String,
    /// Latest status.
    pub status: BuildStatus,
}

/// Operations the provisioning core consumes from the remote service.
///
/// Implementations report transport and service failures through
/// [`ResourceApi::Error`]; the core decides which of them are retried.
pub trait ResourceApi {
    /// Implementation specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Searches environments by exact name.
    fn search_environments<'a>(
        &'a self,
        query: &'a SearchQuery,
    ) -> ApiFuture<'a, Page<ResourceSummary>, Self::Error>;

    /// Creates an environment and returns its identifier.
    fn create_environment<'a>(
        &'a self,
        request: &'a CreateRequest,
    ) -> ApiFuture<'a, String, Self::Error>;

    /// Lists every build of an environment.
    fn list_environment_builds<'a>(
        &'a self,
        environment_id: &'a str,
    ) -> ApiFuture<'a, Vec<Build>, Self::Error>;

    /// Fetches the current state of a build.
    fn get_build<'a>(&'a self, build_id: &'a str) -> ApiFuture<'a, BuildSnapshot, Self::Error>;

    /// Searches compute templates by exact name.
    fn search_compute_templates<'a>(
        &'a self,
        query: &'a SearchQuery,
    ) -> ApiFuture<'a, Page<ResourceSummary>, Self::Error>;

    /// Creates a compute template and returns its identifier.
    fn create_compute_template<'a>(
        &'a self,
        request: &'a CreateRequest,
    ) -> ApiFuture<'a, String, Self::Error>;

    /// Deletes a running cluster.
    fn delete_cluster<'a>(&'a self, cluster_id: &'a str) -> ApiFuture<'a, (), Self::Error>;

    /// Deletes an environment build.
    fn delete_environment_build<'a>(&'a self, build_id: &'a str)
    -> ApiFuture<'a, (), Self::Error>;

    /// Deletes an environment.
    fn delete_environment<'a>(&'a self, environment_id: &'a str)
    -> ApiFuture<'a, (), Self::Error>;

    /// Deletes a compute template.
    fn delete_compute_template<'a>(
        &'a self,
        compute_template_id: &'a str,
    ) -> ApiFuture<'a, (), Self::Error>;
}
