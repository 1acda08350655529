//! Core library for the `kiln` provisioning tool.
//!
//! The crate reconciles a compute template, an environment and its build
//! against a hosted control plane: lookups are idempotent by exact name,
//! creations retry once, and builds are awaited against a monotonic deadline.
//! [`ProvisioningSession`] drives the whole run and tears it down again in
//! reverse dependency order.

pub mod api;
pub mod build;
pub mod clock;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod http;
pub mod links;
pub mod resolve;
pub mod retry;
pub mod session;
pub mod slot;
pub mod test_support;

pub use api::{
    ApiFuture, Build, BuildSnapshot, BuildStatus, CreateRequest, Page, ResourceApi, ResourceKind,
    ResourceSummary, SearchQuery,
};
pub use build::{BuildTarget, BuildWaiter, DEFAULT_BUILD_TIMEOUT, Discovery, MAX_BUILD_TIMEOUT};
pub use clock::{Clock, TokioClock};
pub use config::{ConfigError, KilnConfig};
pub use descriptor::{DescriptorError, ResourceDescriptor};
pub use error::{DeletedResource, ProvisionError, TeardownError, TeardownFailure};
pub use http::{HttpApiError, HttpResourceApi};
pub use links::ConsoleLinks;
pub use resolve::{Resolution, Resolver};
pub use retry::RetryPolicy;
pub use session::{
    PreparedResources, ProvisioningSession, SessionSettings, TeardownSummary, TeardownTarget,
};
pub use slot::{IdSlot, SlotError};
