//! Idempotent find-or-create of named resources.
//!
//! A resource is looked up by paging through the service's exact-name search
//! and keeping only results whose name matches exactly, since the service may
//! return prefix or fuzzy matches. When nothing matches, the resource is
//! created under the retry policy.

use std::future::Future;

use serde_json::Value;
use tracing::info;

use crate::api::{ApiFuture, CreateRequest, Page, ResourceApi, ResourceKind, ResourceSummary, SearchQuery};
use crate::clock::Clock;
use crate::error::ProvisionError;
use crate::retry::RetryPolicy;

/// Page size requested when searching environments.
pub const ENVIRONMENT_PAGE_SIZE: u32 = 50;

/// Pages through a listing until `predicate` accepts an item or the listing
/// ends.
///
/// `fetch` receives the continuation token of the previous page (`None` for
/// the first one). The walk stops when a page has no token or an empty one.
///
/// # Errors
///
/// Returns the first error produced by `fetch`.
pub async fn find_paginated<T, E, F, Fut, P>(mut fetch: F, mut predicate: P) -> Result<Option<T>, E>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<T>, E>>,
    P: FnMut(&T) -> bool,
{
    let mut token = None;
    loop {
        let page = fetch(token.take()).await?;
        let next = page.next_token().map(str::to_owned);
        if let Some(found) = page.items.into_iter().find(|item| predicate(item)) {
            return Ok(Some(found));
        }
        match next {
            Some(next_token) => token = Some(next_token),
            None => return Ok(None),
        }
    }
}

/// How a resource identifier was obtained.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Resolution {
    /// A resource with the exact name already existed.
    Found(String),
    /// The resource was created during this call.
    Created(String),
}

impl Resolution {
    /// Borrows the resolved identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Found(id) | Self::Created(id) => id,
        }
    }

    /// Consumes the resolution, returning the identifier.
    #[must_use]
    pub fn into_id(self) -> String {
        match self {
            Self::Found(id) | Self::Created(id) => id,
        }
    }
}

/// Finds or creates environments and compute templates within a project.
#[derive(Debug)]
pub struct Resolver<'a, A: ?Sized, C: ?Sized> {
    api: &'a A,
    clock: &'a C,
    project_id: &'a str,
    retry: RetryPolicy,
}

impl<'a, A, C> Resolver<'a, A, C>
where
    A: ResourceApi + ?Sized,
    C: Clock + ?Sized,
{
    /// Creates a resolver scoped to `project_id`.
    #[must_use]
    pub const fn new(api: &'a A, clock: &'a C, project_id: &'a str, retry: RetryPolicy) -> Self {
        Self {
            api,
            clock,
            project_id,
            retry,
        }
    }

    /// Returns the identifier of the `kind` resource named `desired_name`,
    /// creating it from `spec` when no exact match exists.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::MissingName`] for a blank name,
    /// [`ProvisionError::Api`] when a search call fails, and
    /// [`ProvisionError::Create`] when every creation attempt fails.
    pub async fn resolve(
        &self,
        kind: ResourceKind,
        desired_name: &str,
        spec: &Value,
    ) -> Result<Resolution, ProvisionError<A::Error>> {
        if desired_name.trim().is_empty() {
            return Err(ProvisionError::MissingName { kind });
        }

        info!(
            %kind,
            name = desired_name,
            "looking up existing resources with this name"
        );
        if let Some(existing) = self.find_existing(kind, desired_name).await? {
            info!(%kind, name = desired_name, id = %existing.id, "resource already exists");
            return Ok(Resolution::Found(existing.id));
        }

        info!(%kind, name = desired_name, "resource not found; creating it");
        let request = CreateRequest {
            name: desired_name.to_owned(),
            project_id: self.project_id.to_owned(),
            config: spec.clone(),
        };
        let id = self
            .retry
            .run(self.clock, kind.label(), || self.create(kind, &request))
            .await
            .map_err(|source| ProvisionError::Create {
                kind,
                name: desired_name.to_owned(),
                source,
            })?;
        info!(%kind, name = desired_name, %id, "resource created");
        Ok(Resolution::Created(id))
    }

    async fn find_existing(
        &self,
        kind: ResourceKind,
        desired_name: &str,
    ) -> Result<Option<ResourceSummary>, ProvisionError<A::Error>> {
        find_paginated(
            |page_token| {
                let query = self.query(kind, desired_name, page_token);
                async move { self.search(kind, &query).await }
            },
            |summary: &ResourceSummary| summary.name == desired_name,
        )
        .await
        .map_err(ProvisionError::Api)
    }

    fn query(&self, kind: ResourceKind, name: &str, page_token: Option<String>) -> SearchQuery {
        let (include_anonymous, page_size) = match kind {
            ResourceKind::Environment => (false, Some(ENVIRONMENT_PAGE_SIZE)),
            ResourceKind::ComputeTemplate => (true, None),
        };
        SearchQuery {
            project_id: self.project_id.to_owned(),
            name: name.to_owned(),
            include_anonymous,
            page_size,
            page_token,
        }
    }

    fn search<'q>(
        &'q self,
        kind: ResourceKind,
        query: &'q SearchQuery,
    ) -> ApiFuture<'q, Page<ResourceSummary>, A::Error> {
        match kind {
            ResourceKind::Environment => self.api.search_environments(query),
            ResourceKind::ComputeTemplate => self.api.search_compute_templates(query),
        }
    }

    fn create<'q>(
        &'q self,
        kind: ResourceKind,
        request: &'q CreateRequest,
    ) -> ApiFuture<'q, String, A::Error> {
        match kind {
            ResourceKind::Environment => self.api.create_environment(request),
            ResourceKind::ComputeTemplate => self.api.create_compute_template(request),
        }
    }
}

#[cfg(test)]
mod tests;
