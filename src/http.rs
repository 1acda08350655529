//! HTTP implementation of [`ResourceApi`] for the hosted control plane.

use std::collections::HashSet;
use std::time::Duration;

use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::api::{
    ApiFuture, Build, BuildSnapshot, CreateRequest, Page, ResourceApi, ResourceSummary,
    SearchQuery,
};
use crate::config::KilnConfig;

/// Base URL of the hosted resource-management API.
pub const DEFAULT_API_BASE_URL: &str = "https://console.anyscale.com/api/v2";

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

const ENVIRONMENTS_PATH: &str = "application_templates";
const COMPUTE_TEMPLATES_PATH: &str = "compute_templates";
const BUILDS_PATH: &str = "builds";
const CLUSTERS_PATH: &str = "sessions";

/// Errors raised by [`HttpResourceApi`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum HttpApiError {
    /// Raised when the HTTP client cannot be constructed.
    #[error("failed to build HTTP client: {message}")]
    Client {
        /// Message reported by the client builder.
        message: String,
    },
    /// Raised when the configured base URL cannot carry resource paths.
    #[error("invalid API base URL {url}: {message}")]
    InvalidUrl {
        /// Configured base URL.
        url: String,
        /// Parser message.
        message: String,
    },
    /// Raised when a request cannot be sent or its body cannot be read.
    #[error("request to {url} failed: {message}")]
    Transport {
        /// Requested URL.
        url: String,
        /// Transport error message.
        message: String,
    },
    /// Raised when the service answers with a non-success status.
    #[error("request to {url} returned HTTP {status}: {body}")]
    Status {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
        /// Response body, lossily decoded.
        body: String,
    },
    /// Raised when a success response does not match the expected shape.
    #[error("unexpected response from {url}: {message}")]
    Decode {
        /// Requested URL.
        url: String,
        /// Deserialisation error message.
        message: String,
    },
}

#[derive(Debug, Serialize)]
struct NameFilter<'a> {
    equals: &'a str,
}

#[derive(Debug, Serialize)]
struct Paging<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    paging_token: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct SearchBody<'a> {
    project_id: &'a str,
    name: NameFilter<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    include_anonymous: Option<bool>,
    paging: Paging<'a>,
}

impl<'a> From<&'a SearchQuery> for SearchBody<'a> {
    fn from(query: &'a SearchQuery) -> Self {
        Self {
            project_id: &query.project_id,
            name: NameFilter {
                equals: &query.name,
            },
            include_anonymous: query.include_anonymous.then_some(true),
            paging: Paging {
                count: query.page_size,
                paging_token: query.page_token.as_deref(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct CreateEnvironmentBody<'a> {
    name: &'a str,
    project_id: &'a str,
    config_json: &'a Value,
}

#[derive(Debug, Serialize)]
struct CreateComputeTemplateBody<'a> {
    name: &'a str,
    project_id: &'a str,
    config: &'a Value,
}

#[derive(Debug, Default, Deserialize)]
struct ListMetadata {
    #[serde(default)]
    next_paging_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    results: Vec<T>,
    #[serde(default)]
    metadata: ListMetadata,
}

impl<T> From<ListResponse<T>> for Page<T> {
    fn from(response: ListResponse<T>) -> Self {
        Self {
            items: response.results,
            next_page_token: response.metadata.next_paging_token,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ItemResponse<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct CreatedResource {
    id: String,
}

/// [`ResourceApi`] backed by the service's REST endpoints.
#[derive(Clone, Debug)]
pub struct HttpResourceApi {
    client: Client,
    base_url: Url,
    token: String,
}

impl HttpResourceApi {
    /// Creates a client for `base_url` authenticating with `token`.
    ///
    /// # Errors
    ///
    /// Returns [`HttpApiError::InvalidUrl`] when `base_url` is not a
    /// hierarchical URL and [`HttpApiError::Client`] when the HTTP client
    /// cannot be built.
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self, HttpApiError> {
        let trimmed = base_url.trim();
        let parsed = Url::parse(trimmed).map_err(|err| HttpApiError::InvalidUrl {
            url: trimmed.to_owned(),
            message: err.to_string(),
        })?;
        if parsed.cannot_be_a_base() {
            return Err(HttpApiError::InvalidUrl {
                url: trimmed.to_owned(),
                message: String::from("URL cannot carry a path"),
            });
        }
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|err| HttpApiError::Client {
                message: err.to_string(),
            })?;
        Ok(Self {
            client,
            base_url: parsed,
            token: token.into(),
        })
    }

    /// Creates a client from loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`HttpResourceApi::new`].
    pub fn from_config(config: &KilnConfig) -> Result<Self, HttpApiError> {
        Self::new(&config.api_base_url, config.api_token.clone())
    }

    /// Appends `segments` to the base path, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> String {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url.into()
    }

    async fn execute(&self, request: RequestBuilder, url: &str) -> Result<Vec<u8>, HttpApiError> {
        debug!(url, "calling resource API");
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|err| HttpApiError::Transport {
                url: url.to_owned(),
                message: err.to_string(),
            })?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| HttpApiError::Transport {
                url: url.to_owned(),
                message: err.to_string(),
            })?;

        if status.is_success() {
            return Ok(body.to_vec());
        }

        Err(HttpApiError::Status {
            url: url.to_owned(),
            status: status.as_u16(),
            body: String::from_utf8_lossy(&body).into_owned(),
        })
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        url: &str,
    ) -> Result<T, HttpApiError> {
        let body = self.execute(request, url).await?;
        decode(url, &body)
    }

    async fn search(
        &self,
        path: &str,
        query: &SearchQuery,
    ) -> Result<Page<ResourceSummary>, HttpApiError> {
        let url = self.endpoint(&[path, "search"]);
        let request = self.client.post(&url).json(&SearchBody::from(query));
        let response: ListResponse<ResourceSummary> = self.fetch(request, &url).await?;
        Ok(response.into())
    }

    async fn create<B>(&self, path: &str, body: &B) -> Result<String, HttpApiError>
    where
        B: Serialize + Sync,
    {
        let url = self.endpoint(&[path, ""]);
        let request = self.client.post(&url).json(body);
        let response: ItemResponse<CreatedResource> = self.fetch(request, &url).await?;
        Ok(response.result.id)
    }

    async fn list_builds(&self, environment_id: &str) -> Result<Vec<Build>, HttpApiError> {
        let url = self.endpoint(&[BUILDS_PATH, ""]);
        let mut builds = Vec::new();
        let mut seen = HashSet::new();
        let mut token: Option<String> = None;
        loop {
            let mut params = vec![("application_template_id", environment_id)];
            if let Some(paging_token) = token.as_deref() {
                params.push(("paging_token", paging_token));
            }
            let request = self.client.get(&url).query(&params);
            let page: Page<Build> = self
                .fetch::<ListResponse<Build>>(request, &url)
                .await?
                .into();
            token = next_build_token(&mut seen, page.next_token());
            builds.extend(page.items);
            if token.is_none() {
                return Ok(builds);
            }
        }
    }

    async fn get(&self, build_id: &str) -> Result<BuildSnapshot, HttpApiError> {
        let url = self.endpoint(&[BUILDS_PATH, build_id]);
        let request = self.client.get(&url);
        let response: ItemResponse<BuildSnapshot> = self.fetch(request, &url).await?;
        Ok(response.result)
    }

    async fn delete(&self, path: &str, id: &str) -> Result<(), HttpApiError> {
        let url = self.endpoint(&[path, id]);
        let request = self.client.delete(&url);
        self.execute(request, &url).await.map(|_| ())
    }
}

/// Token for the next build page. Stops once the listing is exhausted or the
/// service hands back a token it already sent.
fn next_build_token(seen: &mut HashSet<String>, next: Option<&str>) -> Option<String> {
    let token = next?;
    if !seen.insert(token.to_owned()) {
        warn!(paging_token = token, "build listing repeated a paging token");
        return None;
    }
    Some(token.to_owned())
}

fn decode<T: DeserializeOwned>(url: &str, body: &[u8]) -> Result<T, HttpApiError> {
    serde_json::from_slice(body).map_err(|err| HttpApiError::Decode {
        url: url.to_owned(),
        message: err.to_string(),
    })
}

impl ResourceApi for HttpResourceApi {
    type Error = HttpApiError;

    fn search_environments<'a>(
        &'a self,
        query: &'a SearchQuery,
    ) -> ApiFuture<'a, Page<ResourceSummary>, Self::Error> {
        Box::pin(self.search(ENVIRONMENTS_PATH, query))
    }

    fn create_environment<'a>(
        &'a self,
        request: &'a CreateRequest,
    ) -> ApiFuture<'a, String, Self::Error> {
        Box::pin(async move {
            let body = CreateEnvironmentBody {
                name: &request.name,
                project_id: &request.project_id,
                config_json: &request.config,
            };
            self.create(ENVIRONMENTS_PATH, &body).await
        })
    }

    fn list_environment_builds<'a>(
        &'a self,
        environment_id: &'a str,
    ) -> ApiFuture<'a, Vec<Build>, Self::Error> {
        Box::pin(self.list_builds(environment_id))
    }

    fn get_build<'a>(&'a self, build_id: &'a str) -> ApiFuture<'a, BuildSnapshot, Self::Error> {
        Box::pin(self.get(build_id))
    }

    fn search_compute_templates<'a>(
        &'a self,
        query: &'a SearchQuery,
    ) -> ApiFuture<'a, Page<ResourceSummary>, Self::Error> {
        Box::pin(self.search(COMPUTE_TEMPLATES_PATH, query))
    }

    fn create_compute_template<'a>(
        &'a self,
        request: &'a CreateRequest,
    ) -> ApiFuture<'a, String, Self::Error> {
        Box::pin(async move {
            let body = CreateComputeTemplateBody {
                name: &request.name,
                project_id: &request.project_id,
                config: &request.config,
            };
            self.create(COMPUTE_TEMPLATES_PATH, &body).await
        })
    }

    fn delete_cluster<'a>(&'a self, cluster_id: &'a str) -> ApiFuture<'a, (), Self::Error> {
        Box::pin(self.delete(CLUSTERS_PATH, cluster_id))
    }

    fn delete_environment_build<'a>(
        &'a self,
        build_id: &'a str,
    ) -> ApiFuture<'a, (), Self::Error> {
        Box::pin(self.delete(BUILDS_PATH, build_id))
    }

    fn delete_environment<'a>(
        &'a self,
        environment_id: &'a str,
    ) -> ApiFuture<'a, (), Self::Error> {
        Box::pin(self.delete(ENVIRONMENTS_PATH, environment_id))
    }

    fn delete_compute_template<'a>(
        &'a self,
        compute_template_id: &'a str,
    ) -> ApiFuture<'a, (), Self::Error> {
        Box::pin(self.delete(COMPUTE_TEMPLATES_PATH, compute_template_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::BuildStatus;
    use rstest::rstest;
    use serde_json::json;

    fn to_body(value: &impl Serialize) -> Value {
        serde_json::to_value(value).expect("payload serialises")
    }

    fn search_query(include_anonymous: bool, page_size: Option<u32>, token: Option<&str>) -> SearchQuery {
        SearchQuery {
            project_id: String::from("prj_1"),
            name: String::from("release-env"),
            include_anonymous,
            page_size,
            page_token: token.map(str::to_owned),
        }
    }

    #[rstest]
    #[case::environment(
        search_query(false, Some(50), None),
        json!({
            "project_id": "prj_1",
            "name": {"equals": "release-env"},
            "paging": {"count": 50}
        })
    )]
    #[case::compute_template_next_page(
        search_query(true, None, Some("tok")),
        json!({
            "project_id": "prj_1",
            "name": {"equals": "release-env"},
            "include_anonymous": true,
            "paging": {"paging_token": "tok"}
        })
    )]
    fn search_body_matches_wire_shape(#[case] query: SearchQuery, #[case] expected: Value) {
        assert_eq!(to_body(&SearchBody::from(&query)), expected);
    }

    #[test]
    fn environment_creation_sends_config_json() {
        let config = json!({"base_image": "py311"});
        let body = to_body(&CreateEnvironmentBody {
            name: "env",
            project_id: "prj_1",
            config_json: &config,
        });
        assert_eq!(
            body,
            json!({"name": "env", "project_id": "prj_1", "config_json": {"base_image": "py311"}})
        );
    }

    #[test]
    fn list_response_converts_to_page() {
        let raw = br#"{"results":[{"id":"e1","name":"env"}],"metadata":{"next_paging_token":"p2"}}"#;
        let response: ListResponse<ResourceSummary> =
            decode("https://api.test/x", raw).expect("valid list response");
        let page = Page::from(response);

        assert_eq!(page.items, vec![ResourceSummary::new("e1", "env")]);
        assert_eq!(page.next_token(), Some("p2"));
    }

    #[test]
    fn list_response_without_metadata_is_last_page() {
        let raw = br#"{"results":[]}"#;
        let response: ListResponse<ResourceSummary> =
            decode("https://api.test/x", raw).expect("valid list response");
        assert_eq!(Page::from(response).next_token(), None);
    }

    #[test]
    fn build_item_response_decodes_status() {
        let raw = br#"{"result":{"id":"b1","status":"in_progress"}}"#;
        let response: ItemResponse<BuildSnapshot> =
            decode("https://api.test/builds/b1", raw).expect("valid build response");
        assert_eq!(response.result.status, BuildStatus::InProgress);
    }

    #[test]
    fn malformed_body_reports_decode_error() {
        let err = decode::<ItemResponse<CreatedResource>>("https://api.test/x", b"{}")
            .expect_err("missing result must fail");
        assert!(
            matches!(err, HttpApiError::Decode { ref url, .. } if url == "https://api.test/x"),
            "unexpected error: {err}"
        );
    }

    #[rstest]
    #[case("https://api.test/v2")]
    #[case("https://api.test/v2/")]
    #[case("  https://api.test/v2/  ")]
    fn urls_join_base_and_path(#[case] base: &str) {
        let api = HttpResourceApi::new(base, "token").expect("client builds");
        assert_eq!(
            api.endpoint(&[BUILDS_PATH, "b1"]),
            "https://api.test/v2/builds/b1"
        );
        assert_eq!(
            api.endpoint(&[BUILDS_PATH, ""]),
            "https://api.test/v2/builds/"
        );
    }

    #[rstest]
    #[case::slash_and_query("b/1?x", "https://api.test/v2/builds/b%2F1%3Fx")]
    #[case::percent("b%1", "https://api.test/v2/builds/b%251")]
    #[case::fragment("b#1", "https://api.test/v2/builds/b%231")]
    fn ids_are_encoded_as_single_segments(#[case] id: &str, #[case] expected: &str) {
        let api = HttpResourceApi::new("https://api.test/v2", "token").expect("client builds");
        assert_eq!(api.endpoint(&[BUILDS_PATH, id]), expected);
    }

    #[rstest]
    #[case("not a url")]
    #[case("mailto:ops@example.test")]
    fn unusable_base_url_is_rejected(#[case] base: &str) {
        let err = HttpResourceApi::new(base, "token").expect_err("base URL must be rejected");
        assert!(
            matches!(err, HttpApiError::InvalidUrl { .. }),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn build_paging_stops_when_a_token_repeats() {
        let mut seen = HashSet::new();
        assert_eq!(next_build_token(&mut seen, Some("p2")), Some(String::from("p2")));
        assert_eq!(next_build_token(&mut seen, Some("p3")), Some(String::from("p3")));
        assert_eq!(next_build_token(&mut seen, Some("p3")), None);
        assert_eq!(next_build_token(&mut seen, Some("p2")), None);
    }

    #[test]
    fn build_paging_stops_without_token() {
        assert_eq!(next_build_token(&mut HashSet::new(), None), None);
    }
}
