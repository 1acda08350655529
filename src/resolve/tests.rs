//! Unit tests for paginated lookup and find-or-create.

use std::cell::RefCell;
use std::time::Duration;

use rstest::{fixture, rstest};
use serde_json::json;

use super::*;
use crate::retry::DEFAULT_CREATE_RETRY_DELAY;
use crate::test_support::{ApiCall, CREATED_ENVIRONMENT_ID, ManualClock, ScriptedApi};

#[fixture]
fn api() -> ScriptedApi {
    ScriptedApi::new()
}

#[fixture]
fn clock() -> ManualClock {
    ManualClock::new()
}

fn summary(id: &str, name: &str) -> ResourceSummary {
    ResourceSummary::new(id, name)
}

fn is_create(call: &ApiCall) -> bool {
    matches!(
        call,
        ApiCall::CreateEnvironment(_) | ApiCall::CreateComputeTemplate(_)
    )
}

#[tokio::test]
async fn find_paginated_follows_tokens_until_match() {
    let pages = RefCell::new(vec![
        Page::with_next(vec![1, 2], "p2"),
        Page::with_next(vec![3, 4], "p3"),
        Page::last(vec![5]),
    ]);
    let tokens = RefCell::new(Vec::new());

    let found: Result<Option<i32>, String> = find_paginated(
        |token| {
            tokens.borrow_mut().push(token);
            let page = pages.borrow_mut().remove(0);
            async move { Ok(page) }
        },
        |item| *item == 4,
    )
    .await;

    assert_eq!(found, Ok(Some(4)));
    assert_eq!(
        tokens.into_inner(),
        vec![None, Some(String::from("p2"))]
    );
}

#[tokio::test]
async fn find_paginated_stops_on_empty_token() {
    let calls = RefCell::new(0_u32);
    let found: Result<Option<i32>, String> = find_paginated(
        |_| {
            *calls.borrow_mut() += 1;
            async { Ok(Page::with_next(vec![1], "")) }
        },
        |item| *item == 9,
    )
    .await;

    assert_eq!(found, Ok(None));
    assert_eq!(calls.into_inner(), 1);
}

#[rstest]
#[tokio::test]
async fn resolve_returns_existing_exact_match(api: ScriptedApi, clock: ManualClock) {
    api.push_environment_page(Page::with_next(vec![summary("env-a", "release-env-old")], "p2"));
    api.push_environment_page(Page::last(vec![summary("env-b", "release-env")]));
    api.push_environment_page(Page::last(vec![summary("env-b", "release-env")]));

    let resolver = Resolver::new(&api, &clock, "prj", RetryPolicy::default());

    let first = resolver
        .resolve(ResourceKind::Environment, "release-env", &json!({}))
        .await
        .expect("lookup should succeed");
    let second = resolver
        .resolve(ResourceKind::Environment, "release-env", &json!({}))
        .await
        .expect("lookup should succeed");

    assert_eq!(first, Resolution::Found(String::from("env-b")));
    assert_eq!(second, Resolution::Found(String::from("env-b")));
    assert_eq!(api.count_calls(is_create), 0);
}

#[rstest]
#[tokio::test]
async fn resolve_ignores_near_matches_and_creates(api: ScriptedApi, clock: ManualClock) {
    api.push_environment_page(Page::last(vec![
        summary("env-a", "release-env-2"),
        summary("env-b", "Release-Env"),
    ]));

    let resolver = Resolver::new(&api, &clock, "prj", RetryPolicy::default());
    let resolution = resolver
        .resolve(ResourceKind::Environment, "release-env", &json!({"image": "py311"}))
        .await
        .expect("creation should succeed");

    assert_eq!(
        resolution,
        Resolution::Created(CREATED_ENVIRONMENT_ID.to_owned())
    );
    assert_eq!(
        api.calls().last(),
        Some(&ApiCall::CreateEnvironment(String::from("release-env")))
    );
    assert!(clock.sleeps().is_empty());
}

#[rstest]
#[tokio::test]
async fn resolve_stops_paging_on_empty_token_then_creates(api: ScriptedApi, clock: ManualClock) {
    api.push_environment_page(Page::with_next(vec![summary("env-a", "release-env-old")], "p2"));
    api.push_environment_page(Page::with_next(vec![summary("env-b", "release-env-2")], ""));

    let resolver = Resolver::new(&api, &clock, "prj", RetryPolicy::default());
    let resolution = resolver
        .resolve(ResourceKind::Environment, "release-env", &json!({}))
        .await
        .expect("creation should succeed");

    assert_eq!(
        resolution,
        Resolution::Created(CREATED_ENVIRONMENT_ID.to_owned())
    );
    let calls = api.calls();
    let tokens = calls
        .iter()
        .filter_map(|call| match call {
            ApiCall::SearchEnvironments(query) => Some(query.page_token.clone()),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(tokens, vec![None, Some(String::from("p2"))]);
    assert_eq!(api.count_calls(is_create), 1);
    assert_eq!(
        calls.last(),
        Some(&ApiCall::CreateEnvironment(String::from("release-env")))
    );
}

#[rstest]
#[tokio::test]
async fn environment_search_uses_page_size_and_project(api: ScriptedApi, clock: ManualClock) {
    let resolver = Resolver::new(&api, &clock, "prj", RetryPolicy::default());
    resolver
        .resolve(ResourceKind::Environment, "env", &json!({}))
        .await
        .expect("resolve should succeed");

    let Some(ApiCall::SearchEnvironments(query)) = api.calls().first().cloned() else {
        panic!("expected an environment search first");
    };
    assert_eq!(query.project_id, "prj");
    assert_eq!(query.name, "env");
    assert_eq!(query.page_size, Some(ENVIRONMENT_PAGE_SIZE));
    assert!(!query.include_anonymous);
    assert!(query.page_token.is_none());
}

#[rstest]
#[tokio::test]
async fn compute_template_search_includes_anonymous(api: ScriptedApi, clock: ManualClock) {
    api.push_compute_page(Page::with_next(Vec::new(), "next"));
    api.push_compute_page(Page::last(vec![summary("cpt-1", "gpu-small")]));

    let resolver = Resolver::new(&api, &clock, "prj", RetryPolicy::default());
    let resolution = resolver
        .resolve(ResourceKind::ComputeTemplate, "gpu-small", &json!({}))
        .await
        .expect("lookup should succeed");

    assert_eq!(resolution.id(), "cpt-1");
    let queries = api
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            ApiCall::SearchComputeTemplates(query) => Some(query),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(queries.len(), 2);
    assert!(queries.iter().all(|query| query.include_anonymous));
    assert_eq!(queries.get(1).and_then(|q| q.page_token.as_deref()), Some("next"));
}

#[rstest]
#[tokio::test]
async fn create_failure_is_retried_once_after_delay(api: ScriptedApi, clock: ManualClock) {
    api.push_environment_create(Err("temporarily unavailable"));
    api.push_environment_create(Ok("env-9"));

    let resolver = Resolver::new(&api, &clock, "prj", RetryPolicy::default());
    let resolution = resolver
        .resolve(ResourceKind::Environment, "env", &json!({}))
        .await
        .expect("retry should succeed");

    assert_eq!(resolution, Resolution::Created(String::from("env-9")));
    assert_eq!(api.count_calls(is_create), 2);
    assert_eq!(clock.sleeps(), vec![DEFAULT_CREATE_RETRY_DELAY]);
}

#[rstest]
#[tokio::test]
async fn second_create_failure_is_fatal(api: ScriptedApi, clock: ManualClock) {
    api.push_compute_create(Err("first"));
    api.push_compute_create(Err("second"));
    api.push_compute_create(Ok("never-used"));

    let resolver = Resolver::new(&api, &clock, "prj", RetryPolicy::default());
    let err = resolver
        .resolve(ResourceKind::ComputeTemplate, "gpu", &json!({}))
        .await
        .expect_err("two failures must be fatal");

    assert!(
        matches!(
            err,
            ProvisionError::Create { kind: ResourceKind::ComputeTemplate, ref name, ref source }
                if name == "gpu" && source.0 == "second"
        ),
        "unexpected error: {err}"
    );
    assert_eq!(api.count_calls(is_create), 2);
    assert_eq!(clock.elapsed(), Duration::from_secs(10));
}

#[rstest]
#[case("")]
#[case("   ")]
#[tokio::test]
async fn blank_names_are_rejected(
    api: ScriptedApi,
    clock: ManualClock,
    #[case] name: &str,
) {
    let resolver = Resolver::new(&api, &clock, "prj", RetryPolicy::default());
    let err = resolver
        .resolve(ResourceKind::Environment, name, &json!({}))
        .await
        .expect_err("blank name must fail");

    assert!(matches!(
        err,
        ProvisionError::MissingName {
            kind: ResourceKind::Environment
        }
    ));
    assert!(api.calls().is_empty());
}
