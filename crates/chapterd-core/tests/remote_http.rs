//! curl client against a local HTTP server shaped like the remote API.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chapterd_core::config::{RemoteConfig, RetryConfig};
use chapterd_core::rate_limit::RateLimiter;
use chapterd_core::remote::{MangaDexClient, RemoteApi, RemoteError};
use chapterd_core::retry::{FailureKind, RetryPolicy};
use common::api_server;

fn client(base_url: &str) -> MangaDexClient {
    let retry = RetryPolicy::from_config(&RetryConfig {
        max_attempts: 3,
        base_delay_secs: 0.01,
        max_delay_secs: 1,
    });
    MangaDexClient::new(
        &RemoteConfig {
            api_base_url: base_url.to_string(),
            site_base_url: "https://mangadex.org".to_string(),
            timeout_secs: 5,
        },
        retry,
        RateLimiter::new(1000.0, 100),
    )
}

fn query_param<'a>(target: &'a str, name: &str) -> Option<&'a str> {
    let query = target.split_once('?')?.1;
    query
        .split('&')
        .filter_map(|kv| kv.split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v)
}

/// Feed with `total` chapters numbered 1..=total, served `limit` at a time.
fn feed_page(total: u64, offset: u64, limit: u64) -> String {
    let data: Vec<_> = (offset..total.min(offset + limit))
        .map(|i| {
            serde_json::json!({
                "id": format!("ch-{}", i + 1),
                "type": "chapter",
                "attributes": {
                    "chapter": (i + 1).to_string(),
                    "volume": null,
                    "title": null,
                    "translatedLanguage": "en"
                },
                "relationships": [
                    {"type": "scanlation_group", "attributes": {"name": "Alpha Scans"}}
                ]
            })
        })
        .collect();
    serde_json::json!({
        "result": "ok",
        "data": data,
        "limit": limit,
        "offset": offset,
        "total": total
    })
    .to_string()
}

#[tokio::test]
async fn aggregate_count_is_fetched_per_title() {
    let server = api_server::start(|target| {
        if target.starts_with("/manga/abc/aggregate") {
            (
                200,
                r#"{"result":"ok","volumes":{"1":{"chapters":{
                    "1":{"chapter":"1"},"2":{"chapter":"2"},"2.5":{"chapter":"2.5"}}}}}"#
                    .to_string(),
            )
        } else {
            (404, r#"{"result":"error"}"#.to_string())
        }
    });
    let count = client(&server.base_url)
        .aggregate_count("https://mangadex.org/title/abc/some-title", "en")
        .await
        .unwrap();
    assert_eq!(count, 3);
    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(query_param(&requests[0], "translatedLanguage[]"), Some("en"));
}

#[tokio::test]
async fn chapter_feed_is_paginated() {
    let server = api_server::start(|target| {
        let offset = query_param(target, "offset")
            .and_then(|o| o.parse().ok())
            .unwrap_or(0);
        (200, feed_page(150, offset, 100))
    });
    let chapters = client(&server.base_url)
        .list_chapters("https://mangadex.org/title/abc", "en")
        .await
        .unwrap();

    assert_eq!(chapters.len(), 150);
    assert_eq!(chapters[0].number.as_deref(), Some("1"));
    assert_eq!(chapters[149].url, "https://mangadex.org/chapter/ch-150");
    assert_eq!(chapters[0].group.as_deref(), Some("Alpha Scans"));
    let offsets: Vec<_> = server
        .requests()
        .iter()
        .map(|r| query_param(r, "offset").unwrap_or_default().to_string())
        .collect();
    assert_eq!(offsets, vec!["0", "100"]);
}

#[tokio::test]
async fn not_found_is_permanent_and_not_retried() {
    let server = api_server::start(|_| (404, r#"{"result":"error"}"#.to_string()));
    let err = client(&server.base_url)
        .aggregate_count("https://mangadex.org/title/gone", "en")
        .await
        .unwrap_err();
    assert!(matches!(err, RemoteError::Http { status: 404, .. }));
    assert_eq!(err.failure_kind(), FailureKind::Permanent);
    assert_eq!(server.requests().len(), 1);
}

#[tokio::test]
async fn throttled_requests_are_retried() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let server = api_server::start(move |_| {
        if seen.fetch_add(1, Ordering::SeqCst) == 0 {
            (429, r#"{"result":"error"}"#.to_string())
        } else {
            (200, r#"{"result":"ok","volumes":[]}"#.to_string())
        }
    });
    let count = client(&server.base_url)
        .aggregate_count("https://mangadex.org/title/abc", "en")
        .await
        .unwrap();
    assert_eq!(count, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn server_errors_give_up_after_max_attempts() {
    let server = api_server::start(|_| (500, "{}".to_string()));
    let err = client(&server.base_url)
        .aggregate_count("https://mangadex.org/title/abc", "en")
        .await
        .unwrap_err();
    assert!(matches!(err, RemoteError::Http { status: 500, .. }));
    assert_eq!(err.failure_kind(), FailureKind::Transient);
    assert_eq!(server.requests().len(), 3);
}
