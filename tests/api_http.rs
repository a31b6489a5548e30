// tests/api_http.rs
//
// HTTP-level tests for the public API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.
//
// Covered:
// - GET /health
// - GET /feed (MISS → HIT via `X-Feed-Cache`, refresh, 400, 502)
// - GET /sources/pick
// - GET /article/{id}
// - POST /admin/cache/clear, POST /admin/reload-sources
// - GET /debug/cache
// - per-client rate limiting (429 + Retry-After)

use std::io::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{HeaderMap, Request, StatusCode},
    Router,
};
use serde_json::Value as Json;
use tower::ServiceExt as _; // for `oneshot`

use balanced_feed::cache::TieredCache;
use balanced_feed::catalog::{Catalog, CatalogHandle};
use balanced_feed::config::AppConfig;
use balanced_feed::error::UpstreamProviderError;
use balanced_feed::provider::{ArticleProvider, FixtureProvider, RawArticle};
use balanced_feed::{api, AppState};

const BODY_LIMIT: usize = 1024 * 1024;

const ARTICLES: &str = r#"[
    {"title":"Energy bill","url":"https://bbc.example/1","source":{"id":"bbc-news","name":"BBC News"}},
    {"title":"Senate vote","url":"https://cnn.example/1","source":{"id":"cnn","name":"CNN"}},
    {"title":"Governors","url":"https://fox.example/1","source":{"id":"fox-news","name":"Fox News"}},
    {"title":"Markets","url":"https://reuters.example/1","source":{"id":"reuters","name":"Reuters"}},
    {"title":"Storms","url":"https://ap.example/1","source":{"id":"associated-press","name":"Associated Press"}},
    {"title":"Taxes","url":"https://usatoday.example/1","source":{"id":"usa-today","name":"USA Today"}}
]"#;

struct DownProvider;

#[async_trait]
impl ArticleProvider for DownProvider {
    async fn fetch_articles_for_sources(
        &self,
        _ids: &[String],
    ) -> Result<Vec<RawArticle>, UpstreamProviderError> {
        Err(UpstreamProviderError::Unavailable("offline".into()))
    }

    fn name(&self) -> &'static str {
        "down"
    }
}

fn state_with(cfg: &AppConfig, provider: Arc<dyn ArticleProvider>, catalog: CatalogHandle) -> AppState {
    AppState::new(cfg, catalog, provider, Arc::new(TieredCache::memory_only(256)))
}

fn built_in_catalog() -> CatalogHandle {
    CatalogHandle::with_catalog(Catalog::built_in(), "missing-sources.json".into(), 4)
}

/// Build the same Router the binary uses, over fixture articles.
fn test_router(cfg: &AppConfig) -> Router {
    let provider = Arc::new(FixtureProvider::from_fixture(ARTICLES).expect("fixture parses"));
    api::router(state_with(cfg, provider, built_in_catalog()))
}

async fn send(app: &Router, method: &str, uri: &str, client: Option<&str>) -> (StatusCode, HeaderMap, Vec<u8>) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(ip) = client {
        req = req.header("x-forwarded-for", ip);
    }
    let req = req.body(Body::empty()).expect("build request");
    let resp = app.clone().oneshot(req).await.expect("router response");
    let status = resp.status();
    let headers = resp.headers().clone();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    (status, headers, bytes)
}

fn json(bytes: &[u8]) -> Json {
    serde_json::from_slice(bytes).expect("json body")
}

fn cache_header(headers: &HeaderMap) -> String {
    headers
        .get("X-Feed-Cache")
        .expect("X-Feed-Cache header must be present")
        .to_str()
        .expect("ascii header")
        .to_string()
}

#[tokio::test]
async fn api_health_returns_200_and_ok_body() {
    let app = test_router(&AppConfig::default());
    let (status, _, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(String::from_utf8(body).unwrap().trim(), "OK");
}

#[tokio::test]
async fn feed_miss_then_hit() {
    let app = test_router(&AppConfig::default());

    let (status, headers, body) = send(&app, "GET", "/feed?x=0&y=0&client_ts=1725170000", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cache_header(&headers), "MISS");
    let v = json(&body);
    assert_eq!(v["count"], 4);
    assert_eq!(v["cached"], false);
    assert_eq!(v["cards"][0]["sourceId"], "usa-today");
    assert_eq!(v["cards"][0]["role"], "friendly");

    let (_, headers, body) = send(&app, "GET", "/feed?x=0.0001&y=0", None).await;
    assert_eq!(cache_header(&headers), "HIT");
    assert_eq!(json(&body)["cached"], true);

    let (_, headers, _) = send(&app, "GET", "/feed?x=0&y=0&refresh=true", None).await;
    assert_eq!(cache_header(&headers), "MISS");
}

#[tokio::test]
async fn feed_rejects_bad_coordinates() {
    let app = test_router(&AppConfig::default());
    for uri in ["/feed?x=left&y=0", "/feed?x=0", "/feed?x=NaN&y=0", "/feed"] {
        let (status, _, body) = send(&app, "GET", uri, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert!(json(&body)["error"].is_string());
    }
}

#[tokio::test]
async fn out_of_range_is_clamped_unless_strict() {
    let app = test_router(&AppConfig::default());
    let (status, _, _) = send(&app, "GET", "/feed?x=1.7&y=-3", None).await;
    assert_eq!(status, StatusCode::OK);

    let mut strict = AppConfig::default();
    strict.feed.strict_bias = true;
    let app = test_router(&strict);
    let (status, _, _) = send(&app, "GET", "/feed?x=1.7&y=-3", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn provider_failure_maps_to_502() {
    let app = api::router(state_with(
        &AppConfig::default(),
        Arc::new(DownProvider),
        built_in_catalog(),
    ));
    let (status, _, body) = send(&app, "GET", "/feed?x=0.2&y=0.2", None).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(json(&body)["error"].as_str().unwrap().contains("offline"));
}

#[tokio::test]
async fn pick_endpoint_honours_counts() {
    let app = test_router(&AppConfig::default());
    let (status, _, body) = send(&app, "GET", "/sources/pick?x=0&y=0&friendly=1&opposing=2", None).await;
    assert_eq!(status, StatusCode::OK);
    let v = json(&body);
    assert_eq!(v["count"], 3);
    assert_eq!(v["stage"], "primary");
    assert_eq!(v["sources"][0]["role"], "friendly");
    assert_eq!(v["sources"][0]["id"], "usa-today");

    let (status, _, _) = send(&app, "GET", "/sources/pick?x=0&y=0&friendly=-1", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    for uri in [
        "/sources/pick?x=0&y=0&friendly=18446744073709551615&opposing=1",
        "/sources/pick?x=0&y=0&friendly=2&opposing=51",
    ] {
        let (status, _, body) = send(&app, "GET", uri, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert!(json(&body)["error"].as_str().unwrap().contains("maximum"));
    }
}

#[tokio::test]
async fn article_lookup_and_cache_clear() {
    let app = test_router(&AppConfig::default());
    let (_, _, body) = send(&app, "GET", "/feed?x=0.3&y=-0.2", None).await;
    let id = json(&body)["cards"][0]["articleId"]
        .as_str()
        .unwrap()
        .to_string();

    let (status, _, body) = send(&app, "GET", &format!("/article/{id}?x=0.3&y=-0.2"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body)["articleId"], id.as_str());

    let (status, _, _) = send(&app, "GET", "/article/unknown?x=0.3&y=-0.2", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, body) = send(&app, "POST", "/admin/cache/clear?pattern=feed:*", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body)["cleared"], true);

    let (_, headers, _) = send(&app, "GET", "/feed?x=0.3&y=-0.2", None).await;
    assert_eq!(cache_header(&headers), "MISS");
}

#[tokio::test]
async fn reload_sources_swaps_catalog() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"[
            {{"id":"a","name":"Alpha","x":-0.5,"y":0}},
            {{"id":"b","name":"Beta","x":0.5,"y":0}},
            {{"id":"c","name":"Gamma","x":0,"y":0.5}},
            {{"id":"d","name":"Delta","x":0,"y":-0.5}},
            {{"id":"e","name":"Epsilon","x":0.1,"y":0.1}}
        ]"#
    )
    .unwrap();

    let catalog = CatalogHandle::with_catalog(Catalog::built_in(), file.path().to_path_buf(), 4);
    let provider = Arc::new(FixtureProvider::from_fixture(ARTICLES).unwrap());
    let app = api::router(state_with(&AppConfig::default(), provider, catalog));

    let (status, _, body) = send(&app, "POST", "/admin/reload-sources", None).await;
    assert_eq!(status, StatusCode::OK);
    let v = json(&body);
    assert_eq!(v["count"], 5);
    assert_eq!(v["origin"], "primary");

    let (_, _, body) = send(&app, "GET", "/debug/cache", None).await;
    let v = json(&body);
    assert_eq!(v["catalog"]["active"], 5);
    assert_eq!(v["cache"]["durable_connected"], false);
}

#[tokio::test]
async fn reload_failure_keeps_current_catalog() {
    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(file.path(), "not json").unwrap();

    let catalog = CatalogHandle::with_catalog(Catalog::built_in(), file.path().to_path_buf(), 4);
    let provider = Arc::new(FixtureProvider::from_fixture(ARTICLES).unwrap());
    let app = api::router(state_with(&AppConfig::default(), provider, catalog));

    let (status, _, _) = send(&app, "POST", "/admin/reload-sources", None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (_, _, body) = send(&app, "GET", "/debug/cache", None).await;
    assert_eq!(json(&body)["catalog"]["active"], 6);
}

#[tokio::test]
async fn rate_limit_is_per_client() {
    let mut cfg = AppConfig::default();
    cfg.api.rate_limit_per_minute = 2;
    let app = test_router(&cfg);

    for _ in 0..2 {
        let (status, _, _) = send(&app, "GET", "/sources/pick?x=0&y=0", Some("10.0.0.1")).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, headers, _) = send(&app, "GET", "/sources/pick?x=0&y=0", Some("10.0.0.1, 192.168.1.1")).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    let retry: u64 = headers
        .get("retry-after")
        .expect("Retry-After present")
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry));

    let (status, _, _) = send(&app, "GET", "/sources/pick?x=0&y=0", Some("10.0.0.2")).await;
    assert_eq!(status, StatusCode::OK);

    // health is never limited
    let (status, _, _) = send(&app, "GET", "/health", Some("10.0.0.1")).await;
    assert_eq!(status, StatusCode::OK);
}
