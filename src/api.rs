use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::bias::BiasCoordinate;
use crate::cache::{RedisStore, TieredCache};
use crate::catalog::CatalogHandle;
use crate::config::{AppConfig, ProviderKind};
use crate::error::{CatalogError, FeedError, UpstreamProviderError, ValidationError};
use crate::feed::FeedAssembler;
use crate::provider::newsapi::NewsApiProvider;
use crate::provider::{ArticleProvider, FixtureProvider};
use crate::ratelimit::{RateDecision, RateLimiter};
use crate::selector::SourceSelector;

pub const CACHE_HEADER: &str = "X-Feed-Cache";
const ANONYMOUS_CLIENT: &str = "anonymous";
/// Upper bound for `friendly` / `opposing` on `/sources/pick`.
pub const MAX_PICK_COUNT: usize = 50;

#[derive(Clone)]
pub struct AppState {
    pub catalog: CatalogHandle,
    pub selector: Arc<SourceSelector>,
    pub cache: Arc<TieredCache>,
    pub feed: Arc<FeedAssembler>,
    pub limiter: Arc<RateLimiter>,
    /// Reject out-of-range coordinates (400) instead of clamping.
    pub strict_bias: bool,
}

impl AppState {
    /// Wire the services around an already-built provider and cache.
    pub fn new(
        cfg: &AppConfig,
        catalog: CatalogHandle,
        provider: Arc<dyn ArticleProvider>,
        cache: Arc<TieredCache>,
    ) -> Self {
        let selector = Arc::new(SourceSelector::new(catalog.clone(), cfg.selector_config()));
        let feed = Arc::new(FeedAssembler::new(
            selector.clone(),
            provider,
            cache.clone(),
            cfg.feed_config(),
        ));
        Self {
            catalog,
            selector,
            cache,
            feed,
            limiter: Arc::new(RateLimiter::per_minute(cfg.api.rate_limit_per_minute)),
            strict_bias: cfg.feed.strict_bias,
        }
    }

    /// Build everything from configuration. Does not connect the durable
    /// cache tier; call `cache.connect()` once inside the runtime.
    pub fn from_config(cfg: &AppConfig) -> anyhow::Result<Self> {
        let catalog = CatalogHandle::open(cfg.catalog.path.clone(), cfg.catalog.min_active);
        let provider = build_provider(cfg)?;
        let cache = Arc::new(build_cache(cfg));
        Ok(Self::new(cfg, catalog, provider, cache))
    }
}

fn build_provider(cfg: &AppConfig) -> anyhow::Result<Arc<dyn ArticleProvider>> {
    match cfg.provider.kind {
        ProviderKind::NewsApi => {
            let key = cfg.resolved_api_key();
            if key.is_empty() {
                warn!(target: "provider", "NEWS_API_KEY is empty; feed requests will fail upstream");
            }
            let p = NewsApiProvider::new(
                &cfg.provider.base_url,
                key,
                cfg.provider.page_size,
                cfg.feed_config().provider_timeout,
            )?;
            Ok(Arc::new(p))
        }
        ProviderKind::Fixture => {
            let path = cfg
                .provider
                .fixture_path
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("provider.kind = \"fixture\" needs provider.fixture_path"))?;
            let data = std::fs::read_to_string(path)
                .map_err(|e| anyhow::anyhow!("read {}: {e}", path.display()))?;
            Ok(Arc::new(FixtureProvider::from_fixture(&data)?))
        }
    }
}

fn build_cache(cfg: &AppConfig) -> TieredCache {
    let durable = cfg.cache.redis_url.as_deref().and_then(|url| {
        match RedisStore::new(url, &cfg.cache.key_prefix) {
            Ok(store) => Some(Arc::new(store) as Arc<dyn crate::cache::DurableStore>),
            Err(e) => {
                warn!(target: "cache", error = %e, "invalid REDIS_URL, running in-process cache only");
                None
            }
        }
    });
    TieredCache::new(cfg.cache_config(), durable)
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/feed", get(get_feed))
        .route("/sources/pick", get(pick_sources))
        .route("/article/{id}", get(get_article))
        .route("/admin/reload-sources", post(admin_reload_sources))
        .route("/admin/cache/clear", post(admin_cache_clear))
        .route("/debug/cache", get(debug_cache))
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .route("/health", get(|| async { "OK" }))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

// ---------- errors ----------

pub enum ApiError {
    BadRequest(ValidationError),
    Upstream(UpstreamProviderError),
    NotFound(String),
    Catalog(CatalogError),
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        ApiError::BadRequest(e)
    }
}

impl From<FeedError> for ApiError {
    fn from(e: FeedError) -> Self {
        match e {
            FeedError::Validation(v) => ApiError::BadRequest(v),
            FeedError::Upstream(u) => ApiError::Upstream(u),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, msg) = match self {
            ApiError::BadRequest(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            ApiError::Upstream(e) => (StatusCode::BAD_GATEWAY, e.to_string()),
            ApiError::NotFound(what) => (StatusCode::NOT_FOUND, format!("{what} not found")),
            ApiError::Catalog(e) => (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
        };
        (status, Json(json!({ "error": msg }))).into_response()
    }
}

// ---------- middleware ----------

/// First `X-Forwarded-For` hop, else a shared anonymous bucket.
fn client_id(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(ANONYMOUS_CLIENT)
        .to_string()
}

async fn rate_limit(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let client = client_id(req.headers());
    match state.limiter.check(&client, Utc::now()) {
        RateDecision::Allowed { .. } => next.run(req).await,
        RateDecision::Limited { retry_after_secs } => {
            warn!(target: "api", %client, path = %req.uri().path(), "rate limited");
            (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, retry_after_secs.to_string())],
                Json(json!({ "error": "too many requests" })),
            )
                .into_response()
        }
    }
}

// ---------- query parsing ----------

fn parse_f64(q: &HashMap<String, String>, name: &'static str) -> Result<f64, ValidationError> {
    let raw = q.get(name).ok_or(ValidationError::Missing(name))?;
    raw.trim()
        .parse::<f64>()
        .map_err(|_| ValidationError::NotANumber {
            name,
            raw: raw.clone(),
        })
}

fn parse_bias(q: &HashMap<String, String>, strict: bool) -> Result<BiasCoordinate, ValidationError> {
    let x = parse_f64(q, "x")?;
    let y = parse_f64(q, "y")?;
    if strict {
        BiasCoordinate::new(x, y)
    } else {
        BiasCoordinate::clamped(x, y)
    }
}

fn parse_count(q: &HashMap<String, String>, name: &'static str) -> Result<Option<usize>, ValidationError> {
    let Some(raw) = q.get(name) else {
        return Ok(None);
    };
    let value = raw
        .trim()
        .parse::<usize>()
        .map_err(|_| ValidationError::NotANumber {
            name,
            raw: raw.clone(),
        })?;
    if value > MAX_PICK_COUNT {
        return Err(ValidationError::TooLarge {
            name,
            value,
            max: MAX_PICK_COUNT,
        });
    }
    Ok(Some(value))
}

fn flag(q: &HashMap<String, String>, name: &str) -> bool {
    q.get(name)
        .is_some_and(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
}

// ---------- handlers ----------

async fn get_feed(
    State(state): State<AppState>,
    Query(q): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    let bias = parse_bias(&q, state.strict_bias)?;
    let refresh = flag(&q, "refresh");
    if let Some(ts) = q.get("client_ts") {
        debug!(target: "api", client_ts = %ts, "feed request");
    }

    let feed = state.feed.get_feed(bias, refresh).await?;
    let count = feed.cards.len();
    let cache_signal = if feed.cached { "HIT" } else { "MISS" };
    info!(target: "api", x = bias.x, y = bias.y, count, cache = cache_signal, "feed served");

    let mut resp = Json(json!({
        "cards": feed.cards,
        "count": count,
        "cached": feed.cached,
    }))
    .into_response();
    resp.headers_mut()
        .insert(CACHE_HEADER, HeaderValue::from_static(cache_signal));
    Ok(resp)
}

async fn pick_sources(
    State(state): State<AppState>,
    Query(q): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    let bias = parse_bias(&q, state.strict_bias)?;
    let cfg = state.selector.config();
    let friendly = parse_count(&q, "friendly")?.unwrap_or(cfg.friendly_count);
    let opposing = parse_count(&q, "opposing")?.unwrap_or(cfg.opposing_count);
    let category = q.get("category").map(|c| c.trim()).filter(|c| !c.is_empty());

    let selection = state.selector.select(bias, friendly, opposing, category);
    Ok(Json(json!({
        "bias": bias,
        "stage": selection.stage,
        "count": selection.sources.len(),
        "sources": selection.sources,
    }))
    .into_response())
}

async fn get_article(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    let bias = parse_bias(&q, state.strict_bias)?;
    match state.feed.get_article(bias, &id).await {
        Some(card) => Ok(Json(card).into_response()),
        None => Err(ApiError::NotFound(format!("article {id}"))),
    }
}

async fn admin_reload_sources(State(state): State<AppState>) -> Result<Response, ApiError> {
    let fresh = state.catalog.reload().map_err(ApiError::Catalog)?;
    Ok(Json(json!({
        "origin": fresh.origin,
        "count": fresh.len(),
        "loaded_at": fresh.loaded_at,
    }))
    .into_response())
}

async fn admin_cache_clear(
    State(state): State<AppState>,
    Query(q): Query<HashMap<String, String>>,
) -> Json<serde_json::Value> {
    let pattern = q.get("pattern").map(|p| p.trim()).filter(|p| !p.is_empty());
    state.cache.clear(pattern).await;
    info!(target: "api", pattern = pattern.unwrap_or("*"), "cache cleared");
    Json(json!({ "cleared": true, "pattern": pattern }))
}

async fn debug_cache(State(state): State<AppState>) -> Json<serde_json::Value> {
    let snap = state.catalog.snapshot();
    Json(json!({
        "cache": state.cache.stats(),
        "catalog": {
            "origin": snap.origin,
            "active": snap.len(),
            "loaded_at": snap.loaded_at,
        },
        "rate_limit_clients": state.limiter.tracked_clients(),
    }))
}
