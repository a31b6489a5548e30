//! Balanced Feed Service — Binary Entrypoint
//! Loads config, builds the selector/cache/feed services, starts the
//! background loops and serves the Axum router.

use std::time::Duration;

use balanced_feed::config::AppConfig;
use balanced_feed::metrics::Metrics;
use balanced_feed::scheduler::{Scheduler, SchedulerConfig};
use balanced_feed::{api, init_tracing, AppState};
use shuttle_axum::ShuttleAxum;
use tracing::{info, warn};

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = AppConfig::load().map_err(shuttle_runtime::Error::Custom)?;
    let state = AppState::from_config(&cfg).map_err(shuttle_runtime::Error::Custom)?;

    // Initial durable-tier connection; failures are handed to the reconnector.
    state.cache.connect().await;

    let scheduler = Scheduler::start(
        state.cache.clone(),
        state.catalog.clone(),
        SchedulerConfig {
            sweep_every: Duration::from_secs(cfg.cache.sweep_secs),
            catalog_poll: cfg
                .catalog
                .watch
                .then(|| Duration::from_secs(cfg.catalog.poll_secs)),
        },
    );
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        scheduler.shutdown().await;
    });

    let mut router = api::router(state);
    match Metrics::init(cfg.feed.ttl_secs) {
        Ok(m) => router = router.merge(m.router()),
        Err(e) => warn!(error = %e, "prometheus recorder not installed, /metrics disabled"),
    }

    info!(
        provider = ?cfg.provider.kind,
        durable = cfg.cache.redis_url.is_some(),
        hot_reload = cfg.catalog.watch,
        "balanced feed ready"
    );
    Ok(router.into())
}
