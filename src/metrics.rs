use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder. Fails if one is already installed.
    pub fn init(feed_ttl_secs: u64) -> Result<Self, BuildError> {
        let handle = PrometheusBuilder::new().install_recorder()?;
        describe();

        // Static gauge with the configured feed TTL
        gauge!("feed_cache_ttl_seconds").set(feed_ttl_secs as f64);

        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

fn describe() {
    describe_counter!("feed_requests_total", "Feed requests handled");
    describe_counter!("feed_cache_hits_total", "Feeds served from cache");
    describe_counter!("feed_cache_misses_total", "Feeds assembled from the provider");
    describe_counter!("feed_provider_errors_total", "Article provider failures");
    describe_counter!("selection_fallback_total", "Selections served by a fallback stage");
    describe_counter!("cache_durable_errors_total", "Durable cache operation failures");
    describe_gauge!("cache_durable_connected", "1 when the durable cache tier is healthy");
    describe_gauge!("cache_fast_entries", "Entries in the in-process cache tier");
}
