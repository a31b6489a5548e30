// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod api;
pub mod bias;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod error;
pub mod fallback;
pub mod feed;
pub mod metrics;
pub mod provider;
pub mod ratelimit;
pub mod scheduler;
pub mod selector;

pub use crate::api::{router, AppState};
pub use crate::bias::BiasCoordinate;
pub use crate::feed::{Feed, FeedAssembler, FeedCard};
pub use crate::selector::{Role, SelectedSource, SourceSelector};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Our log targets at info, everything else at warn.
pub const DEFAULT_LOG_FILTER: &str =
    "balanced_feed=info,api=info,cache=info,catalog=info,config=info,fallback=info,feed=info,provider=info,scheduler=info,selector=info,warn";

/// Install the global tracing subscriber. `RUST_LOG` wins over the default
/// filter; `LOG_FORMAT=json` switches to JSON lines. Safe to call twice.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    let res = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
    if res.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
