//! Error taxonomy.
//!
//! Only `ValidationError` and `UpstreamProviderError` ever reach an HTTP
//! caller. The rest are absorbed where they occur (built-in catalog,
//! emergency selection list, fast cache tier).

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("bias coordinate `{axis}` is not a finite number")]
    NotFinite { axis: &'static str },
    #[error("bias coordinate `{axis}`={value} is outside [-1, 1]")]
    OutOfRange { axis: &'static str, value: f64 },
    #[error("missing query parameter `{0}`")]
    Missing(&'static str),
    #[error("query parameter `{name}` is not a number: {raw:?}")]
    NotANumber { name: &'static str, raw: String },
    #[error("query parameter `{name}`={value} exceeds the maximum of {max}")]
    TooLarge {
        name: &'static str,
        value: usize,
        max: usize,
    },
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("reading source catalog {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing source catalog: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("only {found} valid active sources, need at least {required}")]
    InsufficientSources { found: usize, required: usize },
}

#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("bias coordinate is not finite ({x}, {y})")]
    NonFiniteBias { x: f64, y: f64 },
    #[error("no sources available in any catalog")]
    NoSources,
}

#[derive(Debug, Error)]
pub enum CacheBackendError {
    #[error("durable cache is not connected")]
    Disconnected,
    #[error("durable cache operation `{op}` timed out after {ms} ms")]
    Timeout { op: &'static str, ms: u64 },
    #[error("durable cache backend: {0}")]
    Backend(String),
}

impl From<redis::RedisError> for CacheBackendError {
    fn from(e: redis::RedisError) -> Self {
        CacheBackendError::Backend(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum UpstreamProviderError {
    #[error("article provider request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("article provider returned status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("article provider timed out after {ms} ms")]
    Timeout { ms: u64 },
    #[error("article provider unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Upstream(#[from] UpstreamProviderError),
}
