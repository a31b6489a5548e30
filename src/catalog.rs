//! # Source Catalog
//!
//! The set of known news sources, each pinned to a point in bias space.
//!
//! - Loads from a JSON array of `{id, name, x, y, category?, language?, country?, active?}`.
//! - Records missing `id`/`name` or with coordinates outside `[-1,1]` are dropped.
//! - Duplicate ids: first occurrence wins, the rest are logged.
//! - Inactive records are filtered out at load time.
//! - Fewer than `min_active` survivors is a load failure; callers then use
//!   [`Catalog::built_in`], so an empty catalog is never served.
//!
//! The live catalog sits behind [`CatalogHandle`], an `ArcSwap` snapshot:
//! readers grab one `Arc` per request, `reload()` swaps the whole set.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bias::BiasCoordinate;
use crate::error::CatalogError;
use crate::fallback::{run_chain, FallbackStage, Step};

pub const DEFAULT_MIN_ACTIVE: usize = 4;
pub const DEFAULT_CATEGORY: &str = "general";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Source {
    pub id: String,
    pub name: String,
    pub coordinate: BiasCoordinate,
    pub category: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    pub active: bool,
}

impl Source {
    pub fn new(id: &str, name: &str, x: f64, y: f64, category: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            coordinate: BiasCoordinate { x, y },
            category: category.to_string(),
            language: None,
            country: None,
            active: true,
        }
    }
}

/// Record shape as found on disk. Everything optional so one bad record
/// does not sink the whole file.
#[derive(Debug, Deserialize)]
struct RawSource {
    id: Option<String>,
    name: Option<String>,
    x: Option<f64>,
    y: Option<f64>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    active: Option<bool>,
}

impl RawSource {
    fn validate(self) -> Result<Source, String> {
        let id = self
            .id
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or("missing id")?;
        let name = self
            .name
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| format!("{id}: missing name"))?;
        let (x, y) = match (self.x, self.y) {
            (Some(x), Some(y)) => (x, y),
            _ => return Err(format!("{id}: missing coordinate")),
        };
        let coordinate = BiasCoordinate::new(x, y).map_err(|e| format!("{id}: {e}"))?;
        let category = self
            .category
            .map(|c| c.trim().to_ascii_lowercase())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());

        Ok(Source {
            id,
            name,
            coordinate,
            category,
            language: self.language,
            country: self.country,
            active: self.active.unwrap_or(true),
        })
    }
}

/// Immutable catalog snapshot. `sources` holds active sources only, in file order.
#[derive(Debug, Clone, Serialize)]
pub struct Catalog {
    pub sources: Vec<Source>,
    pub origin: FallbackStage,
    pub loaded_at: DateTime<Utc>,
}

impl Catalog {
    /// Build from already-constructed sources: dedups and drops inactive ones,
    /// but does not enforce a minimum count.
    pub fn from_sources(sources: Vec<Source>) -> Self {
        let mut seen = HashSet::new();
        let sources = sources
            .into_iter()
            .filter(|s| s.active && seen.insert(s.id.clone()))
            .collect();
        Self {
            sources,
            origin: FallbackStage::Primary,
            loaded_at: Utc::now(),
        }
    }

    /// Parse and validate a JSON catalog.
    pub fn parse(json: &str, min_active: usize) -> Result<Self, CatalogError> {
        let records: Vec<serde_json::Value> = serde_json::from_str(json)?;

        let mut seen: HashSet<String> = HashSet::new();
        let mut sources = Vec::with_capacity(records.len());
        let mut rejected = 0usize;

        for (idx, value) in records.into_iter().enumerate() {
            let raw: RawSource = match serde_json::from_value(value) {
                Ok(r) => r,
                Err(e) => {
                    warn!(target: "catalog", idx, error = %e, "malformed source record");
                    rejected += 1;
                    continue;
                }
            };
            let src = match raw.validate() {
                Ok(s) => s,
                Err(reason) => {
                    warn!(target: "catalog", idx, %reason, "invalid source record");
                    rejected += 1;
                    continue;
                }
            };
            if !seen.insert(src.id.clone()) {
                warn!(target: "catalog", id = %src.id, "duplicate source id, keeping first");
                continue;
            }
            if src.active {
                sources.push(src);
            }
        }

        if sources.len() < min_active {
            return Err(CatalogError::InsufficientSources {
                found: sources.len(),
                required: min_active,
            });
        }

        info!(target: "catalog", active = sources.len(), rejected, "source catalog parsed");
        Ok(Self {
            sources,
            origin: FallbackStage::Primary,
            loaded_at: Utc::now(),
        })
    }

    pub fn load<P: AsRef<Path>>(path: P, min_active: usize) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| CatalogError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::parse(&content, min_active)
    }

    /// Load from `path`, falling back to the built-in catalog on any error.
    pub fn load_or_built_in<P: AsRef<Path>>(path: P, min_active: usize) -> Self {
        let path = path.as_ref();
        let (_, catalog) = run_chain(
            FallbackStage::Primary,
            |stage| match stage {
                FallbackStage::Primary => match Self::load(path, min_active) {
                    Ok(c) => Step::Done(c),
                    Err(e) => Step::TryNext(e.to_string()),
                },
                _ => Step::Done(Self::built_in()),
            },
            Self::built_in,
        );
        catalog
    }

    /// Fixed catalog used whenever the configured one cannot be loaded.
    pub fn built_in() -> Self {
        let sources = [
            ("bbc-news", "BBC News", -0.2, 0.1),
            ("cnn", "CNN", -0.5, 0.3),
            ("fox-news", "Fox News", 0.7, -0.2),
            ("reuters", "Reuters", 0.1, 0.4),
            ("associated-press", "Associated Press", 0.0, 0.2),
            ("usa-today", "USA Today", 0.0, 0.0),
        ]
        .into_iter()
        .map(|(id, name, x, y)| Source::new(id, name, x, y, DEFAULT_CATEGORY))
        .collect();

        Self {
            sources,
            origin: FallbackStage::CatalogFallback,
            loaded_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Source> {
        self.sources.iter().find(|s| s.id == id)
    }
}

/// Shared, swappable catalog. Cheap to clone.
#[derive(Clone)]
pub struct CatalogHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    current: ArcSwap<Catalog>,
    path: PathBuf,
    min_active: usize,
    reloading: AtomicBool,
}

impl CatalogHandle {
    /// Open the catalog at `path` (built-in catalog if it cannot be loaded).
    pub fn open(path: PathBuf, min_active: usize) -> Self {
        let initial = Catalog::load_or_built_in(&path, min_active);
        info!(
            target: "catalog",
            path = %path.display(),
            origin = initial.origin.as_str(),
            active = initial.len(),
            "source catalog ready"
        );
        Self::with_catalog(initial, path, min_active)
    }

    pub fn with_catalog(catalog: Catalog, path: PathBuf, min_active: usize) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                current: ArcSwap::new(Arc::new(catalog)),
                path,
                min_active,
                reloading: AtomicBool::new(false),
            }),
        }
    }

    /// Current snapshot. Holders keep a consistent view across a concurrent reload.
    pub fn snapshot(&self) -> Arc<Catalog> {
        self.inner.current.load_full()
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Swap in a catalog built elsewhere.
    pub fn replace(&self, catalog: Catalog) {
        self.inner.current.store(Arc::new(catalog));
    }

    /// Re-read the catalog file and swap it in. On failure the previous
    /// snapshot stays live and the error is returned.
    pub fn reload(&self) -> Result<Arc<Catalog>, CatalogError> {
        if self
            .inner
            .reloading
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!(target: "catalog", "reload already in progress, skipping");
            return Ok(self.snapshot());
        }

        let result = Catalog::load(&self.inner.path, self.inner.min_active);
        let out = match result {
            Ok(fresh) => {
                let fresh = Arc::new(fresh);
                self.inner.current.store(fresh.clone());
                info!(target: "catalog", active = fresh.len(), "source catalog reloaded");
                Ok(fresh)
            }
            Err(e) => {
                warn!(target: "catalog", error = %e, "catalog reload failed, keeping current snapshot");
                Err(e)
            }
        };

        self.inner.reloading.store(false, Ordering::SeqCst);
        out
    }
}

/// Poll the catalog file's mtime and reload when it moves forward.
pub fn spawn_watcher(
    handle: CatalogHandle,
    poll: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll);
        let mut last_mtime: Option<SystemTime> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let mtime = match tokio::fs::metadata(handle.path()).await.and_then(|m| m.modified()) {
                Ok(m) => m,
                // missing or unreadable; keep polling
                Err(_) => continue,
            };
            let changed = match last_mtime {
                None => false,
                Some(prev) => mtime > prev,
            };
            last_mtime = Some(mtime);
            if changed {
                let _ = handle.reload();
            }
        }
        info!(target: "catalog", "catalog watcher stopped");
    })
}
