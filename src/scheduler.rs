//! Owns the background loops (cache sweep, durable reconnection, catalog
//! watcher). Each loop gets a child of one root token.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cache::{spawn_reconnector, spawn_sweeper, TieredCache};
use crate::catalog::{spawn_watcher, CatalogHandle};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub sweep_every: Duration,
    /// `None` disables the catalog watcher.
    pub catalog_poll: Option<Duration>,
}

pub struct Scheduler {
    root: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Scheduler {
    /// Spawn all loops. Must be called from within a tokio runtime.
    pub fn start(cache: Arc<TieredCache>, catalog: CatalogHandle, cfg: SchedulerConfig) -> Self {
        let root = CancellationToken::new();
        let mut tasks = Vec::with_capacity(3);

        tasks.push((
            "cache-sweeper",
            spawn_sweeper(cache.clone(), cfg.sweep_every, root.child_token()),
        ));
        if let Some(h) = spawn_reconnector(cache, root.child_token()) {
            tasks.push(("cache-reconnector", h));
        }
        if let Some(poll) = cfg.catalog_poll {
            info!(target: "catalog", path = %catalog.path().display(), poll_secs = poll.as_secs(), "catalog hot reload enabled");
            tasks.push(("catalog-watcher", spawn_watcher(catalog, poll, root.child_token())));
        }

        info!(target: "scheduler", tasks = tasks.len(), "background tasks started");
        Self { root, tasks }
    }

    pub fn task_names(&self) -> Vec<&'static str> {
        self.tasks.iter().map(|(n, _)| *n).collect()
    }

    pub fn is_cancelled(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Cancel every loop and wait for them to finish.
    pub async fn shutdown(mut self) {
        self.root.cancel();
        for (name, h) in self.tasks.drain(..) {
            if let Err(e) = h.await {
                warn!(target: "scheduler", task = name, error = %e, "task ended abnormally");
            }
        }
        info!(target: "scheduler", "background tasks stopped");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;

    fn handle() -> CatalogHandle {
        CatalogHandle::with_catalog(Catalog::built_in(), "does-not-exist.json".into(), 4)
    }

    #[tokio::test]
    async fn memory_only_cache_has_no_reconnector() {
        let cache = Arc::new(TieredCache::memory_only(8));
        let s = Scheduler::start(
            cache,
            handle(),
            SchedulerConfig {
                sweep_every: Duration::from_secs(60),
                catalog_poll: Some(Duration::from_secs(5)),
            },
        );
        assert_eq!(s.task_names(), vec!["cache-sweeper", "catalog-watcher"]);
        s.shutdown().await;
    }

    #[tokio::test]
    async fn drop_cancels_children() {
        let cache = Arc::new(TieredCache::memory_only(8));
        let s = Scheduler::start(
            cache,
            handle(),
            SchedulerConfig {
                sweep_every: Duration::from_secs(60),
                catalog_poll: None,
            },
        );
        let child = s.root.child_token();
        assert!(!child.is_cancelled());
        drop(s);
        assert!(child.is_cancelled());
    }
}
