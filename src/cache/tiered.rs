//! Two-tier cache: durable remote store in front, in-process LRU as the
//! always-available mirror.
//!
//! - Reads try the durable tier while it is healthy; a backend failure marks
//!   it unhealthy and the read falls through to the fast tier.
//! - Writes go durable-first, then always to the fast tier. A durable failure
//!   never fails the write.
//! - Health is an atomic flag driven by [`ConnectionEvent`]s; a background
//!   task reconnects with capped linear backoff and gives up for good after
//!   `max_attempts`.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::durable::DurableStore;
use super::glob_to_regex;
use super::lru::{LruStore, DEFAULT_MAX_ENTRIES};
use crate::error::CacheBackendError;

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            max_attempts: 10,
        }
    }
}

impl ReconnectPolicy {
    /// Linear backoff capped at `max_delay`; `attempt` starts at 1.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt).min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct TieredCacheConfig {
    pub max_entries: usize,
    pub op_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for TieredCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            op_timeout: Duration::from_millis(500),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Durable-tier connection lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connect,
    Ready,
    Error(String),
    End,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub fast_entries: usize,
    pub fast_capacity: usize,
    pub durable: Option<&'static str>,
    pub durable_connected: bool,
    pub reconnect_exhausted: bool,
}

pub struct TieredCache {
    fast: LruStore,
    durable: Option<Arc<dyn DurableStore>>,
    connected: AtomicBool,
    exhausted: AtomicBool,
    wake_reconnect: Notify,
    cfg: TieredCacheConfig,
}

impl TieredCache {
    pub fn new(cfg: TieredCacheConfig, durable: Option<Arc<dyn DurableStore>>) -> Self {
        Self {
            fast: LruStore::new(cfg.max_entries),
            durable,
            connected: AtomicBool::new(false),
            exhausted: AtomicBool::new(false),
            wake_reconnect: Notify::new(),
            cfg,
        }
    }

    pub fn memory_only(max_entries: usize) -> Self {
        Self::new(
            TieredCacheConfig {
                max_entries,
                ..TieredCacheConfig::default()
            },
            None,
        )
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            fast_entries: self.fast.len(),
            fast_capacity: self.fast.capacity(),
            durable: self.durable.as_ref().map(|d| d.name()),
            durable_connected: self.is_connected(),
            reconnect_exhausted: self.exhausted.load(Ordering::SeqCst),
        }
    }

    /// First connection attempt. Failure is logged and handed to the reconnector.
    pub async fn connect(&self) {
        let Some(durable) = self.durable.as_ref() else {
            return;
        };
        self.on_event(ConnectionEvent::Connect);
        match tokio::time::timeout(self.cfg.op_timeout, durable.connect()).await {
            Ok(Ok(())) => self.on_event(ConnectionEvent::Ready),
            Ok(Err(e)) => self.on_event(ConnectionEvent::Error(e.to_string())),
            Err(_) => self.on_event(ConnectionEvent::Error("connect timed out".into())),
        }
    }

    /// Apply a lifecycle event to the health flag.
    pub fn on_event(&self, ev: ConnectionEvent) {
        match ev {
            ConnectionEvent::Connect => {
                debug!(target: "cache", "durable tier connecting");
            }
            ConnectionEvent::Ready => {
                if !self.connected.swap(true, Ordering::SeqCst) {
                    info!(target: "cache", "durable tier ready");
                }
                gauge!("cache_durable_connected").set(1.0);
            }
            ConnectionEvent::Error(reason) => {
                if self.connected.swap(false, Ordering::SeqCst) {
                    warn!(target: "cache", %reason, "durable tier error, serving from fast tier");
                } else {
                    debug!(target: "cache", %reason, "durable tier still unavailable");
                }
                gauge!("cache_durable_connected").set(0.0);
                self.wake_reconnect.notify_one();
            }
            ConnectionEvent::End => {
                if self.connected.swap(false, Ordering::SeqCst) {
                    warn!(target: "cache", "durable tier connection ended");
                }
                gauge!("cache_durable_connected").set(0.0);
                self.wake_reconnect.notify_one();
            }
        }
    }

    fn healthy_durable(&self) -> Option<&Arc<dyn DurableStore>> {
        self.durable.as_ref().filter(|_| self.is_connected())
    }

    /// Run one durable call under the op timeout; failures degrade health.
    async fn guarded<T, F>(&self, op: &'static str, fut: F) -> Result<T, CacheBackendError>
    where
        F: Future<Output = Result<T, CacheBackendError>>,
    {
        let err = match tokio::time::timeout(self.cfg.op_timeout, fut).await {
            Ok(Ok(v)) => return Ok(v),
            Ok(Err(e)) => e,
            Err(_) => CacheBackendError::Timeout {
                op,
                ms: self.cfg.op_timeout.as_millis() as u64,
            },
        };
        counter!("cache_durable_errors_total", "op" => op).increment(1);
        self.on_event(ConnectionEvent::Error(err.to_string()));
        Err(err)
    }

    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        if let Some(durable) = self.healthy_durable() {
            match self.guarded("get", durable.get(key)).await {
                Ok(Some(v)) => return Some(v),
                Ok(None) => {}
                Err(e) => debug!(target: "cache", key, error = %e, "durable get failed"),
            }
        }
        self.fast.get(key)
    }

    /// Write-through. `ttl = None` means no expiry.
    pub async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) {
        if let Some(durable) = self.healthy_durable() {
            if let Err(e) = self.guarded("set", durable.set(key, &value, ttl)).await {
                debug!(target: "cache", key, error = %e, "durable set failed");
            }
        }
        self.fast.set(key, value, ttl);
        gauge!("cache_fast_entries").set(self.fast.len() as f64);
    }

    pub async fn delete(&self, key: &str) -> bool {
        let mut removed = false;
        if let Some(durable) = self.healthy_durable() {
            removed = self.guarded("delete", durable.delete(key)).await.unwrap_or(false);
        }
        self.fast.delete(key) || removed
    }

    /// Glob pattern clear on both tiers, or everything when `pattern` is `None`.
    pub async fn clear(&self, pattern: Option<&str>) {
        if let Some(durable) = self.healthy_durable() {
            match self.guarded("clear", durable.clear(pattern)).await {
                Ok(n) => info!(target: "cache", removed = n, ?pattern, "durable tier cleared"),
                Err(e) => warn!(target: "cache", error = %e, "durable clear failed"),
            }
        }

        let removed = match pattern {
            None => self.fast.clear(None),
            Some(p) => match glob_to_regex(p) {
                Ok(re) => self.fast.clear(Some(&re)),
                Err(e) => {
                    warn!(target: "cache", pattern = p, error = %e, "bad clear pattern");
                    0
                }
            },
        };
        info!(target: "cache", removed, ?pattern, "fast tier cleared");
        gauge!("cache_fast_entries").set(self.fast.len() as f64);
    }

    /// Drop expired fast-tier entries now.
    pub fn sweep(&self) -> usize {
        let n = self.fast.purge_expired();
        gauge!("cache_fast_entries").set(self.fast.len() as f64);
        n
    }
}

/// Periodic fast-tier sweep.
pub fn spawn_sweeper(
    cache: Arc<TieredCache>,
    every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let n = cache.sweep();
                    if n > 0 {
                        debug!(target: "cache", purged = n, "expired entries swept");
                    }
                }
            }
        }
    })
}

/// Reconnection loop. Sleeps until an error/end event, then retries with
/// backoff. Once an outage exhausts `max_attempts`, the loop exits and the
/// durable tier stays down until restart.
pub fn spawn_reconnector(cache: Arc<TieredCache>, cancel: CancellationToken) -> Option<JoinHandle<()>> {
    let durable = cache.durable.clone()?;
    Some(tokio::spawn(async move {
        let policy = cache.cfg.reconnect.clone();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = cache.wake_reconnect.notified() => {}
            }
            if cache.is_connected() {
                continue;
            }

            let mut attempt = 0u32;
            while !cache.is_connected() && attempt < policy.max_attempts {
                attempt += 1;
                let delay = policy.delay_for(attempt);
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
                cache.on_event(ConnectionEvent::Connect);
                match tokio::time::timeout(cache.cfg.op_timeout, durable.connect()).await {
                    Ok(Ok(())) => {
                        info!(target: "cache", attempt, "durable tier reconnected");
                        cache.on_event(ConnectionEvent::Ready);
                    }
                    Ok(Err(e)) => warn!(target: "cache", attempt, error = %e, "reconnect failed"),
                    Err(_) => warn!(target: "cache", attempt, "reconnect timed out"),
                }
            }

            if !cache.is_connected() {
                cache.exhausted.store(true, Ordering::SeqCst);
                error!(
                    target: "cache",
                    attempts = attempt,
                    "durable tier unreachable, giving up until restart"
                );
                return;
            }
        }
    }))
}
