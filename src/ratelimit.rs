use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

/// Windows older than this many periods are dropped on the next prune.
const PRUNE_AFTER_WINDOWS: i32 = 2;
const PRUNE_EVERY: u64 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Limited { retry_after_secs: u64 },
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started_at: DateTime<Utc>,
    count: u32,
}

/// Fixed-window request counter keyed by client id.
#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    clients: HashMap<String, Window>,
    checks: u64,
}

impl RateLimiter {
    /// `limit == 0` disables limiting.
    pub fn per_minute(limit: u32) -> Self {
        Self::new(limit, Duration::seconds(60))
    }

    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.limit > 0
    }

    pub fn check(&self, client: &str, now: DateTime<Utc>) -> RateDecision {
        if !self.is_enabled() {
            return RateDecision::Allowed { remaining: u32::MAX };
        }
        let mut g = self.inner.lock();
        g.checks += 1;
        if g.checks % PRUNE_EVERY == 0 {
            let horizon = self.window * PRUNE_AFTER_WINDOWS;
            g.clients.retain(|_, w| now - w.started_at < horizon);
        }

        let w = g.clients.entry(client.to_string()).or_insert(Window {
            started_at: now,
            count: 0,
        });
        if now - w.started_at >= self.window {
            *w = Window {
                started_at: now,
                count: 0,
            };
        }
        if w.count >= self.limit {
            let left = (w.started_at + self.window - now).num_seconds().max(1);
            return RateDecision::Limited {
                retry_after_secs: left as u64,
            };
        }
        w.count += 1;
        RateDecision::Allowed {
            remaining: self.limit - w.count,
        }
    }

    pub fn tracked_clients(&self) -> usize {
        self.inner.lock().clients.len()
    }
}
