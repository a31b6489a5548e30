//! Fast tier: bounded in-process LRU with per-entry expiry.
//!
//! Every operation takes the lock once, so lookup+promote and
//! evict+insert are each atomic with respect to other requests.
//! Time comes from `tokio::time::Instant` so tests can pause the clock.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use parking_lot::Mutex;
use regex::Regex;
use tokio::time::Instant;

pub const DEFAULT_MAX_ENTRIES: usize = 1000;

#[derive(Debug)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
    /// Position in `Inner::order`; larger is more recent.
    stamp: u64,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|t| now >= t)
    }
}

#[derive(Debug, Default)]
struct Inner {
    map: HashMap<String, Entry>,
    order: BTreeMap<u64, String>,
    tick: u64,
}

impl Inner {
    fn next_stamp(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn remove(&mut self, key: &str) -> Option<Entry> {
        let entry = self.map.remove(key)?;
        self.order.remove(&entry.stamp);
        Some(entry)
    }
}

#[derive(Debug)]
pub struct LruStore {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl LruStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hit promotes the entry to most-recently-used. Expired entries are
    /// removed and reported as absent.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let now = Instant::now();
        let mut g = self.inner.lock();

        let expired = g.map.get(key)?.is_expired(now);
        if expired {
            g.remove(key);
            return None;
        }

        let stamp = g.next_stamp();
        let inner = &mut *g;
        let entry = inner.map.get_mut(key)?;
        inner.order.remove(&entry.stamp);
        entry.stamp = stamp;
        inner.order.insert(stamp, key.to_string());
        Some(entry.value.clone())
    }

    /// Insert or replace. At capacity the least-recently-used entry goes first.
    pub fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) {
        let expires_at = ttl.map(|t| Instant::now() + t);
        let mut g = self.inner.lock();

        if g.remove(key).is_none() && g.map.len() >= self.capacity {
            if let Some((_, lru_key)) = g.order.pop_first() {
                g.map.remove(&lru_key);
            }
        }

        let stamp = g.next_stamp();
        g.order.insert(stamp, key.to_string());
        g.map.insert(
            key.to_string(),
            Entry {
                value,
                expires_at,
                stamp,
            },
        );
    }

    pub fn delete(&self, key: &str) -> bool {
        self.inner.lock().remove(key).is_some()
    }

    /// Drop keys matching `pattern`, or everything when `None`. Returns the count removed.
    pub fn clear(&self, pattern: Option<&Regex>) -> usize {
        let mut g = self.inner.lock();
        match pattern {
            None => {
                let n = g.map.len();
                g.map.clear();
                g.order.clear();
                n
            }
            Some(re) => {
                let doomed: Vec<String> = g.map.keys().filter(|k| re.is_match(k)).cloned().collect();
                for k in &doomed {
                    g.remove(k);
                }
                doomed.len()
            }
        }
    }

    /// Proactively drop expired entries. Returns the count removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut g = self.inner.lock();
        let doomed: Vec<String> = g
            .map
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for k in &doomed {
            g.remove(k);
        }
        doomed.len()
    }
}

impl Default for LruStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}
