//! Tiered key/value cache (durable remote tier + in-process LRU).

pub mod durable;
pub mod lru;
pub mod tiered;

pub use durable::{DurableStore, RedisStore};
pub use lru::LruStore;
pub use tiered::{
    spawn_reconnector, spawn_sweeper, CacheStats, ConnectionEvent, ReconnectPolicy, TieredCache,
    TieredCacheConfig,
};

use regex::Regex;

/// Compile a Redis-style glob (`*`, `?`) into an anchored regex.
pub fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            c => out.push_str(&regex::escape(c.encode_utf8(&mut [0u8; 4]))),
        }
    }
    out.push('$');
    Regex::new(&out)
}
