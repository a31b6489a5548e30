//! Durable tier: network-attached key/value store.
//!
//! `RedisStore` namespaces every key with a prefix (e.g. `"newsfeed:"`) so a
//! shared Redis instance can be cleared without touching other tenants.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use tokio::sync::RwLock;

use crate::error::CacheBackendError;

const SCAN_BATCH: usize = 500;

#[async_trait]
pub trait DurableStore: Send + Sync {
    /// (Re)establish the connection.
    async fn connect(&self) -> Result<(), CacheBackendError>;
    /// `Ok(None)` is a genuine miss, not a failure.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheBackendError>;
    async fn set(
        &self,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<(), CacheBackendError>;
    async fn delete(&self, key: &str) -> Result<bool, CacheBackendError>;
    /// Glob pattern (`*`, `?`), or everything in the namespace when `None`.
    async fn clear(&self, pattern: Option<&str>) -> Result<u64, CacheBackendError>;
    fn name(&self) -> &'static str;
}

pub struct RedisStore {
    client: Client,
    connection: RwLock<Option<MultiplexedConnection>>,
    prefix: String,
}

impl RedisStore {
    /// Parse the URL only; no network I/O until [`DurableStore::connect`].
    pub fn new(url: &str, prefix: &str) -> Result<Self, CacheBackendError> {
        let client = Client::open(url)?;
        Ok(Self {
            client,
            connection: RwLock::new(None),
            prefix: prefix.to_string(),
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    #[inline]
    fn prefixed_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}{}", self.prefix, key)
        }
    }

    async fn conn(&self) -> Result<MultiplexedConnection, CacheBackendError> {
        self.connection
            .read()
            .await
            .clone()
            .ok_or(CacheBackendError::Disconnected)
    }
}

#[async_trait]
impl DurableStore for RedisStore {
    async fn connect(&self) -> Result<(), CacheBackendError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        *self.connection.write().await = Some(conn);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheBackendError> {
        let mut conn = self.conn().await?;
        let value: Option<Vec<u8>> = conn.get(self.prefixed_key(key)).await?;
        Ok(value)
    }

    async fn set(
        &self,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<(), CacheBackendError> {
        let mut conn = self.conn().await?;
        let key = self.prefixed_key(key);
        match ttl {
            Some(t) => {
                let secs = t.as_secs().max(1);
                let _: () = conn.set_ex(key, value, secs).await?;
            }
            None => {
                let _: () = conn.set(key, value).await?;
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheBackendError> {
        let mut conn = self.conn().await?;
        let removed: u64 = conn.del(self.prefixed_key(key)).await?;
        Ok(removed > 0)
    }

    async fn clear(&self, pattern: Option<&str>) -> Result<u64, CacheBackendError> {
        let mut conn = self.conn().await?;
        let matcher = self.prefixed_key(pattern.unwrap_or("*"));

        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&matcher)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            if !keys.is_empty() {
                let n: u64 = conn.del(&keys).await?;
                removed += n;
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(removed)
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
