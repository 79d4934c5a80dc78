//! Key/value cache used for rule lookups.
//!
//! `InMemoryCache` is the default; `RedisCache` is used when `REDIS_URL` is set
//! so several replicas share invalidations. `ScopedCache` confines a caller to
//! one key prefix.

use async_trait::async_trait;
use dashmap::DashMap;
use redis::{aio::ConnectionManager, Client};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), anyhow::Error>;
    async fn delete(&self, key: &str) -> Result<(), anyhow::Error>;
    /// Remove every key starting with `prefix`; returns how many were removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<u64, anyhow::Error>;
    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

#[derive(Default)]
pub struct InMemoryCache {
    entries: DashMap<String, (String, Instant)>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        let now = Instant::now();
        let value = match self.entries.get(key) {
            Some(entry) if entry.1 > now => Some(entry.0.clone()),
            Some(_) => None,
            None => return Ok(None),
        };
        if value.is_none() {
            self.entries.remove_if(key, |_, (_, expires_at)| *expires_at <= now);
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), anyhow::Error> {
        self.entries
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), anyhow::Error> {
        self.entries.remove(key);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, anyhow::Error> {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(prefix));
        Ok(before.saturating_sub(self.entries.len()) as u64)
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }
}

#[derive(Clone)]
pub struct RedisCache {
    _client: Client,
    manager: ConnectionManager,
}

impl RedisCache {
    pub async fn new(url: &str) -> Result<Self, anyhow::Error> {
        tracing::info!("Connecting to Redis");
        let client = Client::open(url)?;

        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self {
            _client: client,
            manager,
        })
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to get cache: {}", e))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to set cache: {}", e))
    }

    async fn delete(&self, key: &str) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        let _: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to delete cache key: {}", e))?;
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, anyhow::Error> {
        let mut conn = self.manager.clone();
        let pattern = format!("{}*", prefix);
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;

        // SCAN instead of KEYS so large keyspaces are not blocked.
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to scan cache keys: {}", e))?;

            if !keys.is_empty() {
                let deleted: u64 = redis::cmd("DEL")
                    .arg(&keys)
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| anyhow::anyhow!("Failed to delete cache keys: {}", e))?;
                removed += deleted;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(removed)
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Redis health check failed: {}", e))
    }
}

/// A view of a shared cache restricted to keys under one prefix.
#[derive(Clone)]
pub struct ScopedCache {
    inner: Arc<dyn Cache>,
    prefix: String,
}

impl ScopedCache {
    pub fn new(inner: Arc<dyn Cache>, prefix: impl Into<String>) -> Self {
        Self {
            inner,
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn scoped(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        self.inner.get(&self.scoped(key)).await
    }

    pub async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), anyhow::Error> {
        self.inner.set(&self.scoped(key), value, ttl).await
    }

    pub async fn delete(&self, key: &str) -> Result<(), anyhow::Error> {
        self.inner.delete(&self.scoped(key)).await
    }

    /// Drop every key under the prefix. Keys outside it are untouched.
    pub async fn clear(&self) -> Result<u64, anyhow::Error> {
        self.inner.delete_prefix(&self.prefix).await
    }
}
