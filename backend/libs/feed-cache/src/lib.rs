//! Feed cache layer
//!
//! Provides the caching contract used by the personalization service:
//! - Versioned key schema (see [`CacheKey`])
//! - Object-safe [`CacheStore`] trait so callers can pass `Arc<dyn CacheStore>`
//! - Redis backend with TTL jitter and SCAN-based prefix purges
//! - In-process backend for local runs and tests
//! - Metrics integration

mod error;
mod keys;
mod metrics;

pub use error::{CacheError, CacheResult};
pub use keys::{CacheKey, ANONYMOUS, CACHE_VERSION, NO_CONTEXT};
pub use metrics::CacheMetrics;

use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Pipeline};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default TTL values (seconds)
pub mod ttl {
    pub const PERSONALIZED_FEED: u64 = 300; // 5 minutes
}

/// Raw key-value operations every cache backend provides
#[async_trait::async_trait]
pub trait CacheStore: Send + Sync {
    /// Get a raw value
    async fn get_raw(&self, key: &str) -> CacheResult<Option<String>>;

    /// Set a raw value with TTL
    async fn set_raw(&self, key: &str, value: String, ttl_secs: u64) -> CacheResult<()>;

    /// Delete a single key
    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Delete every key starting with `prefix`, returning the number removed
    async fn purge_prefix(&self, prefix: &str) -> CacheResult<usize>;
}

/// Get and deserialize a cached value.
///
/// Corrupted entries are deleted and reported as a miss.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn CacheStore,
    key: &str,
) -> CacheResult<Option<T>> {
    let metrics = CacheMetrics::new();
    match store.get_raw(key).await {
        Ok(Some(data)) => match serde_json::from_str::<T>(&data) {
            Ok(value) => {
                debug!(key = %key, "Cache hit");
                metrics.record_hit(key);
                Ok(Some(value))
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cache deserialization failed");
                metrics.record_error(key, "deserialize");
                if let Err(e) = store.delete(key).await {
                    warn!(key = %key, error = %e, "Failed to delete corrupted cache entry");
                    metrics.record_error(key, "delete");
                }
                Ok(None)
            }
        },
        Ok(None) => {
            debug!(key = %key, "Cache miss");
            metrics.record_miss(key);
            Ok(None)
        }
        Err(e) => {
            warn!(key = %key, error = %e, "Cache get error");
            metrics.record_error(key, "backend");
            Err(e)
        }
    }
}

/// Serialize and store a value with TTL
pub async fn set_json<T: Serialize + ?Sized>(
    store: &dyn CacheStore,
    key: &str,
    value: &T,
    ttl_secs: u64,
) -> CacheResult<()> {
    let data = serde_json::to_string(value)?;
    store.set_raw(key, data, ttl_secs).await?;
    CacheMetrics::new().record_write(key);
    Ok(())
}

/// Redis-backed cache
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    /// Open a connection manager for `redis_url`
    pub async fn connect(redis_url: &str) -> CacheResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    /// Add jitter to TTL to prevent synchronized expiry
    fn add_jitter(ttl_secs: u64) -> u64 {
        let jitter_percent = (rand::random::<u32>() % 10) as f64 / 100.0;
        let jitter = (ttl_secs as f64 * jitter_percent).round() as u64;
        ttl_secs + jitter
    }

    /// Ping Redis to check connection health
    pub async fn ping(&self) -> CacheResult<()> {
        redis::cmd("PING")
            .query_async::<_, String>(&mut self.conn.clone())
            .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl CacheStore for RedisCache {
    async fn get_raw(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_raw(&self, key: &str, value: String, ttl_secs: u64) -> CacheResult<()> {
        let ttl_with_jitter = Self::add_jitter(ttl_secs);
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl_with_jitter).await?;
        debug!(key = %key, ttl = ttl_with_jitter, "Cache set");
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn purge_prefix(&self, prefix: &str) -> CacheResult<usize> {
        let pattern = format!("{}*", prefix);
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut total_deleted = 0;

        loop {
            // SCAN is non-blocking unlike KEYS
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                let mut pipe = Pipeline::new();
                for key in &keys {
                    pipe.del(key);
                }
                pipe.query_async::<_, ()>(&mut conn).await?;
                total_deleted += keys.len();
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        debug!(prefix = %prefix, deleted = total_deleted, "Cache prefix purge");
        CacheMetrics::new().record_purge(prefix, total_deleted);
        Ok(total_deleted)
    }
}

/// In-process cache with per-entry expiry
#[derive(Clone, Default)]
pub struct MemoryCache {
    entries: Arc<DashMap<String, (String, Instant)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|entry| entry.value().1 > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl CacheStore for MemoryCache {
    async fn get_raw(&self, key: &str) -> CacheResult<Option<String>> {
        let now = Instant::now();
        let value = match self.entries.get(key) {
            Some(entry) if entry.value().1 > now => Some(entry.value().0.clone()),
            Some(_) => None,
            None => return Ok(None),
        };
        if value.is_none() {
            self.entries.remove(key);
        }
        Ok(value)
    }

    async fn set_raw(&self, key: &str, value: String, ttl_secs: u64) -> CacheResult<()> {
        let expires_at = Instant::now() + Duration::from_secs(ttl_secs);
        self.entries.insert(key.to_string(), (value, expires_at));
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn purge_prefix(&self, prefix: &str) -> CacheResult<usize> {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(prefix));
        let removed = before - self.entries.len();
        CacheMetrics::new().record_purge(prefix, removed);
        Ok(removed)
    }
}
