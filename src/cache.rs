//! Short-lived answer cache.
//!
//! Values are opaque JSON strings keyed by a digest of the normalised query,
//! the source selection and the confidence threshold. An in-process map is
//! used by default; Redis takes over when a URL is configured.

use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::sources::SourceKind;
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[async_trait]
pub trait AnswerCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: String) -> Result<()>;
    fn backend(&self) -> &'static str;
}

pub fn cache_key(query: &str, sources: &[SourceKind], threshold: f64) -> String {
    let mut ids: Vec<&str> = sources.iter().map(|s| s.id()).collect();
    ids.sort_unstable();
    ids.dedup();
    let material = format!(
        "{}|{}|{:.3}",
        query.trim().to_lowercase(),
        ids.join(","),
        threshold
    );
    hex::encode(Sha256::digest(material.as_bytes()))
}

pub struct MemoryCache {
    entries: Mutex<HashMap<String, (Instant, String)>>,
    ttl: Duration,
    max_entries: usize,
}

impl MemoryCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            max_entries: max_entries.max(1),
        }
    }
}

#[async_trait]
impl AnswerCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((expires, value)) if *expires > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries.retain(|_, (expires, _)| *expires > now);
        if entries.len() >= self.max_entries && !entries.contains_key(key) {
            // Full of live entries: drop the one closest to expiry.
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, (expires, _))| *expires)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&oldest);
            }
        }
        entries.insert(key.to_string(), (now + self.ttl, value));
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

pub struct RedisCache {
    conn: ConnectionManager,
    ttl_secs: u64,
    key_prefix: String,
}

impl RedisCache {
    pub async fn connect(url: &str, ttl_secs: u64, key_prefix: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| Error::cache(format!("invalid Redis URL: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| Error::cache(format!("failed to connect to Redis: {e}")))?;
        Ok(Self {
            conn,
            ttl_secs,
            key_prefix: key_prefix.to_string(),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}:answer:{}", self.key_prefix, key)
    }
}

#[async_trait]
impl AnswerCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let full_key = self.key(key);
        let mut conn = self.conn.clone();
        let value: Option<String> = conn
            .get(&full_key)
            .await
            .map_err(|e| Error::cache(format!("GET {full_key}: {e}")))?;
        debug!(key = %full_key, hit = value.is_some(), "redis lookup");
        Ok(value)
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        let full_key = self.key(key);
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(&full_key, value, self.ttl_secs)
            .await
            .map_err(|e| Error::cache(format!("SETEX {full_key}: {e}")))?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

/// Build the configured cache. `None` when caching is disabled; a Redis
/// connection failure degrades to the in-memory cache.
pub async fn build_cache(config: &CacheConfig) -> Option<Arc<dyn AnswerCache>> {
    if config.ttl_secs == 0 {
        info!("answer cache disabled");
        return None;
    }
    if let Some(url) = &config.redis_url {
        match RedisCache::connect(url, config.ttl_secs, &config.key_prefix).await {
            Ok(cache) => {
                info!(ttl_secs = config.ttl_secs, "using Redis answer cache");
                return Some(Arc::new(cache));
            }
            Err(e) => warn!(error = %e, "Redis unavailable, using in-memory answer cache"),
        }
    }
    Some(Arc::new(MemoryCache::new(
        Duration::from_secs(config.ttl_secs),
        config.max_entries,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_normalises_query_and_source_order() {
        let a = cache_key("  Tesla Stock ", &[SourceKind::News, SourceKind::Finance], 0.5);
        let b = cache_key("tesla stock", &[SourceKind::Finance, SourceKind::News], 0.5);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, cache_key("tesla stock", &[SourceKind::News], 0.5));
        assert_ne!(a, cache_key("tesla stock", &[SourceKind::Finance, SourceKind::News], 0.7));
    }

    #[tokio::test]
    async fn memory_cache_round_trip_and_expiry() {
        let cache = MemoryCache::new(Duration::from_millis(50), 10);
        cache.set("k", "v".into()).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(cache.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn memory_cache_is_bounded() {
        let cache = MemoryCache::new(Duration::from_secs(60), 2);
        cache.set("a", "1".into()).await.unwrap();
        cache.set("b", "2".into()).await.unwrap();
        cache.set("c", "3".into()).await.unwrap();
        assert!(cache.get("a").await.unwrap().is_none());
        assert!(cache.get("c").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn zero_ttl_disables_cache() {
        let config = CacheConfig {
            ttl_secs: 0,
            ..CacheConfig::default()
        };
        assert!(build_cache(&config).await.is_none());
    }

    #[tokio::test]
    async fn defaults_to_memory_backend() {
        let config = CacheConfig {
            redis_url: None,
            ..CacheConfig::default()
        };
        assert_eq!(build_cache(&config).await.unwrap().backend(), "memory");
    }
}
