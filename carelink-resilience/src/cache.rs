//! Response cache for idempotent reads.
//!
//! A bounded, TTL-based map from request key to response payload. When the
//! cache is full, the oldest slice of entries (by insertion time) is evicted
//! in one go before the new entry goes in. A miss is never an error; it just
//! sends the caller to the network.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

/// Response cache configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// When false every lookup misses and nothing is stored.
    pub enabled: bool,
    /// Maximum number of cached responses.
    pub max_entries: usize,
    /// TTL for single-resource reads (seconds).
    pub ttl_secs: u64,
    /// TTL for search results (seconds).
    pub search_ttl_secs: u64,
    /// Share of `max_entries` evicted when the cache is full.
    pub eviction_fraction: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 100,
            ttl_secs: 300,
            search_ttl_secs: 60,
            eviction_fraction: 0.1,
        }
    }
}

impl CacheConfig {
    /// Entries removed per eviction round; always at least one.
    pub fn eviction_count(&self) -> usize {
        ((self.max_entries as f64 * self.eviction_fraction).floor() as usize).max(1)
    }
}

/// One cached response.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub payload: Value,
    pub inserted_at: Instant,
    pub ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.inserted_at) > self.ttl
    }
}

/// Cache statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub total_requests: u64,
    /// Percentage of lookups that hit.
    pub hit_rate: f64,
    pub entry_count: usize,
}

/// Bounded TTL cache.
pub struct ResponseCache {
    config: CacheConfig,
    entries: RwLock<HashMap<String, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Default TTL for single-resource reads.
    pub fn read_ttl(&self) -> Duration {
        Duration::from_secs(self.config.ttl_secs)
    }

    /// Default TTL for search results.
    pub fn search_ttl(&self) -> Duration {
        Duration::from_secs(self.config.search_ttl_secs)
    }

    /// Looks up `key`. Expired entries are removed and reported as a miss.
    pub async fn get(&self, key: &str) -> Option<Value> {
        if !self.config.enabled {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let hit = match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                debug!(key, "cache entry expired");
                None
            }
            Some(entry) => Some(entry.payload.clone()),
            None => None,
        };

        let counter = if hit.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        hit
    }

    /// Stores `payload` under `key`, evicting the oldest entries first if
    /// the cache is full. `ttl_override` replaces the read TTL.
    pub async fn put(&self, key: impl Into<String>, payload: Value, ttl_override: Option<Duration>) {
        if !self.config.enabled || self.config.max_entries == 0 {
            return;
        }
        let key = key.into();
        let mut entries = self.entries.write().await;

        if !entries.contains_key(&key) && entries.len() >= self.config.max_entries {
            let mut by_age: Vec<(Instant, String)> = entries
                .values()
                .map(|e| (e.inserted_at, e.key.clone()))
                .collect();
            by_age.sort();
            let evict = self.config.eviction_count();
            for (_, old) in by_age.into_iter().take(evict) {
                entries.remove(&old);
            }
            debug!(evicted = evict, "cache full, evicted oldest entries");
        }

        entries.insert(
            key.clone(),
            CacheEntry {
                key,
                payload,
                inserted_at: Instant::now(),
                ttl: ttl_override.unwrap_or_else(|| self.read_ttl()),
            },
        );
    }

    /// Removes one entry.
    pub async fn invalidate(&self, key: &str) -> bool {
        self.entries.write().await.remove(key).is_some()
    }

    /// Removes every entry whose key starts with `prefix`. Returns how many
    /// were removed.
    pub async fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(prefix));
        before - entries.len()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total_requests = hits + misses;
        let hit_rate = if total_requests > 0 {
            (hits as f64 / total_requests as f64) * 100.0
        } else {
            0.0
        };

        CacheStats {
            hits,
            misses,
            total_requests,
            hit_rate,
            entry_count: self.len().await,
        }
    }

    pub fn reset_stats(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

/// Cache key for a single-resource read.
pub fn read_key(resource_type: &str, id: &str) -> String {
    format!("read:{resource_type}/{id}")
}

/// Cache key for a search. Names and values are percent-encoded the way
/// the request target encodes them, then sorted so equivalent searches
/// share an entry.
pub fn search_key(resource_type: &str, params: &[(String, String)]) -> String {
    let mut query: Vec<String> = params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect();
    query.sort();
    format!("search:{resource_type}?{}", query.join("&"))
}

/// Prefixes covering every cached response for a resource type.
pub fn type_prefixes(resource_type: &str) -> [String; 2] {
    [
        format!("read:{resource_type}/"),
        format!("search:{resource_type}?"),
    ]
}
