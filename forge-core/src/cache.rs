//! Cache implementation for read responses
//! Entries expire lazily: validity is checked when a key is looked up.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tokio::sync::RwLock;
use tracing::debug;
use url::form_urlencoded;

use crate::clock::{SharedClock, SystemClock};

/// Cache entry with value and metadata
#[derive(Debug, Clone)]
struct CacheEntry<T> {
    /// Cached value
    value: T,
    /// When entry was stored
    stored_at: Instant,
}

/// Configuration for cache behavior
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// How long entries remain valid
    pub ttl: Duration,
    /// Maximum cache size
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            max_entries: 1000,
        }
    }
}

/// Builds the cache key for a call.
///
/// Query parameters are sorted before encoding so that the same logical
/// request always maps to the same key.
pub fn cache_key<'a, I>(method: &str, path: &str, query: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut pairs: Vec<_> = query.into_iter().collect();
    pairs.sort_unstable();

    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in pairs {
        serializer.append_pair(key, value);
    }
    let query = serializer.finish();

    if query.is_empty() {
        format!("{} {}", method, path)
    } else {
        format!("{} {}?{}", method, path, query)
    }
}

/// TTL cache for idempotent responses
pub struct ResponseCache<T> {
    entries: RwLock<HashMap<String, CacheEntry<T>>>,
    config: CacheConfig,
    clock: SharedClock,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<T: Clone + Send + Sync> ResponseCache<T> {
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: CacheConfig, clock: SharedClock) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            config,
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Gets a value from cache if it exists and is valid
    pub async fn get(&self, key: &str) -> Option<T> {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;

        let fresh = match entries.get(key) {
            Some(entry) if now.duration_since(entry.stored_at) < self.config.ttl => {
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                debug!(key, "Evicted expired cache entry");
                None
            }
            None => None,
        };

        match fresh {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        fresh
    }

    /// Inserts a value into the cache
    pub async fn insert(&self, key: String, value: T) {
        if self.config.max_entries == 0 {
            return;
        }

        let now = self.clock.now();
        let mut entries = self.entries.write().await;

        // Check size limit
        if entries.len() >= self.config.max_entries && !entries.contains_key(&key) {
            // Remove oldest entry
            if let Some(oldest_key) = entries
                .iter()
                .min_by_key(|(_, entry)| entry.stored_at)
                .map(|(key, _)| key.clone())
            {
                entries.remove(&oldest_key);
            }
        }

        entries.insert(
            key,
            CacheEntry {
                value,
                stored_at: now,
            },
        );
    }

    /// Drops every entry.
    pub async fn clear(&self) {
        let mut entries = self.entries.write().await;
        let dropped = entries.len();
        entries.clear();
        debug!(dropped, "Cache cleared");
    }

    /// Number of stored entries, including expired ones not yet looked up.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Gets cache statistics
    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.len().await,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Cache performance statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of entries in cache
    pub size: usize,
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups that found nothing fresh
    pub misses: u64,
}
