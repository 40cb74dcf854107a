//! Content Cache with Size and Age Eviction
//!
//! This module implements an in-memory cache of segment content fetched from
//! the object store.
//!
//! ## How It Works
//!
//! ```text
//! read_page(offset 49,995)
//!         ↓
//! cache.get("csv_upload/ch/2024-.../segment-0.csv")
//!         ↓
//!     CACHE HIT? ────YES──→ touch last_access, return Bytes (clone)
//!         │
//!         NO
//!         ↓
//! store.get(key)
//!         ↓
//! insert (evict least recently accessed until it fits)
//!         ↓
//! Return Bytes
//! ```
//!
//! ## Locking
//!
//! The key → entry map sits behind a read/write lock. Each entry carries its
//! own mutex around `last_access`, so a hit only needs the map's read lock and
//! unrelated keys never serialize on each other. A sweep may evict an entry a
//! reader just touched; the next read simply misses and refetches.
//!
//! Concurrent misses on the same key are not deduplicated: both callers fetch
//! and the later insert wins.
//!
//! ## Eviction
//!
//! - **Size**: inserting past `capacity_bytes` evicts least recently accessed
//!   entries. Content larger than the whole capacity is served but not cached.
//! - **Age**: [`ContentCache::evict`] drops entries idle longer than `max_age`;
//!   [`ContentCache::start_eviction_sweep`] runs it periodically.
//!
//! ## Metrics
//!
//! Hits, misses, evictions and cached bytes feed the process-wide collectors
//! in [`crate::metrics`]. [`ContentCache::stats`] reports this cache alone.
//!
//! ## Usage
//!
//! ```ignore
//! use csvhouse_storage::ContentCache;
//!
//! let cache = Arc::new(ContentCache::new(store, 512 * 1024 * 1024));
//! let sweep = cache.clone().start_eviction_sweep(Duration::from_secs(60), Duration::from_secs(600));
//!
//! let content = cache.get("csv_upload/ch/2024-01-01-00-00-00/segment-0.csv").await?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use prometheus::IntCounter;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::config::CacheConfig;
use crate::error::Result;
use crate::metrics;
use crate::store::BlobStore;

struct CacheEntry {
    content: Bytes,
    last_access: Mutex<Instant>,
}

impl CacheEntry {
    fn new(content: Bytes) -> Self {
        Self {
            content,
            last_access: Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self.last_access.lock() = Instant::now();
    }

    fn last_access(&self) -> Instant {
        *self.last_access.lock()
    }

    fn size(&self) -> u64 {
        self.content.len() as u64
    }
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, Arc<CacheEntry>>,
    current_size: u64,
}

impl CacheState {
    fn remove(&mut self, key: &str) -> Option<Arc<CacheEntry>> {
        let entry = self.entries.remove(key)?;
        self.current_size = self.current_size.saturating_sub(entry.size());
        metrics::CACHE_SIZE_BYTES.sub(entry.size() as i64);
        Some(entry)
    }

    fn least_recently_accessed(&self) -> Option<String> {
        self.entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_access())
            .map(|(key, _)| key.clone())
    }
}

/// Bounded in-memory cache in front of a [`BlobStore`].
pub struct ContentCache {
    store: Arc<dyn BlobStore>,

    /// Maximum total bytes of cached content
    capacity_bytes: u64,

    state: RwLock<CacheState>,

    // This cache's share of the global hit/miss counters
    hits: IntCounter,
    misses: IntCounter,
}

impl ContentCache {
    /// Create a cache over `store` holding at most `capacity_bytes` of content.
    pub fn new(store: Arc<dyn BlobStore>, capacity_bytes: u64) -> Self {
        Self {
            store,
            capacity_bytes,
            state: RwLock::new(CacheState::default()),
            hits: metrics::local_counter("cache_hits", "Hits on this cache"),
            misses: metrics::local_counter("cache_misses", "Misses on this cache"),
        }
    }

    pub fn from_config(store: Arc<dyn BlobStore>, config: &CacheConfig) -> Self {
        Self::new(store, config.capacity_bytes)
    }

    /// The store this cache reads through to.
    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    /// Return the content stored under `key`, fetching it on a miss.
    pub async fn get(&self, key: &str) -> Result<Bytes> {
        let cached = self.state.read().entries.get(key).cloned();
        if let Some(entry) = cached {
            entry.touch();
            self.hits.inc();
            metrics::CACHE_HITS_TOTAL.inc();
            tracing::debug!(key = %key, size = entry.size(), "Cache hit");
            return Ok(entry.content.clone());
        }

        self.misses.inc();
        metrics::CACHE_MISSES_TOTAL.inc();
        tracing::debug!(key = %key, "Cache miss, fetching from object store");

        let content = self.store.get(key).await?;
        self.insert(key, content.clone());
        Ok(content)
    }

    /// Store `content` under `key`, evicting least recently accessed entries
    /// until it fits.
    pub fn insert(&self, key: &str, content: Bytes) {
        let size = content.len() as u64;
        if size > self.capacity_bytes {
            tracing::warn!(
                key = %key,
                size,
                capacity = self.capacity_bytes,
                "Cannot cache: content larger than cache capacity"
            );
            return;
        }

        let mut state = self.state.write();
        state.remove(key);

        while state.current_size + size > self.capacity_bytes {
            let Some(victim) = state.least_recently_accessed() else {
                break;
            };
            if let Some(evicted) = state.remove(&victim) {
                metrics::CACHE_EVICTIONS_TOTAL.with_label_values(&["size"]).inc();
                tracing::debug!(key = %victim, size = evicted.size(), "Evicted from cache");
            }
        }

        state.current_size += size;
        metrics::CACHE_SIZE_BYTES.add(size as i64);
        state
            .entries
            .insert(key.to_string(), Arc::new(CacheEntry::new(content)));
    }

    /// Drop a single entry. Returns whether it was cached.
    pub fn invalidate(&self, key: &str) -> bool {
        self.state.write().remove(key).is_some()
    }

    /// Remove every entry idle for longer than `max_age`. Returns the number
    /// of entries removed.
    pub fn evict(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let mut state = self.state.write();

        let stale: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.last_access()) > max_age)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &stale {
            state.remove(key);
        }

        if !stale.is_empty() {
            metrics::CACHE_EVICTIONS_TOTAL
                .with_label_values(&["age"])
                .inc_by(stale.len() as u64);
            tracing::debug!(
                evicted = stale.len(),
                remaining = state.entries.len(),
                "Evicted stale cache entries"
            );
        }
        stale.len()
    }

    /// Start the periodic age-based sweep.
    ///
    /// The task runs until the returned handle is aborted.
    pub fn start_eviction_sweep(self: Arc<Self>, interval: Duration, max_age: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                self.evict(max_age);
            }
        })
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.read();
        CacheStats {
            entry_count: state.entries.len(),
            current_size: state.current_size,
            capacity: self.capacity_bytes,
            hits: self.hits.get(),
            misses: self.misses.get(),
            utilization_pct: if self.capacity_bytes == 0 {
                0.0
            } else {
                state.current_size as f64 / self.capacity_bytes as f64 * 100.0
            },
        }
    }
}

impl Drop for ContentCache {
    fn drop(&mut self) {
        metrics::CACHE_SIZE_BYTES.sub(self.state.get_mut().current_size as i64);
    }
}

/// Cache statistics
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Number of cached entries
    pub entry_count: usize,

    /// Current total size of cached content
    pub current_size: u64,

    /// Maximum allowed cache size
    pub capacity: u64,

    pub hits: u64,
    pub misses: u64,

    /// Cache utilization percentage (0-100)
    pub utilization_pct: f64,
}
