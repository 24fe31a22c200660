//! Bounded LRU cache of fetched remote content.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Mutex, PoisonError},
    time::SystemTime,
};

use bytes::Bytes;
use url::Url;

/// Cache configuration.
#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// Maximum number of entries.
    pub max_entries: usize,
    /// Maximum total size of cached content. Larger single entries are
    /// never cached.
    pub max_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1024,
            max_bytes: 64 * 1024 * 1024,
        }
    }
}

/// A cached fetch result.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub reference: Url,
    pub content: Bytes,
    pub fetched_at: SystemTime,
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct Slot {
    entry: CacheEntry,
    tick: u64,
}

#[derive(Default)]
struct Inner {
    slots: HashMap<Url, Slot>,
    // Access tick -> key, oldest first.
    order: BTreeMap<u64, Url>,
    next_tick: u64,
    total_bytes: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl Inner {
    fn touch(&mut self, key: &Url) {
        let tick = self.next_tick;
        if let Some(slot) = self.slots.get_mut(key) {
            self.order.remove(&slot.tick);
            slot.tick = tick;
            self.order.insert(tick, key.clone());
            self.next_tick += 1;
        }
    }

    fn remove(&mut self, key: &Url) -> Option<Slot> {
        let slot = self.slots.remove(key)?;
        self.order.remove(&slot.tick);
        self.total_bytes = self.total_bytes.saturating_sub(slot.entry.content.len());
        Some(slot)
    }
}

/// Least-recently-used cache keyed by content URL.
///
/// Safe to share across concurrent resolutions. The cache is purely an
/// optimization: a miss always falls back to a live fetch.
pub struct ResolutionCache {
    inner: Mutex<Inner>,
    config: CacheConfig,
}

impl Default for ResolutionCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl ResolutionCache {
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            config,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up content and mark it most recently used.
    #[must_use]
    pub fn get(&self, key: &Url) -> Option<Bytes> {
        let mut inner = self.lock();
        let content = inner.slots.get(key).map(|s| s.entry.content.clone());
        if content.is_some() {
            inner.hits += 1;
            inner.touch(key);
        } else {
            inner.misses += 1;
        }
        content
    }

    /// Look up an entry without affecting recency or stats.
    #[must_use]
    pub fn peek(&self, key: &Url) -> Option<CacheEntry> {
        self.lock().slots.get(key).map(|s| s.entry.clone())
    }

    /// Insert content, evicting least-recently-used entries to stay within
    /// bounds.
    pub fn put(&self, key: Url, content: Bytes) {
        if self.config.max_entries == 0 || content.len() > self.config.max_bytes {
            tracing::debug!(url = %key, bytes = content.len(), "Not caching oversized content");
            return;
        }

        let mut inner = self.lock();
        inner.remove(&key);

        let tick = inner.next_tick;
        inner.next_tick += 1;
        inner.total_bytes += content.len();
        inner.order.insert(tick, key.clone());
        inner.slots.insert(
            key.clone(),
            Slot {
                entry: CacheEntry {
                    reference: key,
                    content,
                    fetched_at: SystemTime::now(),
                },
                tick,
            },
        );

        while inner.slots.len() > self.config.max_entries
            || inner.total_bytes > self.config.max_bytes
        {
            let Some((_, oldest)) = inner.order.pop_first() else {
                break;
            };
            if let Some(slot) = inner.slots.remove(&oldest) {
                inner.total_bytes = inner.total_bytes.saturating_sub(slot.entry.content.len());
                inner.evictions += 1;
                tracing::debug!(url = %oldest, "Evicted cache entry");
            }
        }
    }

    /// Drop a cached entry.
    pub fn invalidate(&self, key: &Url) -> bool {
        self.lock().remove(key).is_some()
    }

    /// Drop everything.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.slots.clear();
        inner.order.clear();
        inner.total_bytes = 0;
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            entries: inner.slots.len(),
            bytes: inner.total_bytes,
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
        }
    }
}
