//! Byte-bounded LRU cache mapping a canonical target URL to captured response bytes.
//!
//! The cache is deliberately opaque to the content it stores: callers hand it a
//! `Bytes` blob (the full captured origin response) and an optional wall-clock
//! expiry, and get the same blob back on a later lookup. Replacement is strict
//! LRU by recency; capacity is enforced in bytes, not entry count.

use bytes::Bytes;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::debug;

/// Default byte budget for the whole cache. Deliberately distinct from the
/// per-socket I/O chunk size (`MAX_BYTES`); conflating the two, as the
/// original C proxy did, collapses capacity to a few KiB.
pub const CACHE_CAPACITY_BYTES: usize = 200 * 1024 * 1024;

/// No single entry is admitted above this size, regardless of remaining capacity.
pub const MAX_ENTRY_SIZE: usize = 5 * 1024 * 1024;

/// Flat per-entry bookkeeping charge (struct + key + allocator overhead), applied
/// symmetrically on insertion and eviction. Kept small so capacity-100-scale
/// scenarios (spec.md §8) admit the payload sizes they specify.
pub const ENTRY_OVERHEAD_BYTES: usize = 8;

/// Structural backstop on entry count so the backing `lru::LruCache` never needs
/// to grow unbounded even if callers insert many tiny entries. The byte budget
/// above is what actually governs eviction in practice.
pub const CACHE_SLOT_COUNT: usize = 100_000;

#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub url: Arc<str>,
    pub bytes: Bytes,
    pub len: usize,
    pub last_used: u64,
    pub expires: Option<u64>,
}

impl CacheEntry {
    fn accounted_size(&self) -> usize {
        self.len + ENTRY_OVERHEAD_BYTES
    }
}

/// Byte-bounded LRU cache. All reads and writes go through a single mutex; the
/// mutex is never held across network I/O, and `lookup` hands back an owned
/// `Bytes` clone (a refcount bump) so callers can write it to a socket after
/// releasing the lock.
#[derive(Clone)]
pub struct Cache {
    entries: Arc<Mutex<LruCache<u64, CacheEntry>>>,
    total_bytes: Arc<AtomicUsize>,
    capacity_bytes: usize,
    clock: Arc<AtomicU64>,
}

impl Cache {
    pub fn new() -> Self {
        Self::with_capacity(CACHE_CAPACITY_BYTES)
    }

    /// Construct a cache with a non-default byte budget. Used by tests that
    /// exercise eviction under a small, predictable capacity.
    pub fn with_capacity(capacity_bytes: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(LruCache::new(
                NonZeroUsize::new(CACHE_SLOT_COUNT).expect("CACHE_SLOT_COUNT must be non-zero"),
            ))),
            total_bytes: Arc::new(AtomicUsize::new(0)),
            capacity_bytes,
            clock: Arc::new(AtomicU64::new(0)),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    fn now_unix() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }

    /// Look up `key`. On a hit, recency is atomically updated before the lock
    /// is released. Expired entries are evicted in place and treated as a miss.
    pub async fn lookup(&self, key: u64) -> Option<Bytes> {
        let mut entries = self.entries.lock().await;

        let expired = match entries.peek(&key) {
            Some(entry) => matches!(entry.expires, Some(exp) if exp <= Self::now_unix()),
            None => return None,
        };

        if expired {
            if let Some(expired) = entries.pop(&key) {
                self.total_bytes
                    .fetch_sub(expired.accounted_size(), Ordering::Relaxed);
            }
            return None;
        }

        let tick = self.tick();
        let entry = entries.get_mut(&key)?;
        entry.last_used = tick;
        Some(entry.bytes.clone())
    }

    /// Insert `bytes` under `key` (the hash of the canonical URL `url`).
    /// Rejects entries larger than `MAX_ENTRY_SIZE` without touching the cache.
    /// Otherwise evicts least-recently-used entries until there is room, then
    /// stores the new entry. Replacing an existing key first removes its old
    /// accounted size so `total_bytes` stays exact.
    pub async fn insert(&self, url: &str, key: u64, bytes: Bytes, expires: Option<u64>) -> bool {
        let len = bytes.len();
        let entry_size = len + ENTRY_OVERHEAD_BYTES;

        if entry_size > MAX_ENTRY_SIZE || entry_size > self.capacity_bytes {
            debug!(url, entry_size, "cache insert rejected: entry too large");
            return false;
        }

        let mut entries = self.entries.lock().await;

        // Remove any existing entry for this key up front (not just peek-and-
        // subtract): if it were left in the map it could also be chosen as the
        // `pop_lru` eviction victim below, subtracting its size a second time
        // and underflowing `total_bytes`.
        if let Some(old) = entries.pop(&key) {
            self.total_bytes
                .fetch_sub(old.accounted_size(), Ordering::Relaxed);
        }

        let mut current = self.total_bytes.load(Ordering::Relaxed);
        while current + entry_size > self.capacity_bytes && !entries.is_empty() {
            if let Some((_, evicted)) = entries.pop_lru() {
                self.total_bytes
                    .fetch_sub(evicted.accounted_size(), Ordering::Relaxed);
                current = self.total_bytes.load(Ordering::Relaxed);
                debug!(url = %evicted.url, "evicted cache entry to make room");
            } else {
                break;
            }
        }

        let tick = self.tick();
        entries.put(
            key,
            CacheEntry {
                url: Arc::from(url),
                bytes,
                len,
                last_used: tick,
                expires,
            },
        );
        self.total_bytes.fetch_add(entry_size, Ordering::Relaxed);
        true
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub async fn clear(&self) {
        let mut entries = self.entries.lock().await;
        entries.clear();
        self.total_bytes.store(0, Ordering::Relaxed);
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes.load(Ordering::Relaxed)
    }

    pub fn capacity_bytes(&self) -> usize {
        self.capacity_bytes
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}
