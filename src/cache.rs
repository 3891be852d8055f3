//! TTL value cache
//!
//! A generic cache whose entries expire a fixed interval after insertion.
//! Expiry is enforced lazily on access and, optionally, by a background
//! sweeper thread that removes every expired entry on a fixed interval.
//! Without a TTL the cache never expires entries.
//!
//! Independent instances (with independently configured TTLs) front the
//! storage engine for resolved values and index lookups; callers pair every
//! successful engine mutation with the matching `put`/`invalidate` here.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::trace;

struct CacheEntry<V> {
    value: V,
    /// Absolute expiry computed at insertion; `None` never expires
    expires_at: Option<Instant>,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(at) => at <= now,
            None => false,
        }
    }
}

struct CacheInner<K, V> {
    entries: Mutex<HashMap<K, CacheEntry<V>>>,
    ttl: Option<Duration>,
    stats: CacheStats,
}

impl<K, V> CacheInner<K, V>
where
    K: Eq + Hash,
{
    /// Remove every expired entry, returning how many were dropped
    fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }
}

/// Generic TTL-based cache
pub struct TtlCache<K, V> {
    inner: Arc<CacheInner<K, V>>,
    sweeper: Option<SweeperHandle>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    /// Create a cache with lazy expiry only. `ttl = None` disables expiry.
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                entries: Mutex::new(HashMap::new()),
                ttl,
                stats: CacheStats::default(),
            }),
            sweeper: None,
        }
    }

    /// Insert a value; its expiry timestamp is fixed now
    pub fn put(&self, key: K, value: V) {
        let expires_at = self.inner.ttl.map(|ttl| Instant::now() + ttl);
        self.inner
            .entries
            .lock()
            .insert(key, CacheEntry { value, expires_at });
    }

    /// Look up a value, evicting it first if it has expired
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let mut entries = self.inner.entries.lock();

        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                self.inner.stats.miss();
                None
            }
            Some(entry) => {
                self.inner.stats.hit();
                Some(entry.value.clone())
            }
            None => {
                self.inner.stats.miss();
                None
            }
        }
    }

    /// Drop the entry for `key`, returning it if present
    pub fn invalidate(&self, key: &K) -> Option<V> {
        self.inner.entries.lock().remove(key).map(|e| e.value)
    }

    /// Drop all entries
    pub fn clear(&self) {
        self.inner.entries.lock().clear();
    }

    /// Number of entries currently held (expired-but-unswept included)
    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// (hits, misses) counters
    pub fn stats(&self) -> (u64, u64) {
        self.inner.stats.get()
    }

    /// Remove every expired entry immediately
    pub fn sweep(&self) -> usize {
        self.inner.sweep()
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Send + 'static,
    V: Clone + Send + 'static,
{
    /// Create a cache with lazy expiry plus a background sweeper removing
    /// all expired entries every `interval`. The sweeper thread shuts down
    /// when the cache is dropped.
    pub fn with_sweeper(ttl: Option<Duration>, interval: Duration) -> Self {
        let mut cache = Self::new(ttl);

        let inner = Arc::clone(&cache.inner);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let handle = thread::Builder::new()
            .name("chainkv-cache-sweeper".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let removed = inner.sweep();
                        if removed > 0 {
                            trace!(removed, "cache sweep");
                        }
                    }
                    // Stop signal or cache dropped
                    _ => break,
                }
            })
            .expect("failed to spawn cache sweeper thread");

        cache.sweeper = Some(SweeperHandle {
            stop: Some(stop_tx),
            thread: Some(handle),
        });
        cache
    }
}

struct SweeperHandle {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        // Dropping the sender disconnects the channel and wakes the sweeper
        self.stop.take();
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

// =============================================================================
// Stats
// =============================================================================

#[derive(Default)]
struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn get(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_and_get() {
        let cache: TtlCache<i32, &str> = TtlCache::new(None);
        cache.put(1, "one");
        cache.put(2, "two");

        assert_eq!(cache.get(&1), Some("one"));
        assert_eq!(cache.get(&2), Some("two"));
        assert_eq!(cache.get(&3), None);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_entries_expire_on_get() {
        let cache: TtlCache<i32, i32> = TtlCache::new(Some(Duration::from_millis(5)));
        cache.put(1, 100);
        assert_eq!(cache.get(&1), Some(100));

        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_no_ttl_never_expires() {
        let cache: TtlCache<i32, i32> = TtlCache::new(None);
        cache.put(1, 100);
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(cache.get(&1), Some(100));
    }

    #[test]
    fn test_invalidate_and_clear() {
        let cache: TtlCache<i32, i32> = TtlCache::new(None);
        cache.put(1, 100);
        cache.put(2, 200);

        assert_eq!(cache.invalidate(&1), Some(100));
        assert_eq!(cache.get(&1), None);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_sweep_removes_expired_entries() {
        let cache: TtlCache<i32, i32> = TtlCache::new(Some(Duration::from_millis(5)));
        cache.put(1, 100);
        cache.put(2, 200);
        std::thread::sleep(Duration::from_millis(10));

        // Entries are still held until someone looks
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.sweep(), 2);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_background_sweeper() {
        let cache: TtlCache<i32, i32> = TtlCache::with_sweeper(
            Some(Duration::from_millis(5)),
            Duration::from_millis(10),
        );
        cache.put(1, 100);
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_hit_miss_stats() {
        let cache: TtlCache<i32, i32> = TtlCache::new(None);
        cache.put(1, 100);

        cache.get(&1);
        cache.get(&1);
        cache.get(&2);

        assert_eq!(cache.stats(), (2, 1));
    }
}
