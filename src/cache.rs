//! Capacity-bounded, least-recently-used cache of connection pools.
//!
//! The cache holds one `std::sync::Mutex` around the whole map. Lookups,
//! factory calls for missing keys and insertions all run under it, which is
//! what guarantees a single pool per key when callers race on the same
//! missing key. Pools leaving the cache are closed after the lock is released
//! but before the call that removed them returns.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::key::PoolKey;
use crate::metrics::PoolManagerMetrics;
use crate::pool::ConnectionPool;
use crate::util::lock_unpoisoned;

pub const DEFAULT_NUM_POOLS: usize = 10;

type SharedPool = Arc<dyn ConnectionPool>;

struct CacheEntry {
    pool: SharedPool,
    stamp: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<PoolKey, CacheEntry>,
    recency: BTreeMap<u64, PoolKey>,
    next_stamp: u64,
}

impl CacheState {
    fn bump(&mut self) -> u64 {
        let stamp = self.next_stamp;
        self.next_stamp += 1;
        stamp
    }

    fn touch(&mut self, key: &PoolKey) -> Option<SharedPool> {
        let stamp = self.bump();
        let entry = self.entries.get_mut(key)?;
        self.recency.remove(&entry.stamp);
        entry.stamp = stamp;
        self.recency.insert(stamp, key.clone());
        Some(Arc::clone(&entry.pool))
    }

    /// Inserts as most recently used and returns the pools pushed out.
    fn insert(
        &mut self,
        key: PoolKey,
        pool: SharedPool,
        capacity: usize,
    ) -> Vec<(PoolKey, SharedPool)> {
        let mut displaced = Vec::new();
        let stamp = self.bump();
        if let Some(previous) = self
            .entries
            .insert(key.clone(), CacheEntry { pool, stamp })
        {
            self.recency.remove(&previous.stamp);
            displaced.push((key.clone(), previous.pool));
        }
        self.recency.insert(stamp, key);

        while self.entries.len() > capacity {
            let Some((_, oldest)) = self.recency.pop_first() else {
                break;
            };
            if let Some(entry) = self.entries.remove(&oldest) {
                displaced.push((oldest, entry.pool));
            }
        }
        displaced
    }

    fn remove(&mut self, key: &PoolKey) -> Option<SharedPool> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.stamp);
        Some(entry.pool)
    }

    fn drain(&mut self) -> Vec<(PoolKey, SharedPool)> {
        self.recency.clear();
        self.entries
            .drain()
            .map(|(key, entry)| (key, entry.pool))
            .collect()
    }
}

pub struct PoolCache {
    capacity: usize,
    state: Mutex<CacheState>,
    metrics: PoolManagerMetrics,
}

impl PoolCache {
    pub fn new(capacity: usize) -> Self {
        Self::with_metrics(capacity, PoolManagerMetrics::default())
    }

    pub(crate) fn with_metrics(capacity: usize, metrics: PoolManagerMetrics) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(CacheState::default()),
            metrics,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the cached pool for `key`, building it with `factory` on a miss.
    ///
    /// A failing factory leaves the cache unchanged and its error is returned.
    pub fn get_or_create<F>(&self, key: &PoolKey, factory: F) -> crate::Result<SharedPool>
    where
        F: FnOnce() -> crate::Result<SharedPool>,
    {
        let (pool, displaced) = {
            let mut state = lock_unpoisoned(&self.state);
            if let Some(pool) = state.touch(key) {
                self.metrics.record_pool_hit();
                return Ok(pool);
            }
            let pool = factory()?;
            self.metrics.record_pool_created();
            debug!(pool = %key, "created connection pool");
            let displaced = state.insert(key.clone(), Arc::clone(&pool), self.capacity);
            (pool, displaced)
        };
        self.close_all(displaced);
        Ok(pool)
    }

    /// Looks up `key` and marks it most recently used.
    pub fn get(&self, key: &PoolKey) -> Option<SharedPool> {
        lock_unpoisoned(&self.state).touch(key)
    }

    /// Inserts or replaces the pool for `key`; replaced and evicted pools are closed.
    pub fn insert(&self, key: PoolKey, pool: SharedPool) {
        let displaced = lock_unpoisoned(&self.state).insert(key, pool, self.capacity);
        self.close_all(displaced);
    }

    pub fn contains(&self, key: &PoolKey) -> bool {
        lock_unpoisoned(&self.state).entries.contains_key(key)
    }

    /// Removes and closes the pool for `key`. Returns whether one was present.
    pub fn remove(&self, key: &PoolKey) -> bool {
        let removed = lock_unpoisoned(&self.state).remove(key);
        match removed {
            Some(pool) => {
                self.close_all(vec![(key.clone(), pool)]);
                true
            }
            None => false,
        }
    }

    pub fn clear(&self) {
        let drained = lock_unpoisoned(&self.state).drain();
        self.close_all(drained);
    }

    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys from least to most recently used.
    pub fn keys(&self) -> Vec<PoolKey> {
        lock_unpoisoned(&self.state)
            .recency
            .values()
            .cloned()
            .collect()
    }

    fn close_all(&self, pools: Vec<(PoolKey, SharedPool)>) {
        for (key, pool) in pools {
            debug!(pool = %key, "closing connection pool");
            pool.close();
            self.metrics.record_pool_closed();
        }
    }
}

impl std::fmt::Debug for PoolCache {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("PoolCache")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

impl Default for PoolCache {
    fn default() -> Self {
        Self::new(DEFAULT_NUM_POOLS)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;

    use super::PoolCache;
    use crate::error::Error;
    use crate::key::{
        DefaultKeyNormalizer, KeyNormalizer, KeySchema, PoolKey, PoolKwargs, RequestContext,
    };
    use crate::pool::{ConnectionPool, PoolAddress, PoolRequest, Response};

    struct CountingPool {
        address: PoolAddress,
        closed: AtomicUsize,
    }

    impl CountingPool {
        fn new(host: &str) -> Arc<Self> {
            Arc::new(Self {
                address: PoolAddress::new("http", host, 80),
                closed: AtomicUsize::new(0),
            })
        }

        fn close_count(&self) -> usize {
            self.closed.load(Ordering::SeqCst)
        }
    }

    impl ConnectionPool for CountingPool {
        fn address(&self) -> &PoolAddress {
            &self.address
        }

        fn urlopen(&self, request: PoolRequest) -> crate::Result<Response> {
            Err(Error::Transport {
                method: request.method,
                url: request.url,
                source: "not connected".into(),
            })
        }

        fn close(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn key(host: &str) -> PoolKey {
        DefaultKeyNormalizer.normalize(
            &KeySchema::standard(),
            &RequestContext::new("http", host, 80, PoolKwargs::new()),
        )
    }

    fn insert(cache: &PoolCache, host: &str) -> Arc<CountingPool> {
        let pool = CountingPool::new(host);
        let shared: Arc<dyn ConnectionPool> = pool.clone();
        cache
            .get_or_create(&key(host), || Ok(shared))
            .expect("factory should succeed");
        pool
    }

    #[test]
    fn evicts_least_recently_used_pool_on_overflow() {
        let cache = PoolCache::new(2);
        let a = insert(&cache, "a");
        let b = insert(&cache, "b");
        let c = insert(&cache, "c");

        assert_eq!(a.close_count(), 1);
        assert_eq!(b.close_count(), 0);
        assert_eq!(c.close_count(), 0);
        assert!(!cache.contains(&key("a")));
        assert_eq!(cache.keys(), vec![key("b"), key("c")]);
    }

    #[test]
    fn hit_refreshes_recency() {
        let cache = PoolCache::new(2);
        let a = insert(&cache, "a");
        let b = insert(&cache, "b");
        cache
            .get_or_create(&key("a"), || panic!("hit must not call the factory"))
            .expect("hit should succeed");
        let _c = insert(&cache, "c");

        assert_eq!(a.close_count(), 0);
        assert_eq!(b.close_count(), 1);
        assert!(cache.contains(&key("a")));
    }

    #[test]
    fn failing_factory_leaves_no_entry() {
        let cache = PoolCache::new(2);
        let error = cache
            .get_or_create(&key("a"), || {
                Err(Error::PoolInit {
                    scheme: "http".to_owned(),
                    host: "a".to_owned(),
                    port: 80,
                    source: "boom".into(),
                })
            })
            .err()
            .expect("factory error should propagate");
        assert!(matches!(error, Error::PoolInit { .. }));
        assert!(cache.is_empty());
        assert!(!cache.contains(&key("a")));
    }

    #[test]
    fn concurrent_misses_build_one_pool() {
        let cache = Arc::new(PoolCache::new(4));
        let built = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(16));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let built = Arc::clone(&built);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache
                        .get_or_create(&key("shared"), || {
                            built.fetch_add(1, Ordering::SeqCst);
                            let pool: Arc<dyn ConnectionPool> = CountingPool::new("shared");
                            Ok(pool)
                        })
                        .expect("factory should succeed")
                })
            })
            .collect();
        let pools: Vec<_> = handles
            .into_iter()
            .map(|handle| handle.join().expect("worker should not panic"))
            .collect();

        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert!(pools.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
    }

    #[test]
    fn remove_and_clear_close_pools() {
        let cache = PoolCache::new(4);
        let a = insert(&cache, "a");
        let b = insert(&cache, "b");

        assert!(cache.remove(&key("a")));
        assert!(!cache.remove(&key("a")));
        assert_eq!(a.close_count(), 1);

        cache.clear();
        assert_eq!(b.close_count(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn insert_replacing_key_closes_previous_pool() {
        let cache = PoolCache::new(2);
        let first = insert(&cache, "a");
        cache.insert(key("a"), CountingPool::new("a"));

        assert_eq!(first.close_count(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let cache = PoolCache::new(0);
        assert_eq!(cache.capacity(), 1);
    }
}
