use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolManagerMetricsSnapshot {
    pub requests: u64,
    pub pool_hits: u64,
    pub pools_created: u64,
    pub pools_closed: u64,
    pub redirects_followed: u64,
    pub retries_exhausted: u64,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct PoolManagerMetrics {
    inner: Arc<PoolManagerMetricsInner>,
}

#[derive(Debug, Default)]
struct PoolManagerMetricsInner {
    requests: AtomicU64,
    pool_hits: AtomicU64,
    pools_created: AtomicU64,
    pools_closed: AtomicU64,
    redirects_followed: AtomicU64,
    retries_exhausted: AtomicU64,
}

impl PoolManagerMetrics {
    pub(crate) fn record_request(&self) {
        self.inner.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_pool_hit(&self) {
        self.inner.pool_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_pool_created(&self) {
        self.inner.pools_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_pool_closed(&self) {
        self.inner.pools_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_redirect(&self) {
        self.inner.redirects_followed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retries_exhausted(&self) {
        self.inner.retries_exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> PoolManagerMetricsSnapshot {
        PoolManagerMetricsSnapshot {
            requests: self.inner.requests.load(Ordering::Relaxed),
            pool_hits: self.inner.pool_hits.load(Ordering::Relaxed),
            pools_created: self.inner.pools_created.load(Ordering::Relaxed),
            pools_closed: self.inner.pools_closed.load(Ordering::Relaxed),
            redirects_followed: self.inner.redirects_followed.load(Ordering::Relaxed),
            retries_exhausted: self.inner.retries_exhausted.load(Ordering::Relaxed),
        }
    }
}
