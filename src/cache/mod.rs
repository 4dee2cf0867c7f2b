//! Stock cache.
//!
//! A derived, possibly-stale view of `available_stock` for the read path.
//! Never consulted by the reservation decision, which always reads under
//! the product row lock. Invalidated after every authoritative write.
//!
//! Concurrent misses for the same product collapse through
//! [`StockCache::with_singleflight`]: the loader runs at most once while
//! other callers wait on a short-lived per-key lock, bounded at
//! [`SINGLEFLIGHT_WAIT`].

use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Upper bound on waiting for another caller's in-flight load.
pub const SINGLEFLIGHT_WAIT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy)]
struct Entry {
    stock: i32,
    stored_at: Instant,
}

pub struct StockCache {
    entries: DashMap<Uuid, Entry>,
    flights: DashMap<Uuid, Arc<Mutex<()>>>,
    ttl: Duration,
}

impl StockCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            flights: DashMap::new(),
            ttl,
        }
    }

    /// Fresh cached value, or None on miss/expiry.
    pub fn get(&self, product_id: Uuid) -> Option<i32> {
        let entry = self.entries.get(&product_id)?;
        if entry.stored_at.elapsed() < self.ttl {
            Some(entry.stock)
        } else {
            None
        }
    }

    pub fn put(&self, product_id: Uuid, stock: i32) {
        self.entries.insert(
            product_id,
            Entry {
                stock,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, product_id: Uuid) {
        self.entries.remove(&product_id);
    }

    /// Read through the cache, collapsing concurrent misses for the same
    /// key so `loader` runs at most once. A caller that waits longer than
    /// [`SINGLEFLIGHT_WAIT`] for the in-flight load falls through and runs
    /// the loader itself.
    pub async fn with_singleflight<F, Fut, E>(
        &self,
        product_id: Uuid,
        loader: F,
    ) -> Result<Option<i32>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<i32>, E>>,
    {
        if let Some(stock) = self.get(product_id) {
            return Ok(Some(stock));
        }

        let flight = self
            .flights
            .entry(product_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        match tokio::time::timeout(SINGLEFLIGHT_WAIT, flight.lock()).await {
            Ok(_guard) => {
                // The previous flight may have populated the entry.
                if let Some(stock) = self.get(product_id) {
                    return Ok(Some(stock));
                }

                let loaded = loader().await?;
                if let Some(stock) = loaded {
                    self.put(product_id, stock);
                }
                self.flights.remove(&product_id);
                Ok(loaded)
            }
            // Bounded wait exceeded; no operation spins on the cache.
            Err(_elapsed) => {
                let loaded = loader().await?;
                if let Some(stock) = loaded {
                    self.put(product_id, stock);
                }
                Ok(loaded)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn get_put_invalidate() {
        let cache = StockCache::new(Duration::from_secs(30));
        let id = Uuid::new_v4();

        assert_eq!(cache.get(id), None);
        cache.put(id, 7);
        assert_eq!(cache.get(id), Some(7));
        cache.invalidate(id);
        assert_eq!(cache.get(id), None);
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let cache = StockCache::new(Duration::from_millis(20));
        let id = Uuid::new_v4();

        cache.put(id, 3);
        assert_eq!(cache.get(id), Some(3));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get(id), None);
    }

    #[tokio::test]
    async fn singleflight_collapses_concurrent_misses() {
        let cache = Arc::new(StockCache::new(Duration::from_secs(30)));
        let id = Uuid::new_v4();
        let loads = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let loads = loads.clone();
            tasks.push(tokio::spawn(async move {
                cache
                    .with_singleflight(id, || {
                        let loads = loads.clone();
                        async move {
                            loads.fetch_add(1, Ordering::SeqCst);
                            // Hold the flight long enough for all callers to pile up.
                            tokio::time::sleep(Duration::from_millis(10)).await;
                            Ok::<_, std::convert::Infallible>(Some(5))
                        }
                    })
                    .await
            }));
        }

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), Some(5));
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn singleflight_passes_through_missing_products() {
        let cache = StockCache::new(Duration::from_secs(30));
        let id = Uuid::new_v4();

        let loaded = cache
            .with_singleflight(id, || async { Ok::<_, std::convert::Infallible>(None) })
            .await
            .unwrap();
        assert_eq!(loaded, None);
        assert_eq!(cache.get(id), None);
    }

    #[tokio::test]
    async fn loader_errors_propagate() {
        let cache = StockCache::new(Duration::from_secs(30));
        let id = Uuid::new_v4();

        let result: Result<Option<i32>, &str> = cache
            .with_singleflight(id, || async { Err("store down") })
            .await;
        assert_eq!(result.unwrap_err(), "store down");
    }
}
