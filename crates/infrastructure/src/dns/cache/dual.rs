use super::metrics::{CacheMetrics, MetricsRecorder};
use super::store::{Order, Store};
use parking_lot::Mutex;
use veil_dns_domain::DomainError;

/// Dual-store LRU+MFA cache.
///
/// New keys enter the recency store (LRU) and earn their way into the
/// frequency store (MFA) by surviving eviction with enough accesses. A
/// single mutex serializes both stores, the logical clock and the metrics:
/// every operation is O(log n) on small in-memory heaps, and one critical
/// section keeps the promotion/demotion protocol free of interleavings.
pub struct DualCache<V> {
    inner: Option<Mutex<Inner<V>>>,
    capacity: usize,
}

struct Inner<V> {
    lru: Store<V>,
    mfa: Store<V>,
    tick: u64,
    time_source: Option<Box<dyn FnMut() -> u64 + Send>>,
    metrics: MetricsRecorder,
}

impl<V> Inner<V>
where
    V: Clone,
{
    /// Logical clock: one tick per cache operation, or the installed time
    /// source when present. On overflow to zero both stores are rewritten
    /// so that ordering among surviving items is preserved.
    fn now(&mut self) -> u64 {
        if let Some(source) = &mut self.time_source {
            return source();
        }
        self.tick = self.tick.wrapping_add(1);
        if self.tick == 0 {
            let next = self.lru.reset(0);
            self.tick = self.mfa.reset(next);
        }
        self.tick
    }
}

impl<V> DualCache<V>
where
    V: Clone + Send,
{
    /// Creates a cache holding up to `capacity` items, split ⌊N/2⌋ LRU /
    /// ⌈N/2⌉ MFA. Capacity 0 builds a no-op cache (every get misses, every
    /// put is dropped); capacity 1 cannot satisfy the two-store split and is
    /// rejected, as are capacities that could collide with the logical
    /// clock's range.
    pub fn new(capacity: usize, evict_metrics: bool) -> Result<Self, DomainError> {
        if capacity == 0 {
            return Ok(Self {
                inner: None,
                capacity: 0,
            });
        }
        if capacity < 2 || capacity as u64 > u64::MAX >> 1 {
            return Err(DomainError::CacheCapacity(capacity));
        }
        let lru_cap = capacity / 2;
        let mfa_cap = capacity / 2 + capacity % 2;
        Ok(Self {
            inner: Some(Mutex::new(Inner {
                lru: Store::new(lru_cap, Order::ByTime),
                mfa: Store::new(mfa_cap, Order::ByAccesses),
                tick: 0,
                time_source: None,
                metrics: MetricsRecorder::new(capacity, evict_metrics),
            })),
            capacity,
        })
    }

    /// Replaces the built-in per-operation tick with an external monotonic
    /// clock. Installing one after the cache has been used leads to
    /// undefined ordering among existing items.
    pub fn set_time_source(&self, source: Box<dyn FnMut() -> u64 + Send>) {
        if let Some(inner) = &self.inner {
            inner.lock().time_source = Some(source);
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let inner = self.inner.as_ref()?;
        let mut g = inner.lock();
        let now = g.now();
        if let Some(v) = g.mfa.get(now, key) {
            g.metrics.hit_mfa();
            return Some(v);
        }
        g.metrics.miss_mfa();
        if let Some(v) = g.lru.get(now, key) {
            g.metrics.hit_lru();
            return Some(v);
        }
        g.metrics.miss_lru();
        g.metrics.miss(key);
        None
    }

    pub fn put(&self, key: &str, value: V) {
        let Some(inner) = &self.inner else {
            return;
        };
        let mut g = inner.lock();
        let now = g.now();

        if g.mfa.update(now, key, value.clone()) {
            return;
        }
        if g.lru.update(now, key, value.clone()) {
            return;
        }

        // Not cached yet: new items always start life in the LRU.
        let Some(evicted) = g.lru.put(now, key, value, 1) else {
            return;
        };

        // The LRU popped an item to make room. Promote it when the MFA has
        // space.
        if g.mfa.len() < g.mfa.capacity() {
            g.mfa.put(now, &evicted.key, evicted.value, evicted.a);
            return;
        }

        // MFA full: keep the evicted item only if it beats the MFA minimum.
        // Ties bounce, so a steady stream of one-hit keys cannot thrash the
        // frequency store.
        let dominated = match g.mfa.peek() {
            Some(min) => min.a > evicted.a || (min.a == evicted.a && min.t < evicted.t),
            None => false,
        };
        if dominated {
            g.metrics.evict(&evicted.key);
            return;
        }

        let Some(displaced) = g.mfa.put(now, &evicted.key, evicted.value, evicted.a) else {
            return;
        };

        // The item displaced from the MFA was hot once; demote it back to
        // the LRU with a fresh access count if it still beats the LRU
        // minimum, otherwise drop it.
        let deserves_lru = match g.lru.peek() {
            Some(min) => min.a < displaced.a,
            None => false,
        };
        if !deserves_lru {
            g.metrics.evict(&displaced.key);
            return;
        }
        if let Some(second) = g.lru.put(now, &displaced.key, displaced.value, 1) {
            g.metrics.evict(&second.key);
        }
    }

    pub fn len(&self) -> usize {
        match &self.inner {
            Some(inner) => {
                let g = inner.lock();
                g.lru.len() + g.mfa.len()
            }
            None => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn cap(&self) -> usize {
        self.capacity
    }

    pub fn metrics(&self) -> CacheMetrics {
        match &self.inner {
            Some(inner) => inner.lock().metrics.snapshot(),
            None => CacheMetrics::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_put_is_immediately_gettable() {
        let cache: DualCache<u32> = DualCache::new(4, false).unwrap();
        cache.put("k", 7);
        assert_eq!(cache.get("k"), Some(7));
    }

    #[test]
    fn test_capacity_one_is_rejected() {
        assert!(matches!(
            DualCache::<u32>::new(1, false),
            Err(DomainError::CacheCapacity(1))
        ));
    }

    #[test]
    fn test_zero_capacity_is_a_noop_cache() {
        let cache: DualCache<u32> = DualCache::new(0, false).unwrap();
        cache.put("k", 7);
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.cap(), 0);
        assert_eq!(cache.metrics(), CacheMetrics::default());
    }

    #[test]
    fn test_capacity_split_between_stores() {
        let cache: DualCache<u32> = DualCache::new(5, false).unwrap();
        let g = cache.inner.as_ref().unwrap().lock();
        assert_eq!(g.lru.capacity(), 2);
        assert_eq!(g.mfa.capacity(), 3);
    }

    #[test]
    fn test_update_in_place_does_not_evict() {
        let cache: DualCache<u32> = DualCache::new(2, false).unwrap();
        cache.put("a", 1);
        cache.put("a", 2);
        cache.put("a", 3);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("a"), Some(3));
    }

    #[test]
    fn test_promoted_key_survives_lru_churn() {
        let cache: DualCache<u32> = DualCache::new(4, false).unwrap();
        cache.put("hot", 1);
        for _ in 0..4 {
            cache.get("hot");
        }
        // Churn far more distinct keys through the LRU than it can hold.
        for i in 0..16u32 {
            cache.put(&format!("churn{i}"), i);
        }
        assert_eq!(cache.get("hot"), Some(1), "frequently accessed key was lost");
    }

    #[test]
    fn test_metric_identity_over_mixed_traffic() {
        let cache: DualCache<u32> = DualCache::new(4, false).unwrap();
        for i in 0..8u32 {
            cache.put(&format!("k{i}"), i);
        }
        let mut gets = 0u64;
        for i in 0..12u32 {
            cache.get(&format!("k{i}"));
            gets += 1;
        }
        let m = cache.metrics();
        assert_eq!(m.hit_mfa + m.hit_lru + m.miss, gets);
        assert_eq!(m.total(), gets);
    }

    #[test]
    fn test_clock_wraparound_preserves_contents() {
        let cache: DualCache<u32> = DualCache::new(6, false).unwrap();
        cache.put("a", 1);
        cache.put("b", 2);
        cache.get("a");
        {
            let mut g = cache.inner.as_ref().unwrap().lock();
            g.tick = u64::MAX - 1;
        }
        cache.put("c", 3); // ticks to u64::MAX
        cache.put("d", 4); // wraps, triggering the reset path
        for (key, want) in [("a", 1), ("b", 2), ("c", 3), ("d", 4)] {
            assert_eq!(cache.get(key), Some(want), "lost {key} across wraparound");
        }
    }

    #[test]
    fn test_installed_time_source_is_used() {
        let cache: DualCache<u32> = DualCache::new(4, false).unwrap();
        cache.set_time_source(Box::new(|| 42));
        cache.put("a", 1);
        cache.put("b", 2);
        assert_eq!(cache.get("a"), Some(1));
        let g = cache.inner.as_ref().unwrap().lock();
        assert_eq!(g.tick, 0, "internal tick must stay untouched");
    }
}
