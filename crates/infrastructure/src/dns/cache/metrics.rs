use compact_str::CompactString;
use rustc_hash::FxHashSet;
use serde::Serialize;

/// Snapshot of cache usage counters.
///
/// `hit_mfa` short-circuits the LRU probe, so `miss_mfa` counts every access
/// that fell through to the LRU and `miss` counts accesses absent from both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheMetrics {
    pub hit_mfa: u64,
    pub miss_mfa: u64,
    pub hit_lru: u64,
    pub miss_lru: u64,
    pub miss: u64,
    /// Misses whose key sits in the recently-evicted ring. Zero unless the
    /// cache was built with evict-metrics enabled.
    pub recently_evicted_miss: u64,
}

impl CacheMetrics {
    pub fn hits(&self) -> u64 {
        self.hit_mfa + self.hit_lru
    }

    pub fn total(&self) -> u64 {
        self.hits() + self.miss
    }
}

/// Ring of the N most recently evicted keys with a set header for O(1)
/// membership checks. Enabling it roughly doubles the cache's memory.
struct EvictedRing {
    slots: Vec<CompactString>,
    pos: usize,
    header: FxHashSet<CompactString>,
    capacity: usize,
}

pub(crate) struct MetricsRecorder {
    counters: CacheMetrics,
    ring: Option<EvictedRing>,
}

impl MetricsRecorder {
    pub fn new(ring_size: usize, evict_metrics: bool) -> Self {
        let ring = evict_metrics.then(|| EvictedRing {
            slots: Vec::with_capacity(ring_size),
            pos: 0,
            header: FxHashSet::with_capacity_and_hasher(ring_size, Default::default()),
            capacity: ring_size,
        });
        Self {
            counters: CacheMetrics::default(),
            ring,
        }
    }

    pub fn snapshot(&self) -> CacheMetrics {
        self.counters
    }

    pub fn hit_mfa(&mut self) {
        self.counters.hit_mfa += 1;
    }

    pub fn miss_mfa(&mut self) {
        self.counters.miss_mfa += 1;
    }

    pub fn hit_lru(&mut self) {
        self.counters.hit_lru += 1;
    }

    pub fn miss_lru(&mut self) {
        self.counters.miss_lru += 1;
    }

    pub fn miss(&mut self, key: &str) {
        self.counters.miss += 1;
        if let Some(ring) = &self.ring {
            if ring.header.contains(key) {
                self.counters.recently_evicted_miss += 1;
            }
        }
    }

    pub fn evict(&mut self, key: &str) {
        let Some(ring) = &mut self.ring else {
            return;
        };
        if ring.capacity == 0 {
            return;
        }
        if ring.slots.len() < ring.capacity {
            ring.pos = ring.slots.len();
            ring.slots.push(CompactString::from(key));
            ring.header.insert(CompactString::from(key));
            return;
        }
        ring.pos = (ring.pos + 1) % ring.capacity;
        let displaced = std::mem::replace(&mut ring.slots[ring.pos], CompactString::from(key));
        ring.header.remove(&displaced);
        ring.header.insert(CompactString::from(key));
    }
}
