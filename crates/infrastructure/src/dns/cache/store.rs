use compact_str::CompactString;
use rustc_hash::FxHashMap;

/// One entry of a [`Store`].
#[derive(Debug, Clone)]
pub(crate) struct Item<V> {
    pub key: CompactString,
    pub value: V,
    /// Logical time of the last access, assigned by the owning cache.
    pub t: u64,
    /// Number of accesses since insertion.
    pub a: u64,
}

/// How two items compare: by recency (LRU) or by access count (MFA).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Order {
    ByTime,
    ByAccesses,
}

/// Fixed-capacity keyed priority queue: a binary min-heap over [`Item`]s
/// with a key → heap-position map kept in sync on every swap, push and pop.
/// The minimum is the next eviction candidate under the store's ordering.
pub(crate) struct Store<V> {
    heap: Vec<Item<V>>,
    index: FxHashMap<CompactString, usize>,
    order: Order,
    capacity: usize,
}

impl<V: Clone> Store<V> {
    pub fn new(capacity: usize, order: Order) -> Self {
        Self {
            heap: Vec::with_capacity(capacity),
            index: FxHashMap::with_capacity_and_hasher(capacity, Default::default()),
            order,
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Retrieves and touches an item: `t ← now`, `a ← a + 1`. O(log n).
    pub fn get(&mut self, now: u64, key: &str) -> Option<V> {
        let i = *self.index.get(key)?;
        let value = self.heap[i].value.clone();
        self.touch(i, now, 1);
        Some(value)
    }

    /// Inserts or updates an item. O(log n).
    ///
    /// When the key is already present its value is replaced and it is
    /// touched with `a += start_count`. When the store is full, a candidate
    /// strictly smaller than the current minimum is bounced: returned as the
    /// "evicted" item without ever being inserted. Otherwise the minimum is
    /// popped and returned to make room.
    pub fn put(
        &mut self,
        now: u64,
        key: &str,
        value: V,
        start_count: u64,
    ) -> Option<Item<V>> {
        if let Some(&i) = self.index.get(key) {
            self.heap[i].value = value;
            self.touch(i, now, start_count);
            return None;
        }
        let item = Item {
            key: CompactString::from(key),
            value,
            t: now,
            a: start_count,
        };
        let mut evicted = None;
        if self.heap.len() >= self.capacity {
            match self.heap.first() {
                Some(min) if self.is_less(&item, min) => return Some(item),
                Some(_) => evicted = Some(self.pop_min()),
                None => return Some(item),
            }
        }
        self.push(item);
        evicted
    }

    /// Touch-and-update only if present; never inserts.
    pub fn update(&mut self, now: u64, key: &str, value: V) -> bool {
        let Some(&i) = self.index.get(key) else {
            return false;
        };
        self.heap[i].value = value;
        self.touch(i, now, 1);
        true
    }

    /// The current minimum under the store's ordering.
    pub fn peek(&self) -> Option<&Item<V>> {
        self.heap.first()
    }

    /// Prepares the store for a logical-clock wraparound.
    ///
    /// The LRU ordering is time-dominant, so its items are rewritten with
    /// dense strictly-increasing times in popped order (O(n log n)); the
    /// popped sequence is ascending, so the rebuilt vector is already a
    /// valid min-heap. The MFA ordering is access-dominant, so it just
    /// zeroes all times and lets the resuming counter refresh them lazily.
    pub fn reset(&mut self, start: u64) -> u64 {
        match self.order {
            Order::ByAccesses => {
                for item in &mut self.heap {
                    item.t = 0;
                }
                start
            }
            Order::ByTime => {
                let mut items = Vec::with_capacity(self.heap.len());
                let mut next = start;
                while !self.heap.is_empty() {
                    let mut item = self.pop_min();
                    item.t = next;
                    next += 1;
                    items.push(item);
                }
                for (i, item) in items.iter().enumerate() {
                    self.index.insert(item.key.clone(), i);
                }
                self.heap = items;
                next
            }
        }
    }

    fn is_less(&self, a: &Item<V>, b: &Item<V>) -> bool {
        match self.order {
            Order::ByTime => {
                if a.t != b.t {
                    a.t < b.t
                } else {
                    a.a < b.a
                }
            }
            Order::ByAccesses => {
                if a.a != b.a {
                    a.a < b.a
                } else {
                    a.t < b.t
                }
            }
        }
    }

    fn less_at(&self, i: usize, j: usize) -> bool {
        self.is_less(&self.heap[i], &self.heap[j])
    }

    fn touch(&mut self, i: usize, now: u64, add: u64) {
        self.heap[i].a += add;
        self.heap[i].t = now;
        self.fix(i);
    }

    fn fix(&mut self, i: usize) {
        if !self.sift_down(i) {
            self.sift_up(i);
        }
    }

    fn push(&mut self, item: Item<V>) {
        let i = self.heap.len();
        self.index.insert(item.key.clone(), i);
        self.heap.push(item);
        self.sift_up(i);
    }

    fn pop_min(&mut self) -> Item<V> {
        let last = self.heap.len() - 1;
        self.swap_items(0, last);
        let item = self.heap.pop().expect("pop_min on empty store");
        self.index.remove(&item.key);
        if !self.heap.is_empty() {
            self.sift_down(0);
        }
        item
    }

    fn swap_items(&mut self, i: usize, j: usize) {
        if i == j {
            return;
        }
        self.heap.swap(i, j);
        let ki = self.heap[i].key.clone();
        let kj = self.heap[j].key.clone();
        self.index.insert(ki, i);
        self.index.insert(kj, j);
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if !self.less_at(i, parent) {
                break;
            }
            self.swap_items(i, parent);
            i = parent;
        }
    }

    /// Returns whether the item moved, so `fix` can mirror `heap.Fix`:
    /// sift down first, and only sift up when nothing moved down.
    fn sift_down(&mut self, mut i: usize) -> bool {
        let start = i;
        let n = self.heap.len();
        loop {
            let left = 2 * i + 1;
            if left >= n {
                break;
            }
            let mut child = left;
            let right = left + 1;
            if right < n && self.less_at(right, left) {
                child = right;
            }
            if !self.less_at(child, i) {
                break;
            }
            self.swap_items(child, i);
            i = child;
        }
        i != start
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain<V: Clone>(store: &mut Store<V>) -> Vec<(CompactString, u64, u64)> {
        let mut order = Vec::with_capacity(store.len());
        while store.len() > 0 {
            let item = store.pop_min();
            order.push((item.key, item.t, item.a));
        }
        order
    }

    fn assert_index_in_sync<V: Clone>(store: &Store<V>) {
        assert_eq!(store.index.len(), store.heap.len());
        for (key, &i) in &store.index {
            assert_eq!(&store.heap[i].key, key, "index points at wrong slot");
        }
    }

    #[test]
    fn test_len_never_exceeds_capacity() {
        let mut store: Store<u32> = Store::new(4, Order::ByTime);
        for i in 0..20u64 {
            store.put(i, &format!("k{i}"), i as u32, 1);
            assert!(store.len() <= store.capacity());
            assert_index_in_sync(&store);
        }
    }

    #[test]
    fn test_get_returns_last_put_value() {
        let mut store: Store<u32> = Store::new(4, Order::ByTime);
        store.put(1, "a", 1, 1);
        store.put(2, "a", 2, 1);
        assert_eq!(store.get(3, "a"), Some(2));
    }

    #[test]
    fn test_get_touches_time_and_accesses() {
        let mut store: Store<u32> = Store::new(2, Order::ByTime);
        store.put(1, "a", 10, 1);
        store.put(2, "b", 20, 1);
        assert_eq!(store.get(3, "a"), Some(10));
        // "a" is now the newer item; "b" must be the eviction candidate.
        assert_eq!(store.peek().map(|i| i.key.as_str()), Some("b"));
        let a = &store.heap[*store.index.get("a").unwrap()];
        assert_eq!((a.t, a.a), (3, 2));
    }

    #[test]
    fn test_full_store_pops_minimum() {
        let mut store: Store<u32> = Store::new(2, Order::ByTime);
        store.put(1, "a", 1, 1);
        store.put(2, "b", 2, 1);
        let evicted = store.put(3, "c", 3, 1).expect("full store must evict");
        assert_eq!(evicted.key.as_str(), "a");
        assert_eq!(store.len(), 2);
        assert!(store.get(4, "c").is_some());
    }

    #[test]
    fn test_bounce_keeps_store_unchanged() {
        let mut store: Store<u32> = Store::new(2, Order::ByAccesses);
        store.put(1, "a", 1, 5);
        store.put(2, "b", 2, 5);
        // Candidate with fewer accesses than the minimum bounces back.
        let bounced = store.put(3, "c", 3, 1).expect("candidate must bounce");
        assert_eq!(bounced.key.as_str(), "c");
        assert_eq!(bounced.a, 1);
        assert!(store.index.get("c").is_none());
        assert_eq!(store.len(), 2);
        assert_index_in_sync(&store);
    }

    #[test]
    fn test_update_never_inserts() {
        let mut store: Store<u32> = Store::new(2, Order::ByTime);
        assert!(!store.update(1, "a", 1));
        assert_eq!(store.len(), 0);
        store.put(2, "a", 1, 1);
        assert!(store.update(3, "a", 9));
        assert_eq!(store.get(4, "a"), Some(9));
    }

    #[test]
    fn test_less_is_antisymmetric_for_distinct_items() {
        for order in [Order::ByTime, Order::ByAccesses] {
            let store: Store<u32> = Store::new(1, order);
            let items = [
                Item { key: "a".into(), value: 0u32, t: 1, a: 1 },
                Item { key: "b".into(), value: 0u32, t: 1, a: 2 },
                Item { key: "c".into(), value: 0u32, t: 2, a: 1 },
                Item { key: "d".into(), value: 0u32, t: 2, a: 2 },
            ];
            for x in &items {
                for y in &items {
                    if x.t == y.t && x.a == y.a {
                        continue;
                    }
                    assert_ne!(
                        store.is_less(x, y),
                        store.is_less(y, x),
                        "ordering must be antisymmetric ({order:?})"
                    );
                }
            }
        }
    }

    #[test]
    fn test_mfa_ordering_prefers_accesses_over_time() {
        let mut store: Store<u32> = Store::new(3, Order::ByAccesses);
        store.put(1, "cold", 0, 1);
        store.put(2, "warm", 0, 3);
        store.put(3, "hot", 0, 7);
        let keys: Vec<_> = drain(&mut store).into_iter().map(|(k, _, _)| k).collect();
        assert_eq!(keys, ["cold", "warm", "hot"]);
    }

    #[test]
    fn test_lru_reset_preserves_pop_order() {
        let mut store: Store<u32> = Store::new(8, Order::ByTime);
        // Interleave inserts and touches so times and counts are uneven.
        for (i, key) in ["a", "b", "c", "d", "e"].iter().enumerate() {
            store.put(100 + i as u64, key, 0, 1);
        }
        store.get(200, "b");
        store.get(201, "a");

        let mut before = Store::new(8, Order::ByTime);
        before.heap = store.heap.clone();
        before.index = store.index.clone();
        let expected: Vec<_> = drain(&mut before).into_iter().map(|(k, _, _)| k).collect();

        let next = store.reset(0);
        assert_eq!(next, 5);
        assert_index_in_sync(&store);
        let after = drain(&mut store);
        let keys: Vec<_> = after.iter().map(|(k, _, _)| k.clone()).collect();
        assert_eq!(keys, expected, "reset must not reorder the LRU");
        // Times are rewritten dense and strictly increasing from `start`.
        let times: Vec<_> = after.iter().map(|(_, t, _)| *t).collect();
        assert_eq!(times, (0..5).collect::<Vec<u64>>());
    }

    #[test]
    fn test_mfa_reset_zeroes_times_only() {
        let mut store: Store<u32> = Store::new(4, Order::ByAccesses);
        store.put(10, "a", 0, 2);
        store.put(11, "b", 0, 5);
        let next = store.reset(7);
        assert_eq!(next, 7);
        assert!(store.heap.iter().all(|item| item.t == 0));
        assert_eq!(store.get(12, "b"), Some(0));
    }
}
