use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

/// In-memory fast tier: LRU over both an entry count and a total byte cost
pub struct MemoryTier {
    inner: Mutex<Inner>,
}

struct Inner {
    entries: LruCache<String, Bytes>,
    cost: usize,
    max_cost: usize,
}

impl MemoryTier {
    pub fn new(max_entries: usize, max_cost: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                cost: 0,
                max_cost,
            }),
        }
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.inner.lock().entries.get(key).cloned()
    }

    /// Insert, evicting least-recently-used entries until both limits hold.
    ///
    /// An entry costlier than the whole budget is not kept; any older value
    /// under the same key is dropped so the tier never serves stale bytes.
    pub fn insert(&self, key: String, data: Bytes) {
        let mut inner = self.inner.lock();

        if data.len() > inner.max_cost {
            if let Some(old) = inner.entries.pop(&key) {
                inner.cost -= old.len();
            }
            return;
        }

        inner.cost += data.len();
        // Returns either the replaced value for `key` or the evicted LRU entry
        if let Some((_, old)) = inner.entries.push(key, data) {
            inner.cost -= old.len();
        }
        while inner.cost > inner.max_cost {
            match inner.entries.pop_lru() {
                Some((_, old)) => inner.cost -= old.len(),
                None => break,
            }
        }
    }

    pub fn remove(&self, key: &str) {
        let mut inner = self.inner.lock();
        if let Some(old) = inner.entries.pop(key) {
            inner.cost -= old.len();
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.cost = 0;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total byte cost currently held
    pub fn cost(&self) -> usize {
        self.inner.lock().cost
    }
}
