//! Hidden-state cache (§4.11): an LRU-ish block cache keyed by FST state id,
//! holding one neural hidden-state vector per state so expansion can reuse
//! a parent's RNN state instead of replaying its whole history.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

struct Entry {
    data: Arc<Vec<f32>>,
    refcount: u32,
}

struct Inner {
    entries: HashMap<u32, Entry>,
    /// Least-recently-touched first.
    lru: VecDeque<u32>,
}

pub struct HiddenStateCache {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl HiddenStateCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner { entries: HashMap::new(), lru: VecDeque::new() }),
            capacity: capacity.max(1),
        }
    }

    fn touch(inner: &mut Inner, state: u32) {
        inner.lru.retain(|&s| s != state);
        inner.lru.push_back(state);
    }

    /// Returns a state's cached hidden vector, incrementing its reference
    /// count ("fetch returns a fresh block"). `None` if not cached.
    pub fn fetch(&self, state: u32) -> Option<Arc<Vec<f32>>> {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.get_mut(&state) {
            entry.refcount += 1;
            let data = entry.data.clone();
            Self::touch(&mut inner, state);
            Some(data)
        } else {
            None
        }
    }

    /// Inserts a freshly computed hidden vector with an initial reference
    /// held by the caller (mirrors the one implicit in a `fetch`).
    pub fn insert(&self, state: u32, data: Vec<f32>) -> Arc<Vec<f32>> {
        let arc = Arc::new(data);
        let mut inner = self.inner.lock();
        inner.entries.insert(state, Entry { data: arc.clone(), refcount: 1 });
        Self::touch(&mut inner, state);
        self.evict_unreferenced(&mut inner);
        arc
    }

    /// Takes an additional reference to an already-cached state.
    pub fn hold(&self, state: u32) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.get_mut(&state) {
            entry.refcount += 1;
        }
    }

    /// Releases one reference; the entry becomes evictable once the count
    /// reaches zero.
    pub fn release(&self, state: u32) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.get_mut(&state) {
            entry.refcount = entry.refcount.saturating_sub(1);
        }
        self.evict_unreferenced(&mut inner);
    }

    fn evict_unreferenced(&self, inner: &mut Inner) {
        if inner.entries.len() <= self.capacity {
            return;
        }
        let candidates: Vec<u32> = inner.lru.iter().copied().collect();
        for state in candidates {
            if inner.entries.len() <= self.capacity {
                break;
            }
            if inner.entries.get(&state).map(|e| e.refcount == 0).unwrap_or(false) {
                inner.entries.remove(&state);
                inner.lru.retain(|&s| s != state);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_after_insert_returns_same_data() {
        let cache = HiddenStateCache::new(4);
        cache.insert(0, vec![1.0, 2.0]);
        let got = cache.fetch(0).unwrap();
        assert_eq!(*got, vec![1.0, 2.0]);
    }

    #[test]
    fn referenced_entries_survive_eviction_pressure() {
        let cache = HiddenStateCache::new(2);
        cache.insert(0, vec![0.0]);
        let _held = cache.fetch(0); // refcount 2 now
        cache.insert(1, vec![1.0]);
        cache.insert(2, vec![2.0]);
        cache.insert(3, vec![3.0]);
        assert!(cache.fetch(0).is_some(), "referenced entry should not be evicted");
    }

    #[test]
    fn unreferenced_entry_is_evictable_after_release() {
        let cache = HiddenStateCache::new(1);
        cache.insert(0, vec![0.0]);
        cache.release(0); // refcount back to 0
        cache.insert(1, vec![1.0]);
        assert!(cache.fetch(0).is_none());
    }
}
