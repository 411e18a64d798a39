//! Bounded in-memory chunk cache
//!
//! Maps hex index identifiers to plaintext bytes with FIFO eviction. The
//! bound is small enough that a coarse mutex around map and queue is all
//! the coordination needed.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use tidevault_core::IndexId;

/// Default cache capacity in entries
pub const DEFAULT_CACHE_CAPACITY: usize = 100;

struct CacheInner {
    map: HashMap<String, Bytes>,
    order: VecDeque<String>,
}

/// FIFO-bounded chunk cache
pub struct ChunkCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
}

impl ChunkCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
            capacity: capacity.max(1),
        }
    }

    pub fn get(&self, id: &IndexId) -> Option<Bytes> {
        self.inner.lock().map.get(&id.to_hex()).cloned()
    }

    pub fn insert(&self, id: &IndexId, bytes: Bytes) {
        let key = id.to_hex();
        let mut inner = self.inner.lock();
        if inner.map.insert(key.clone(), bytes).is_none() {
            inner.order.push_back(key);
            while inner.order.len() > self.capacity {
                if let Some(evicted) = inner.order.pop_front() {
                    inner.map.remove(&evicted);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ChunkCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}
