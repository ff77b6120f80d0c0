//! Decision cache
//!
//! Bounded LRU over the transport-encoded request fingerprint. The cache is
//! advisory: ban-state changes never invalidate entries, and response-phase
//! traffic bypasses it entirely.

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use std::num::NonZeroUsize;

use crate::models::{Decision, Descriptor};

/// Cache key: the six transport-encoded fields of a request descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub ip: String,
    pub method: String,
    pub header: String,
    pub user_agent: String,
    pub path: String,
    pub body: String,
}

impl Fingerprint {
    pub fn of(descriptor: &Descriptor) -> Self {
        Self {
            ip: descriptor.ip.clone(),
            method: descriptor.method.clone(),
            header: descriptor.header.clone(),
            user_agent: descriptor.user_agent.clone(),
            path: descriptor.path.clone(),
            body: descriptor.body.clone(),
        }
    }
}

/// Counters reported by `/cache/stats`.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub maxsize: usize,
    pub hit_rate_percent: f64,
}

struct State {
    map: LruCache<Fingerprint, Decision>,
    hits: u64,
    misses: u64,
}

/// Concurrent LRU of memoised pipeline decisions.
pub struct DecisionCache {
    inner: Mutex<State>,
}

impl DecisionCache {
    pub fn new(maxsize: usize) -> Self {
        let capacity = NonZeroUsize::new(maxsize).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(State {
                map: LruCache::new(capacity),
                hits: 0,
                misses: 0,
            }),
        }
    }

    /// Look up a memoised decision, counting the hit or miss.
    pub fn get(&self, key: &Fingerprint) -> Option<Decision> {
        let mut state = self.inner.lock();
        match state.map.get(key).cloned() {
            Some(decision) => {
                state.hits += 1;
                Some(decision)
            }
            None => {
                state.misses += 1;
                None
            }
        }
    }

    /// Memoise a decision, evicting the least-recently-used entry at capacity.
    pub fn insert(&self, key: Fingerprint, decision: Decision) {
        self.inner.lock().map.put(key, decision);
    }

    /// Drop all entries and reset the counters. Returns how many entries
    /// were evicted.
    pub fn clear(&self) -> usize {
        let mut state = self.inner.lock();
        let evicted = state.map.len();
        state.map.clear();
        state.hits = 0;
        state.misses = 0;
        evicted
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.inner.lock();
        let total = state.hits + state.misses;
        let hit_rate = if total > 0 {
            (state.hits as f64 / total as f64 * 10_000.0).round() / 100.0
        } else {
            0.0
        };
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            size: state.map.len(),
            maxsize: state.map.cap().get(),
            hit_rate_percent: hit_rate,
        }
    }
}
