//! Bounded window of recently seen message fingerprints.

use std::collections::{HashSet, VecDeque};

use crate::types::message::Fingerprint;

pub const DEFAULT_CAPACITY: usize = 1000;

/// Insertion-ordered set with half-eviction. When the window exceeds its
/// capacity, the oldest half is dropped in one pass; eviction is monotonic in
/// insertion order but deliberately not strict LRU.
pub struct DedupWindow {
    seen: HashSet<Fingerprint>,
    order: VecDeque<Fingerprint>,
    capacity: usize,
}

impl Default for DedupWindow {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl DedupWindow {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            seen: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity: capacity.max(2),
        }
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.seen.contains(fingerprint)
    }

    /// Records a fingerprint. Returns false if it was already in the window
    /// (a replay); duplicates do not refresh their position.
    pub fn insert(&mut self, fingerprint: Fingerprint) -> bool {
        if !self.seen.insert(fingerprint.clone()) {
            return false;
        }
        self.order.push_back(fingerprint);
        if self.order.len() > self.capacity {
            self.evict_oldest_half();
        }
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn evict_oldest_half(&mut self) {
        let evict = self.order.len() / 2;
        for fingerprint in self.order.drain(..evict) {
            self.seen.remove(&fingerprint);
        }
    }
}
