use std::collections::{HashSet, VecDeque};

/// Bounded set of already-seen event ids.
///
/// Overflow evicts the oldest tenth of the entries at once; precision of
/// the eviction order is traded for fewer housekeeping passes.
#[derive(Clone, Debug)]
pub struct SeenSet {
    capacity: usize,
    order: VecDeque<String>,
    index: HashSet<String>,
}

impl SeenSet {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { capacity, order: VecDeque::with_capacity(capacity), index: HashSet::new() }
    }

    /// Returns `false` if the id was already present.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.index.contains(id) {
            return false;
        }

        self.index.insert(id.to_string());
        self.order.push_back(id.to_string());
        if self.order.len() > self.capacity {
            self.evict(eviction_batch(self.capacity));
        }
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn evict(&mut self, count: usize) {
        for id in self.order.drain(..count.min(self.order.len())) {
            self.index.remove(&id);
        }
    }
}

pub(crate) fn eviction_batch(capacity: usize) -> usize {
    (capacity / 10).max(1)
}
