//! Index-keyed object pool
//!
//! Released objects are parked under the index they occupied so that an
//! avatar returning to the same index gets its previous allocation back.
//! The pool is bounded; the oldest parked objects are dropped first.

use std::collections::VecDeque;

use rustc_hash::FxHashMap;

/// Lifecycle hooks for pooled objects
pub trait Poolable {
    type Params;

    /// Construct a brand new instance
    fn create(index: u16, params: &Self::Params) -> Self;

    /// Called on every allocation. Must return the object to a state
    /// indistinguishable from a freshly created one.
    fn on_alloc(&mut self, index: u16, params: &Self::Params, is_new_instance: bool);

    /// Called when the object is returned. Must drop held buffers; primitive
    /// fields may keep stale values.
    fn on_dealloc(&mut self);
}

/// Pool hit/miss counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct Parked<T> {
    object: Box<T>,
    sequence: u64,
}

pub struct ObjectPool<T: Poolable> {
    parked: FxHashMap<u16, Parked<T>>,
    /// Release order as (index, sequence); stale pairs are skipped on eviction
    order: VecDeque<(u16, u64)>,
    capacity: usize,
    sequence: u64,
    stats: PoolStats,
}

impl<T: Poolable> ObjectPool<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            parked: FxHashMap::default(),
            order: VecDeque::new(),
            capacity,
            sequence: 0,
            stats: PoolStats::default(),
        }
    }

    /// Take the object parked at `index`, or create one
    pub fn acquire(&mut self, index: u16, params: &T::Params) -> Box<T> {
        match self.parked.remove(&index) {
            Some(parked) => {
                self.stats.hits += 1;
                let mut object = parked.object;
                object.on_alloc(index, params, false);
                object
            }
            None => {
                self.stats.misses += 1;
                let mut object = Box::new(T::create(index, params));
                object.on_alloc(index, params, true);
                object
            }
        }
    }

    /// Park an object under `index`
    pub fn release(&mut self, index: u16, mut object: Box<T>) {
        object.on_dealloc();
        if self.capacity == 0 {
            self.stats.evictions += 1;
            return;
        }

        self.sequence += 1;
        self.parked.insert(
            index,
            Parked {
                object,
                sequence: self.sequence,
            },
        );
        self.order.push_back((index, self.sequence));

        while self.parked.len() > self.capacity {
            let Some((oldest, sequence)) = self.order.pop_front() else {
                break;
            };
            if self.parked.get(&oldest).is_some_and(|p| p.sequence == sequence) {
                self.parked.remove(&oldest);
                self.stats.evictions += 1;
            }
        }

        // Acquired entries leave stale pairs behind.
        if self.order.len() > self.capacity * 2 {
            let parked = &self.parked;
            self.order
                .retain(|(i, s)| parked.get(i).is_some_and(|p| p.sequence == *s));
        }
    }

    pub fn is_parked(&self, index: u16) -> bool {
        self.parked.contains_key(&index)
    }

    pub fn len(&self) -> usize {
        self.parked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parked.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
    }

    pub fn clear(&mut self) {
        self.parked.clear();
        self.order.clear();
    }
}
