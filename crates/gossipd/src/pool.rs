//! Fixed-capacity pool of buffered events
//!
//! Events stay in the pool until they have been spread often enough, not
//! for a fixed time. Every transmission of an event goes through one of the
//! drain iterators, which bump the event's spread count; the view iterator
//! reads without counting.

use crate::config::OverflowPolicy;
use std::cmp::Ordering;
use tracing::warn;

/// One reusable slot of an [`EventPool`]
#[derive(Debug, Clone)]
pub struct BufferedEvent<T> {
    payload: T,
    spread_count: u32,
    is_set: bool,
}

impl<T> BufferedEvent<T> {
    fn new(payload: T) -> Self {
        Self {
            payload,
            spread_count: 0,
            is_set: true,
        }
    }

    fn reset(&mut self, payload: T) {
        self.payload = payload;
        self.spread_count = 0;
        self.is_set = true;
    }

    pub fn payload(&self) -> &T {
        &self.payload
    }

    pub fn spread_count(&self) -> u32 {
        self.spread_count
    }

    pub fn is_set(&self) -> bool {
        self.is_set
    }
}

/// Unset slots sort last; set slots by ascending spread count.
pub fn compare_by_spread_count<T>(a: &BufferedEvent<T>, b: &BufferedEvent<T>) -> Ordering {
    match (a.is_set, b.is_set) {
        (true, true) => a.spread_count.cmp(&b.spread_count),
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => Ordering::Equal,
    }
}

/// Pool statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub size: usize,
    pub capacity: usize,
    /// Adds that found no free slot
    pub overflows: u64,
}

/// Fixed-capacity arena of buffered events
pub struct EventPool<T> {
    name: &'static str,
    slots: Vec<BufferedEvent<T>>,
    capacity: usize,
    overflow_policy: OverflowPolicy,
    overflows: u64,
}

impl<T> EventPool<T> {
    pub fn new(name: &'static str, capacity: usize, overflow_policy: OverflowPolicy) -> Self {
        Self {
            name,
            slots: Vec::with_capacity(capacity),
            capacity,
            overflow_policy,
            overflows: 0,
        }
    }

    /// Store an event in the first free slot.
    ///
    /// Returns `false` when the event was not stored because the pool is full
    /// and the overflow policy drops.
    pub fn add(&mut self, payload: T) -> bool {
        if let Some(slot) = self.slots.iter_mut().find(|slot| !slot.is_set) {
            slot.reset(payload);
            return true;
        }

        if self.slots.len() < self.capacity {
            self.slots.push(BufferedEvent::new(payload));
            return true;
        }

        self.overflows += 1;
        match self.overflow_policy {
            OverflowPolicy::Drop => {
                warn!(
                    pool = self.name,
                    capacity = self.capacity,
                    "Event pool full, dropping event"
                );
                false
            }
            OverflowPolicy::EvictMostSpread => {
                let victim = self
                    .slots
                    .iter_mut()
                    .max_by_key(|slot| slot.spread_count);
                match victim {
                    Some(slot) => {
                        warn!(
                            pool = self.name,
                            spread_count = slot.spread_count,
                            "Event pool full, evicting most spread event"
                        );
                        slot.reset(payload);
                        true
                    }
                    None => false,
                }
            }
        }
    }

    /// Number of set slots
    pub fn size(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_set).count()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Free every set slot whose event matches `predicate`. Returns the
    /// number freed.
    pub fn remove_where<F>(&mut self, predicate: F) -> usize
    where
        F: Fn(&T) -> bool,
    {
        let mut removed = 0;
        for slot in self.slots.iter_mut().filter(|slot| slot.is_set) {
            if predicate(&slot.payload) {
                slot.is_set = false;
                removed += 1;
            }
        }
        removed
    }

    /// Free every slot
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            slot.is_set = false;
        }
    }

    /// Free every slot whose spread count exceeds `bound`, returning how many
    /// were freed.
    pub fn remove_events_with_spread_count_greater_than(&mut self, bound: u32) -> usize {
        let mut removed = 0;
        for slot in &mut self.slots {
            if slot.is_set && slot.spread_count > bound {
                slot.is_set = false;
                removed += 1;
            }
        }
        removed
    }

    /// Least spread events first, free slots last
    pub fn sort_by_spread_count(&mut self) {
        self.slots.sort_by(compare_by_spread_count);
    }

    /// Read-only traversal of up to `limit` set slots
    pub fn view(&self, limit: usize) -> impl Iterator<Item = &T> + '_ {
        self.slots
            .iter()
            .filter(|slot| slot.is_set)
            .take(limit)
            .map(|slot| &slot.payload)
    }

    /// Traversal of up to `limit` set slots counting one spread for each
    /// event returned. Only the events actually pulled from the iterator are
    /// counted.
    pub fn drain(&mut self, limit: usize) -> impl Iterator<Item = &T> + '_ {
        self.slots
            .iter_mut()
            .filter(|slot| slot.is_set)
            .take(limit)
            .map(|slot| {
                slot.spread_count += 1;
                &slot.payload
            })
    }

    /// Like [`EventPool::drain`], additionally freeing each slot as soon as
    /// its spread count reaches `spread_limit`.
    pub fn drain_with_spread_limit(
        &mut self,
        limit: usize,
        spread_limit: u32,
    ) -> impl Iterator<Item = &T> + '_ {
        self.drain_matching_with_spread_limit(limit, spread_limit, |_| true)
    }

    /// Spread-limited drain restricted to events accepted by `filter`.
    /// Events the filter rejects are neither counted nor freed.
    pub fn drain_matching_with_spread_limit<'a, F>(
        &'a mut self,
        limit: usize,
        spread_limit: u32,
        filter: F,
    ) -> impl Iterator<Item = &'a T> + 'a
    where
        T: 'a,
        F: Fn(&T) -> bool + 'a,
    {
        self.slots
            .iter_mut()
            .filter(move |slot| slot.is_set && filter(&slot.payload))
            .take(limit)
            .map(move |slot| {
                slot.spread_count += 1;
                if slot.spread_count >= spread_limit {
                    slot.is_set = false;
                }
                &slot.payload
            })
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            size: self.size(),
            capacity: self.capacity,
            overflows: self.overflows,
        }
    }
}
