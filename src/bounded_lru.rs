//! The deterministic backend: an access-ordered map with exact byte
//! accounting.
//!
//! Implemented as a vec-backed doubly linked list of entries plus an
//! auxiliary hash index, all behind one mutex. The index is keyed by each
//! key's address-based identity rather than the key itself, so entries whose
//! owner has already been reclaimed can still be unlinked and removed.
//!
//! The running weight total settles strictly below the budget after every
//! insert; the one tolerated exception is a single entry that is oversized on
//! its own, which is admitted anyway and evicted as soon as a later insert
//! needs headroom.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ahash::RandomState;

use crate::backend::{CacheError, EvictionBackend};
use crate::key::{CacheKey, KeyId};
use crate::weight::Weigher;

struct OccupiedEntry<O, C, V> {
    key: CacheKey<O, C>,
    value: Arc<V>,
    weight: u64,
    prev: Option<usize>,
    next: Option<usize>,
}

struct EmptyEntry {
    next_empty: Option<usize>,
}

enum Slot<O, C, V> {
    /// This slot is free, possibly with a pointer at the next free slot.
    Empty(EmptyEntry),
    /// This slot holds an entry, doubly linked into the access order.
    Occupied(OccupiedEntry<O, C, V>),
}

impl<O, C, V> Slot<O, C, V> {
    fn as_occupied(&self) -> &OccupiedEntry<O, C, V> {
        match self {
            Slot::Occupied(ref x) => x,
            _ => panic!("Slot should be occupied"),
        }
    }

    fn as_occupied_mut(&mut self) -> &mut OccupiedEntry<O, C, V> {
        match self {
            Slot::Occupied(ref mut x) => x,
            _ => panic!("Slot should be occupied"),
        }
    }

    fn as_empty_mut(&mut self) -> &mut EmptyEntry {
        match self {
            Slot::Empty(ref mut x) => x,
            _ => panic!("Slot should be empty"),
        }
    }
}

struct LruInner<O, C, V> {
    slots: Vec<Slot<O, C, V>>,
    /// Points at the slot of each present key.
    index: HashMap<KeyId, usize, RandomState>,
    max_size: u64,
    /// Most recently touched entry.
    head: Option<usize>,
    /// Least recently touched entry; evicted first.
    tail: Option<usize>,
    empty_head: Option<usize>,
    /// Sum of the recorded weights of all present entries.
    total_weight: u64,
}

impl<O, C, V> LruInner<O, C, V> {
    /// Entirely unlink an occupied slot from the access order.
    fn unlink_index(&mut self, index: usize) {
        if Some(index) == self.tail {
            self.tail = self.slots[index].as_occupied().prev;
        }

        if Some(index) == self.head {
            self.head = self.slots[index].as_occupied_mut().next;
            if let Some(n) = self.head {
                self.slots[n].as_occupied_mut().prev = None;
            }

            return;
        }

        let old_prev = self.slots[index]
            .as_occupied_mut()
            .prev
            .expect("Isn't the head");
        let old_next = self.slots[index].as_occupied_mut().next;
        self.slots[old_prev].as_occupied_mut().next = old_next;
        if let Some(n) = old_next {
            self.slots[n].as_occupied_mut().prev = Some(old_prev);
        }
    }

    /// Given the index of an occupied slot, make it the most recent entry.
    fn make_most_recent(&mut self, index: usize) {
        self.unlink_index(index);
        {
            let entry = self.slots[index].as_occupied_mut();
            entry.prev = None;
            entry.next = self.head;
        }
        if let Some(i) = self.head {
            self.slots[i].as_occupied_mut().prev = Some(index);
        }
        self.head = Some(index);

        // If this is the only entry, then unlinking it broke the tail.
        if self.tail.is_none() {
            self.tail = Some(index);
        }
    }

    /// Remove the entry at `index`, freeing the slot and settling the weight
    /// counter. The payload hold is dropped here, inside the exclusion scope.
    fn become_empty(&mut self, index: usize) {
        self.unlink_index(index);
        let mut old = Slot::Empty(EmptyEntry {
            next_empty: self.empty_head,
        });
        std::mem::swap(&mut old, &mut self.slots[index]);
        self.empty_head = Some(index);
        match old {
            Slot::Occupied(OccupiedEntry {
                key, value, weight, ..
            }) => {
                self.index.remove(&key.id());
                self.total_weight -= weight;
                drop(value);
            }
            _ => panic!("Should have been occupied"),
        }
    }

    /// Find an available empty slot, or make one if necessary.
    fn find_empty(&mut self) -> usize {
        if let Some(e) = self.empty_head {
            self.empty_head = self.slots[e].as_empty_mut().next_empty;
            return e;
        }

        self.slots
            .push(Slot::Empty(EmptyEntry { next_empty: None }));
        self.slots.len() - 1
    }

    /// Insert a new entry as the most recent one. The key must not already be
    /// present.
    fn insert_new(&mut self, key: CacheKey<O, C>, value: Arc<V>, weight: u64) -> usize {
        let id = key.id();
        let index = self.find_empty();
        let old_head = self.head;

        self.slots[index] = Slot::Occupied(OccupiedEntry {
            key,
            value,
            weight,
            prev: None,
            next: old_head,
        });
        if let Some(h) = old_head {
            self.slots[h].as_occupied_mut().prev = Some(index);
        }
        self.head = Some(index);
        self.index.insert(id, index);
        self.total_weight += weight;

        if self.tail.is_none() {
            self.tail = Some(index);
        }

        index
    }

    /// Evict least-recently-touched entries until the running total sits
    /// strictly below the budget. `keep` is never evicted; an entry whose
    /// weight alone reaches the budget therefore survives until the next
    /// insert needs headroom.
    fn evict_to_budget(&mut self, keep: Option<usize>) {
        while self.total_weight >= self.max_size {
            let victim = match self.tail {
                Some(t) if Some(t) != keep => t,
                _ => break,
            };
            self.become_empty(victim);
        }
    }
}

/// The deterministic eviction backend.
///
/// Strict least-recently-touched order, an exact running weight total, and
/// predicate invalidation. All mutations, including the recency refresh of a
/// read hit, serialize behind one mutex; the weigher runs before the lock is
/// taken.
pub struct BoundedLruBackend<O, C, V> {
    weigher: Arc<dyn Weigher<V>>,
    inner: Mutex<LruInner<O, C, V>>,
}

impl<O, C, V> BoundedLruBackend<O, C, V> {
    pub fn new(max_size: u64, weigher: Arc<dyn Weigher<V>>) -> BoundedLruBackend<O, C, V> {
        BoundedLruBackend {
            weigher,
            inner: Mutex::new(LruInner {
                slots: Vec::new(),
                index: Default::default(),
                max_size,
                head: None,
                tail: None,
                empty_head: None,
                total_weight: 0,
            }),
        }
    }

    /// Present keys, most recently touched first.
    #[cfg(test)]
    pub(crate) fn keys_most_recent_first(&self) -> Vec<KeyId> {
        let inner = self.inner.lock().unwrap();
        let mut out = Vec::new();
        let mut index = inner.head;
        while let Some(i) = index {
            let entry = inner.slots[i].as_occupied();
            out.push(entry.key.id());
            index = entry.next;
        }
        out
    }
}

impl<O, C, V> EvictionBackend<O, C, V> for BoundedLruBackend<O, C, V>
where
    O: Send + Sync,
    C: Send + Sync,
    V: Send + Sync,
{
    fn put(&self, key: CacheKey<O, C>, value: Arc<V>) {
        if !key.is_alive() {
            // Nothing could ever look this entry up again.
            return;
        }
        let weight = self.weigher.weigh(&value);

        let mut inner = self.inner.lock().unwrap();
        if inner.index.contains_key(&key.id()) {
            // Already present and accounted for; a second store of the same
            // cell is a no-op rather than a double count.
            return;
        }

        let index = inner.insert_new(key, value, weight);
        inner.evict_to_budget(Some(index));
        if inner.total_weight >= inner.max_size {
            tracing::debug!(
                weight,
                max_size = inner.max_size,
                "oversized entry admitted past the budget, evicted on the next insert"
            );
        }
    }

    fn get_if_present(&self, key: &CacheKey<O, C>) -> Option<Arc<V>> {
        if !key.is_alive() {
            return None;
        }
        let mut inner = self.inner.lock().unwrap();
        let index = *inner.index.get(&key.id())?;
        inner.make_most_recent(index);
        Some(inner.slots[index].as_occupied().value.clone())
    }

    fn touch(&self, key: CacheKey<O, C>, value: &Arc<V>) {
        if !key.is_alive() {
            return;
        }
        {
            let mut inner = self.inner.lock().unwrap();
            if let Some(&index) = inner.index.get(&key.id()) {
                // Present: recency refresh only, the recorded weight stands.
                inner.make_most_recent(index);
                return;
            }
        }
        self.put(key, value.clone());
    }

    fn invalidate(&self, key: &CacheKey<O, C>) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(&index) = inner.index.get(&key.id()) {
            inner.become_empty(index);
        }
    }

    fn invalidate_if(
        &self,
        predicate: &(dyn Fn(&CacheKey<O, C>) -> bool + Send + Sync),
    ) -> Result<(), CacheError> {
        let mut inner = self.inner.lock().unwrap();
        let victims = inner
            .slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                Slot::Occupied(entry) if predicate(&entry.key) => Some(index),
                _ => None,
            })
            .collect::<Vec<_>>();
        for index in victims {
            inner.become_empty(index);
        }
        Ok(())
    }

    fn invalidate_all(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.slots.clear();
        inner.index.clear();
        inner.head = None;
        inner.tail = None;
        inner.empty_head = None;
        inner.total_weight = 0;
    }

    fn max_size(&self) -> u64 {
        self.inner.lock().unwrap().max_size
    }

    fn set_max_size(&self, max_size: u64) -> Result<(), CacheError> {
        let mut inner = self.inner.lock().unwrap();
        inner.max_size = max_size;
        inner.evict_to_budget(None);
        Ok(())
    }

    fn estimated_size(&self) -> u64 {
        self.inner.lock().unwrap().total_weight
    }
}
