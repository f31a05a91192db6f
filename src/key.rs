//! The composite identity under which a cell is cached.
//!
//! A [CacheKey] names a cell by who produced it: the owning image source, the
//! timepoint and resolution level it was decoded at, and the cell address
//! within that grid. The owner and the cell address are referenced weakly;
//! holding a key (or a cache entry built from one) never keeps either object
//! alive. Once one of them has been dropped, the key stops matching anything,
//! including a clone of itself, so stale entries fall out of lookups silently
//! and get reclaimed by eviction or a predicate sweep.
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

/// Address-based identity of a key.
///
/// A `Weak` pins its allocation even after the value is dropped, so as long
/// as the key that produced this id is held somewhere, the address pair can't
/// be recycled into a different object. That makes `KeyId` safe to use as a
/// map key where liveness-aware equality would not be.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub(crate) struct KeyId {
    owner: usize,
    timepoint: i32,
    level: i32,
    cell: usize,
}

/// Identifies one cached cell: `(owner, timepoint, level, cell address)`.
///
/// Equality and hashing go by the *identity* of the owner and cell objects,
/// not their contents; two keys are equal only when they were minted against
/// the very same instances. Equality additionally requires both referents to
/// still be alive, so a key whose owner has been dropped compares unequal to
/// everything. (That makes `Eq` non-reflexive for dead keys; the backends
/// never rely on reflexivity because their maps are keyed by [KeyId].)
pub struct CacheKey<O, C> {
    owner: Weak<O>,
    timepoint: i32,
    level: i32,
    cell: Weak<C>,
}

impl<O, C> CacheKey<O, C> {
    /// Mint a key against live owner and cell objects.
    pub fn new(owner: &Arc<O>, timepoint: i32, level: i32, cell: &Arc<C>) -> CacheKey<O, C> {
        CacheKey {
            owner: Arc::downgrade(owner),
            timepoint,
            level,
            cell: Arc::downgrade(cell),
        }
    }

    pub(crate) fn id(&self) -> KeyId {
        KeyId {
            owner: self.owner.as_ptr() as usize,
            timepoint: self.timepoint,
            level: self.level,
            cell: self.cell.as_ptr() as usize,
        }
    }

    /// Whether both the owner and the cell address are still alive.
    pub fn is_alive(&self) -> bool {
        self.owner.strong_count() > 0 && self.cell.strong_count() > 0
    }

    pub fn timepoint(&self) -> i32 {
        self.timepoint
    }

    pub fn level(&self) -> i32 {
        self.level
    }

    /// The cell address, unless it has been dropped.
    pub fn cell(&self) -> Option<Arc<C>> {
        self.cell.upgrade()
    }

    /// Whether this key's owner is `owner`. Always false once the key's
    /// owner reference has been reclaimed.
    pub fn owner_is(&self, owner: &Arc<O>) -> bool {
        self.owner.strong_count() > 0 && std::ptr::eq(self.owner.as_ptr(), Arc::as_ptr(owner))
    }

    /// Whether this key belongs to `owner` at the given timepoint and level.
    ///
    /// This is the scoping test used by predicate invalidation to sweep one
    /// source's entries without looking at anyone else's payloads.
    pub fn partial_equals(&self, owner: &Arc<O>, timepoint: i32, level: i32) -> bool {
        self.timepoint == timepoint && self.level == level && self.owner_is(owner)
    }
}

impl<O, C> Clone for CacheKey<O, C> {
    fn clone(&self) -> CacheKey<O, C> {
        CacheKey {
            owner: self.owner.clone(),
            timepoint: self.timepoint,
            level: self.level,
            cell: self.cell.clone(),
        }
    }
}

impl<O, C> PartialEq for CacheKey<O, C> {
    fn eq(&self, other: &CacheKey<O, C>) -> bool {
        self.is_alive() && other.is_alive() && self.id() == other.id()
    }
}

impl<O, C> Eq for CacheKey<O, C> {}

impl<O, C> Hash for CacheKey<O, C> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl<O, C> fmt::Debug for CacheKey<O, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheKey")
            .field("owner", &self.owner.as_ptr())
            .field("timepoint", &self.timepoint)
            .field("level", &self.level)
            .field("cell", &self.cell.as_ptr())
            .field("alive", &self.is_alive())
            .finish()
    }
}
