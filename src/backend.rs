//! The contract shared by both eviction backends.
//!
//! Exactly one backend instance exists per process in the intended setup; it
//! is handed to every [LoaderCacheAdapter](crate::LoaderCacheAdapter) as a
//! constructor argument rather than reached through a global, which is also
//! what makes the backends trivially testable in isolation.
use std::sync::Arc;

use crate::key::CacheKey;

/// Which backend [CacheOptions](crate::CacheOptions) should instantiate.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BackendKind {
    /// Deterministic least-recently-touched eviction with exact byte
    /// accounting and predicate invalidation.
    Lru,
    /// Frequency/recency-hybrid eviction. Higher throughput under contention,
    /// but no predicate invalidation, no resizing, and only an approximate
    /// size report.
    FrequencyWeighted,
}

impl Default for BackendKind {
    fn default() -> BackendKind {
        BackendKind::Lru
    }
}

/// Errors surfaced by cache operations.
///
/// An operation a backend cannot honor is always reported, never silently
/// dropped; swallowing a requested invalidation would retain arbitrary
/// amounts of memory on behalf of an owner that no longer exists.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("the {backend} backend does not support {operation}")]
    Unsupported {
        backend: &'static str,
        operation: &'static str,
    },
}

/// A memory-budgeted store of decoded cells, shared by every adapter in the
/// process.
///
/// Every operation is safe to call from any number of threads. Mutations on
/// one backend instance are serialized behind a single exclusion scope (or
/// the engine's equivalent); a read that refreshes recency counts as a
/// mutation of the access order and takes the same scope. Nothing here blocks
/// beyond that scope — in particular, backends never run user code while
/// holding it.
pub trait EvictionBackend<O, C, V>: Send + Sync {
    /// Insert `value` under `key`. Always succeeds; the backend evicts other
    /// entries as needed to make room.
    fn put(&self, key: CacheKey<O, C>, value: Arc<V>);

    /// Non-blocking lookup. A hit refreshes the entry's recency or frequency
    /// standing; a miss has no side effects.
    fn get_if_present(&self, key: &CacheKey<O, C>) -> Option<Arc<V>>;

    /// Record that `key` is hot. A present entry gets a recency/frequency
    /// refresh without being re-weighed; an absent one is inserted with
    /// `value`.
    fn touch(&self, key: CacheKey<O, C>, value: &Arc<V>);

    /// Remove one entry if present; no-op otherwise.
    fn invalidate(&self, key: &CacheKey<O, C>);

    /// Remove every entry whose key matches `predicate`.
    ///
    /// This is the owner-scoped bulk removal path: it visits every key once
    /// but never looks at the payload of a non-matching entry. Backends that
    /// cannot sweep by predicate report [CacheError::Unsupported] and leave
    /// everything in place.
    fn invalidate_if(
        &self,
        predicate: &(dyn Fn(&CacheKey<O, C>) -> bool + Send + Sync),
    ) -> Result<(), CacheError>;

    /// Remove everything and reset the size accounting.
    fn invalidate_all(&self);

    /// The budget in bytes.
    fn max_size(&self) -> u64;

    /// Change the budget, evicting down to it where supported.
    fn set_max_size(&self, max_size: u64) -> Result<(), CacheError>;

    /// Current consumption estimate: exact for
    /// [BoundedLruBackend](crate::BoundedLruBackend), approximate for
    /// [FrequencyWeightedBackend](crate::FrequencyWeightedBackend).
    fn estimated_size(&self) -> u64;
}
