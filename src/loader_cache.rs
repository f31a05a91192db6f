//! The per-source façade the decode pipeline sees.
//!
//! A [LoaderCacheAdapter] scopes the shared backend to one
//! `(owner, timepoint, level)` triple, so pipeline code can treat it like a
//! private cell cache while every adapter in the process competes for the
//! same budget.
use std::sync::Arc;

use crate::backend::{CacheError, EvictionBackend};
use crate::key::CacheKey;

/// A per-(owner, timepoint, level) view of the shared backend.
///
/// The adapter holds the owner strongly — it lives inside that owner's
/// pipeline and dies with it — but the keys it mints only reference the owner
/// weakly, so cached entries never keep a closed source alive.
pub struct LoaderCacheAdapter<O, C, V> {
    backend: Arc<dyn EvictionBackend<O, C, V>>,
    owner: Arc<O>,
    timepoint: i32,
    level: i32,
}

impl<O, C, V> LoaderCacheAdapter<O, C, V>
where
    O: Send + Sync + 'static,
    C: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub fn new(
        backend: Arc<dyn EvictionBackend<O, C, V>>,
        owner: Arc<O>,
        timepoint: i32,
        level: i32,
    ) -> LoaderCacheAdapter<O, C, V> {
        LoaderCacheAdapter {
            backend,
            owner,
            timepoint,
            level,
        }
    }

    fn key_for(&self, cell: &Arc<C>) -> CacheKey<O, C> {
        CacheKey::new(&self.owner, self.timepoint, self.level, cell)
    }

    /// Fetch `cell`, running `loader` to decode it on a miss.
    ///
    /// The loader runs with no cache lock held — each backend call takes and
    /// releases its own exclusion scope — so one slow decode never serializes
    /// unrelated lookups. Two threads racing on the same missing cell both
    /// decode and the second store resolves benignly. A loader failure
    /// propagates unchanged and leaves nothing cached.
    pub fn get_or_load<E, F>(&self, cell: &Arc<C>, loader: F) -> Result<Arc<V>, E>
    where
        F: FnOnce(&C) -> Result<V, E>,
    {
        let key = self.key_for(cell);
        if let Some(value) = self.backend.get_if_present(&key) {
            self.backend.touch(key, &value);
            return Ok(value);
        }

        let value = Arc::new(loader(cell)?);
        self.backend.put(key, value.clone());
        Ok(value)
    }

    /// Drop one cell of this adapter's scope.
    pub fn invalidate(&self, cell: &Arc<C>) {
        self.backend.invalidate(&self.key_for(cell));
    }

    /// Drop every cell of this adapter's scope whose address matches
    /// `predicate`.
    pub fn invalidate_if<P>(&self, predicate: P) -> Result<(), CacheError>
    where
        P: Fn(&C) -> bool + Send + Sync,
    {
        let owner = &self.owner;
        let timepoint = self.timepoint;
        let level = self.level;
        self.backend.invalidate_if(&move |key: &CacheKey<O, C>| {
            key.partial_equals(owner, timepoint, level)
                && key.cell().map_or(false, |cell| predicate(&cell))
        })
    }

    /// Drop everything this adapter has stored in the backend. Called when
    /// the owning source is closed or a timepoint is removed.
    pub fn invalidate_all(&self) -> Result<(), CacheError> {
        let owner = &self.owner;
        let timepoint = self.timepoint;
        let level = self.level;
        self.backend
            .invalidate_if(&move |key: &CacheKey<O, C>| key.partial_equals(owner, timepoint, level))
    }
}
