//! The throughput-oriented backend: a thin adapter over a frequency/recency
//! hybrid weighing cache.
//!
//! Bookkeeping is delegated to `moka`, whose TinyLFU admission policy weighs
//! recency against access frequency. The trade is exact control for
//! concurrency: no predicate sweep, no resizing after construction, and only
//! a coarse size estimate. Callers that need owner-scoped invalidation should
//! configure the LRU backend instead.
use std::sync::Arc;

use moka::sync::Cache;

use crate::backend::{CacheError, EvictionBackend};
use crate::key::{CacheKey, KeyId};
use crate::weight::Weigher;

/// Coarse per-entry size proxy used by [FrequencyWeightedBackend::estimated_size].
const ESTIMATED_BYTES_PER_CELL: u64 = 1_000_000;

const BACKEND_NAME: &str = "frequency-weighted";

/// The frequency/recency-hybrid eviction backend.
///
/// Entries are stored together with their full key; the key's weak references
/// pin the owner and cell allocations, which keeps the address-based identity
/// sound for as long as the entry lives.
pub struct FrequencyWeightedBackend<O, C, V> {
    cache: Cache<KeyId, (CacheKey<O, C>, Arc<V>)>,
    max_size: u64,
}

impl<O, C, V> FrequencyWeightedBackend<O, C, V>
where
    O: Send + Sync + 'static,
    C: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub fn new(max_size: u64, weigher: Arc<dyn Weigher<V>>) -> FrequencyWeightedBackend<O, C, V> {
        let cache = Cache::builder()
            .max_capacity(max_size)
            .weigher(move |_key: &KeyId, entry: &(CacheKey<O, C>, Arc<V>)| {
                u32::try_from(weigher.weigh(&entry.1)).unwrap_or(u32::MAX)
            })
            .build();
        FrequencyWeightedBackend { cache, max_size }
    }

    /// Flush the engine's amortized maintenance work (pending evictions and
    /// counter updates). Useful before reading [EvictionBackend::estimated_size]
    /// in tests or diagnostics; never required for correctness.
    pub fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks();
    }
}

impl<O, C, V> EvictionBackend<O, C, V> for FrequencyWeightedBackend<O, C, V>
where
    O: Send + Sync + 'static,
    C: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn put(&self, key: CacheKey<O, C>, value: Arc<V>) {
        if !key.is_alive() {
            return;
        }
        self.cache.insert(key.id(), (key, value));
    }

    fn get_if_present(&self, key: &CacheKey<O, C>) -> Option<Arc<V>> {
        if !key.is_alive() {
            return None;
        }
        self.cache.get(&key.id()).map(|(_, value)| value)
    }

    fn touch(&self, key: CacheKey<O, C>, value: &Arc<V>) {
        if !key.is_alive() {
            return;
        }
        // The read records a hit in the frequency sketch.
        if self.cache.get(&key.id()).is_none() {
            self.cache.insert(key.id(), (key, value.clone()));
        }
    }

    fn invalidate(&self, key: &CacheKey<O, C>) {
        self.cache.invalidate(&key.id());
    }

    fn invalidate_if(
        &self,
        _predicate: &(dyn Fn(&CacheKey<O, C>) -> bool + Send + Sync),
    ) -> Result<(), CacheError> {
        Err(CacheError::Unsupported {
            backend: BACKEND_NAME,
            operation: "invalidate_if",
        })
    }

    fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    fn max_size(&self) -> u64 {
        self.max_size
    }

    fn set_max_size(&self, _max_size: u64) -> Result<(), CacheError> {
        // The engine's capacity is fixed at construction.
        Err(CacheError::Unsupported {
            backend: BACKEND_NAME,
            operation: "set_max_size",
        })
    }

    /// Entry count times a nominal cell size; this backend does not track
    /// exact bytes.
    fn estimated_size(&self) -> u64 {
        self.cache.entry_count() * ESTIMATED_BYTES_PER_CELL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::weight::FnWeigher;

    fn backend() -> FrequencyWeightedBackend<String, u64, Vec<u8>> {
        FrequencyWeightedBackend::new(
            1_000_000,
            Arc::new(FnWeigher(|value: &Vec<u8>| value.len() as u64)),
        )
    }

    struct Fixture {
        owner: Arc<String>,
        cells: Vec<Arc<u64>>,
    }

    impl Fixture {
        fn new(cell_count: u64) -> Fixture {
            Fixture {
                owner: Arc::new("source".to_string()),
                cells: (0..cell_count).map(Arc::new).collect(),
            }
        }

        fn key(&self, cell: u64) -> CacheKey<String, u64> {
            CacheKey::new(&self.owner, 0, 0, &self.cells[cell as usize])
        }
    }

    #[test]
    fn basic_ops() {
        let fixture = Fixture::new(2);
        let backend = backend();

        backend.put(fixture.key(0), Arc::new(vec![1u8, 2, 3]));
        assert_eq!(
            backend.get_if_present(&fixture.key(0)).as_deref(),
            Some(&vec![1u8, 2, 3])
        );
        assert!(backend.get_if_present(&fixture.key(1)).is_none());

        backend.invalidate(&fixture.key(0));
        assert!(backend.get_if_present(&fixture.key(0)).is_none());
    }

    #[test]
    fn invalidate_if_is_unsupported_and_leaves_entries_alone() {
        let fixture = Fixture::new(1);
        let backend = backend();
        backend.put(fixture.key(0), Arc::new(vec![0u8; 8]));

        let result = backend.invalidate_if(&|_: &CacheKey<String, u64>| true);
        assert!(matches!(
            result,
            Err(CacheError::Unsupported {
                operation: "invalidate_if",
                ..
            })
        ));
        assert!(backend.get_if_present(&fixture.key(0)).is_some());
    }

    #[test]
    fn resize_is_unsupported() {
        let backend = backend();
        assert!(matches!(
            backend.set_max_size(5),
            Err(CacheError::Unsupported {
                operation: "set_max_size",
                ..
            })
        ));
        assert_eq!(backend.max_size(), 1_000_000);
    }

    #[test]
    fn touch_inserts_when_absent() {
        let fixture = Fixture::new(1);
        let backend = backend();

        let value = Arc::new(vec![0u8; 8]);
        backend.touch(fixture.key(0), &value);
        assert!(backend.get_if_present(&fixture.key(0)).is_some());
    }

    #[test]
    fn reclaimed_keys_never_match() {
        let backend = backend();
        let cell = Arc::new(0u64);
        let owner = Arc::new("doomed".to_string());
        let key = CacheKey::new(&owner, 0, 0, &cell);
        backend.put(key.clone(), Arc::new(vec![0u8; 8]));

        drop(owner);
        assert!(backend.get_if_present(&key).is_none());
    }

    #[test]
    fn size_estimate_is_a_per_entry_proxy() {
        let fixture = Fixture::new(3);
        let backend = backend();

        for cell in 0..3 {
            backend.put(fixture.key(cell), Arc::new(vec![0u8; 8]));
        }
        backend.run_pending_tasks();
        assert_eq!(backend.estimated_size(), 3 * ESTIMATED_BYTES_PER_CELL);

        backend.invalidate_all();
        backend.run_pending_tasks();
        assert_eq!(backend.estimated_size(), 0);
    }
}
