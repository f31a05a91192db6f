//! Sizing policy resolution and backend construction.
//!
//! The cache is sized once, at process start, relative to the memory the host
//! reports. Exactly one sizing policy is active at build time; the three
//! policy setters all write the same field, so whichever was called last
//! wins and stale policies can't linger.
use std::sync::Arc;
use std::time::Duration;

use sysinfo::System;

use crate::backend::{BackendKind, EvictionBackend};
use crate::bounded_lru::BoundedLruBackend;
use crate::frequency_weighted::FrequencyWeightedBackend;
use crate::weight::{CellShape, ElementWeigher, Weigher};

/// Budget base substituted when the host reports no usable memory figure.
pub const UNBOUNDED_MEMORY_FALLBACK: u64 = 20 * 1024 * 1024 * 1024;

const DEFAULT_RATIO: f64 = 0.5;

/// How the byte budget is derived from available memory at build time.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum SizePolicy {
    /// `budget = ratio * available_memory`.
    MemoryRatio(f64),
    /// `budget = bytes`, even past available memory (warned, not refused).
    ExplicitBytes(u64),
    /// `budget = available_memory - bytes`, leaving `bytes` for everything
    /// else in the process; falls back to the default ratio on underflow.
    ReserveBytes(u64),
}

impl Default for SizePolicy {
    fn default() -> SizePolicy {
        SizePolicy::MemoryRatio(DEFAULT_RATIO)
    }
}

/// Configuration for the shared cache backend.
#[derive(Clone, Debug, derive_builder::Builder)]
pub struct CacheOptions {
    /// The active sizing policy.
    #[builder(default)]
    pub size_policy: SizePolicy,
    /// Which backend to instantiate.
    #[builder(default)]
    pub backend_kind: BackendKind,
    /// Interval at which a usage report is logged, if any.
    #[builder(default)]
    pub periodic_logging: Option<Duration>,
}

impl CacheOptionsBuilder {
    /// Budget the cache at `ratio` of available memory. Replaces any
    /// previously chosen sizing policy.
    pub fn ratio(&mut self, ratio: f64) -> &mut Self {
        self.size_policy = Some(SizePolicy::MemoryRatio(ratio));
        self
    }

    /// Budget the cache at exactly `bytes`. Replaces any previously chosen
    /// sizing policy.
    pub fn explicit_bytes(&mut self, bytes: u64) -> &mut Self {
        self.size_policy = Some(SizePolicy::ExplicitBytes(bytes));
        self
    }

    /// Budget the cache at available memory minus `bytes`. Replaces any
    /// previously chosen sizing policy.
    pub fn reserve_bytes(&mut self, bytes: u64) -> &mut Self {
        self.size_policy = Some(SizePolicy::ReserveBytes(bytes));
        self
    }
}

impl CacheOptions {
    /// Resolve the active policy against `available` bytes of host memory.
    pub fn resolve_budget(&self, available: u64) -> u64 {
        match self.size_policy {
            SizePolicy::MemoryRatio(ratio) => (available as f64 * ratio) as u64,
            SizePolicy::ExplicitBytes(bytes) => {
                if bytes > available {
                    tracing::warn!(
                        bytes,
                        available,
                        "explicit cache budget exceeds available memory"
                    );
                }
                bytes
            }
            SizePolicy::ReserveBytes(bytes) => match available.checked_sub(bytes) {
                Some(budget) => budget,
                None => {
                    tracing::warn!(
                        reserved = bytes,
                        available,
                        "reservation exceeds available memory, falling back to the default ratio"
                    );
                    (available as f64 * DEFAULT_RATIO) as u64
                }
            },
        }
    }

    /// Build the configured backend with an explicit weigher.
    pub fn build_backend<O, C, V>(
        &self,
        weigher: Arc<dyn Weigher<V>>,
    ) -> Arc<dyn EvictionBackend<O, C, V>>
    where
        O: Send + Sync + 'static,
        C: Send + Sync + 'static,
        V: Send + Sync + 'static,
    {
        let budget = self.resolve_budget(available_memory());
        let backend: Arc<dyn EvictionBackend<O, C, V>> = match self.backend_kind {
            BackendKind::Lru => Arc::new(BoundedLruBackend::new(budget, weigher)),
            BackendKind::FrequencyWeighted => {
                Arc::new(FrequencyWeightedBackend::new(budget, weigher))
            }
        };
        if let Some(interval) = self.periodic_logging {
            spawn_usage_logger(&backend, interval);
        }
        backend
    }

    /// Build the configured backend with the standard element-typed weigher.
    pub fn build<O, C, V>(&self) -> Arc<dyn EvictionBackend<O, C, V>>
    where
        O: Send + Sync + 'static,
        C: Send + Sync + 'static,
        V: CellShape + Send + Sync + 'static,
    {
        self.build_backend(Arc::new(ElementWeigher::new()))
    }
}

/// Total memory reported by the host, or the documented fallback when the
/// report is unusable. A budget can't be derived from an unbounded quantity,
/// so the fallback is an error worth hearing about, not a failure.
fn available_memory() -> u64 {
    let mut sys = System::new();
    sys.refresh_memory();
    let total = sys.total_memory();
    if total == 0 {
        tracing::error!(
            fallback = UNBOUNDED_MEMORY_FALLBACK,
            "host reported no memory limit, sizing against the fallback"
        );
        return UNBOUNDED_MEMORY_FALLBACK;
    }
    total
}

/// Periodically log `(used, max, percent)` for `backend` until it is dropped.
///
/// The thread holds only a weak reference, so diagnostics never keep a
/// backend alive.
fn spawn_usage_logger<O, C, V>(backend: &Arc<dyn EvictionBackend<O, C, V>>, interval: Duration)
where
    O: Send + Sync + 'static,
    C: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    let weak = Arc::downgrade(backend);
    let spawned = std::thread::Builder::new()
        .name("cell-cache-usage".into())
        .spawn(move || loop {
            std::thread::sleep(interval);
            let backend = match weak.upgrade() {
                Some(backend) => backend,
                None => break,
            };
            let used = backend.estimated_size();
            let max = backend.max_size();
            let percent = if max == 0 {
                100.0
            } else {
                used as f64 * 100.0 / max as f64
            };
            tracing::info!(used, max, percent, "cell cache usage");
        });
    if let Err(error) = spawned {
        tracing::error!(%error, "could not start the cache usage logger");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::key::CacheKey;
    use crate::weight::FnWeigher;

    #[test]
    fn defaults_to_half_of_available_memory() {
        let options = CacheOptionsBuilder::default().build().unwrap();
        assert_eq!(options.size_policy, SizePolicy::MemoryRatio(0.5));
        assert_eq!(options.backend_kind, BackendKind::Lru);
        assert_eq!(options.resolve_budget(1000), 500);
    }

    #[test]
    fn last_policy_setter_wins() {
        let options = CacheOptionsBuilder::default()
            .explicit_bytes(100)
            .reserve_bytes(50)
            .build()
            .unwrap();
        assert_eq!(options.size_policy, SizePolicy::ReserveBytes(50));
        assert_eq!(options.resolve_budget(1000), 950);

        let options = CacheOptionsBuilder::default()
            .reserve_bytes(50)
            .ratio(0.25)
            .build()
            .unwrap();
        assert_eq!(options.size_policy, SizePolicy::MemoryRatio(0.25));
        assert_eq!(options.resolve_budget(1000), 250);
    }

    #[test]
    fn explicit_budget_may_exceed_available_memory() {
        let options = CacheOptionsBuilder::default()
            .explicit_bytes(100)
            .build()
            .unwrap();
        assert_eq!(options.resolve_budget(50), 100);
    }

    #[test]
    fn reservation_underflow_falls_back_to_the_default_ratio() {
        let options = CacheOptionsBuilder::default()
            .reserve_bytes(50)
            .build()
            .unwrap();
        assert_eq!(options.resolve_budget(40), 20);
    }

    #[test]
    fn builds_a_working_backend_of_either_kind() {
        let owner = Arc::new("source".to_string());
        let cell = Arc::new(7u64);

        for kind in [BackendKind::Lru, BackendKind::FrequencyWeighted] {
            let options = CacheOptionsBuilder::default()
                .backend_kind(kind)
                .build()
                .unwrap();
            let backend = options.build_backend::<String, u64, Vec<u8>>(Arc::new(FnWeigher(
                |value: &Vec<u8>| value.len() as u64,
            )));

            let key = CacheKey::new(&owner, 0, 0, &cell);
            backend.put(key.clone(), Arc::new(vec![0u8; 16]));
            assert!(backend.get_if_present(&key).is_some());
            assert!(backend.max_size() > 0);
        }
    }

    #[test]
    fn element_weigher_build_accounts_in_bytes() {
        let owner = Arc::new("source".to_string());
        let cell = Arc::new(7u64);

        let options = CacheOptionsBuilder::default().explicit_bytes(1024).build().unwrap();
        let backend = options.build::<String, u64, Vec<u16>>();

        backend.put(CacheKey::new(&owner, 0, 0, &cell), Arc::new(vec![0u16; 8]));
        assert_eq!(backend.estimated_size(), 16);
    }
}
