//! A process-wide, memory-budgeted cache for decoded image cells.
//!
//! Rendering a large multi-resolution, multi-timepoint volume decodes the
//! same blocks of pixels ("cells") over and over; decoding is expensive, but
//! a plain map of cells grows without bound and a per-viewer cache can't
//! share work between independently-created viewers. This crate provides one
//! shared, byte-budgeted store that every decode pipeline in the process
//! feeds and draws from:
//!
//! - [CacheKey] identifies a cell by the *identity* of its owning source and
//!   cell address (referenced weakly, so the cache never keeps a closed
//!   source alive) plus a timepoint and resolution level. Keys whose
//!   referents are gone silently stop matching, which is how stale entries
//!   drain out instead of leaking.
//! - [EvictionBackend] is the contract both storage engines implement.
//!   [BoundedLruBackend] gives strict least-recently-touched eviction, exact
//!   byte accounting, and predicate invalidation; [FrequencyWeightedBackend]
//!   trades those for throughput under contention.
//! - [ElementWeigher] prices a cell from its element storage type and count;
//!   the budget everything is measured against is its output.
//! - [CacheOptions] resolves a sizing policy (ratio of available memory,
//!   explicit bytes, or reserve-for-everything-else) into a budget and
//!   builds the configured backend.
//! - [LoaderCacheAdapter] is what pipeline code actually talks to: a
//!   per-(owner, timepoint, level) façade whose `get_or_load` runs the
//!   decode callback on a miss and stores the result under this scope's key,
//!   so a whole source can later be swept with one predicate.
//!
//! When an image source is closed, sweep its entries with
//! [EvictionBackend::invalidate_if] (or [LoaderCacheAdapter::invalidate_all]
//! per adapter); a sweep with `|key| !key.is_alive()` reclaims entries whose
//! owners disappeared without one.
mod backend;
mod bounded_lru;
mod builder;
mod frequency_weighted;
mod key;
mod loader_cache;
mod weight;

pub use backend::*;
pub use bounded_lru::*;
pub use builder::*;
pub use frequency_weighted::*;
pub use key::*;
pub use loader_cache::*;
pub use weight::*;
