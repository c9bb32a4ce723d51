//! # Shard Metrics
//!
//! Low-contention aggregation primitives for client-side metrics
//! instrumentation. Applications record measurements on the hot path from
//! arbitrary threads; a background reporter periodically drains aggregated
//! state and ships it to a collector. This crate is the part of that
//! pipeline that has to stay correct and fast under concurrent writers: it
//! does not know about metric names, registries, or transports.
//!
//! ## Architecture Overview
//!
//! The crate is organized leaves-first:
//!
//! - `ring_buffer`: fixed-capacity, overwrite-oldest buffer with atomic
//!   slot writes and weakly consistent scans
//! - `sketch`: the mergeable rank-statistics summary that distributions
//!   accumulate and flush, backed by HDR histograms
//! - `reservoir`: bounded sample populations (`SampleReservoir`), sorted
//!   `Snapshot` views, and the forward-decay fallback reservoir
//! - `ttl_reservoir`: a time-windowed reservoir composing the ring buffer
//!   with a statistical fallback, choosing per read which one to trust
//! - `distribution`: single and sharded sketch accumulators with
//!   atomic-swap flushing
//! - `histogram`: a histogram metric wired to TTL retention
//!
//! ## Usage Example
//!
//! ```rust
//! use shard_metrics::{ConcurrentDistribution, Distribution};
//!
//! fn main() -> anyhow::Result<()> {
//!     let latency = ConcurrentDistribution::new()?;
//!
//!     // Hot path, any thread, never blocks on other shards.
//!     latency.record(3.2);
//!     latency.record(4.7);
//!
//!     // Reporter thread, on its own schedule.
//!     let payload = latency.value_and_flush();
//!     assert!(!payload.is_empty());
//!     assert_eq!(latency.count(), 0);
//!     Ok(())
//! }
//! ```
//!
//! ## Concurrency Model
//!
//! Writers never coordinate with readers. The ring buffer and the shard
//! routing are wait-free for writers; each distribution shard owns its own
//! short lock, and a flush swaps state shard by shard. Multi-shard flushes
//! deliberately have soft window boundaries: a measurement racing a flush
//! lands in the window being flushed or the next one, never nowhere and
//! never twice. Reads of the ring buffer are weakly consistent scans, good
//! enough for the staleness heuristics built on them.
//!
//! ## Error Handling
//!
//! Steady-state operations are total: `record` and `update` never fail and
//! never block on I/O, and flushes swallow-and-log the unreachable
//! serialization failure paths. The only error surface is misconfiguration
//! at construction time (zero capacities, broken shard factories), which
//! fails fast with `anyhow::Result`.

/// Fixed-capacity, overwrite-oldest concurrent ring buffer
///
/// The retention workhorse under the TTL reservoir: pre-filled with a
/// sentinel, written through an atomic position counter, scanned without
/// locks.
pub mod ring_buffer;

/// Mergeable rank-statistics summaries
///
/// The opaque accumulation unit that distributions record into, merge at
/// flush time, and serialize for the reporter.
pub mod sketch;

/// Sample reservoirs and snapshot views
///
/// The `SampleReservoir` seam between metrics and their retention policy,
/// the sorted `Snapshot` query type, and the forward-decay reservoir used
/// as the high-throughput fallback.
pub mod reservoir;

/// Time-windowed reservoir with a statistical fallback
///
/// Answers from a hard TTL window while the write rate allows, and from
/// the decaying delegate once the window can no longer be represented.
pub mod ttl_reservoir;

/// Single and sharded distribution accumulators
///
/// `SketchDistribution` is one accumulator; `ConcurrentDistribution`
/// routes writers across a power-of-two shard array by thread identity and
/// merges at flush time.
pub mod distribution;

/// Histogram metric over TTL retention
pub mod histogram;

pub use distribution::{ConcurrentDistribution, Distribution, SketchDistribution};
pub use histogram::TtlHistogram;
pub use reservoir::{ExponentiallyDecayingReservoir, SampleReservoir, Snapshot};
pub use ring_buffer::RingBuffer;
pub use sketch::Sketch;
pub use ttl_reservoir::{Clock, SystemClock, TtlReservoir};

/// The current version of the crate, from Cargo.toml, for reporter
/// metadata.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
///
/// Chosen to match the aggregation behavior the downstream collector
/// expects; all of them can be overridden at construction time.
pub mod defaults {
    /// Default TTL window in seconds
    ///
    /// Five minutes keeps rarely-updated metrics visible across several
    /// reporting intervals without letting stale samples dominate
    /// percentile queries.
    pub const TTL_SECONDS: u64 = 300;

    /// Default minimum write rate, per second
    ///
    /// The highest write rate at which the TTL buffer must still hold a
    /// full window. Together with the TTL this fixes the ring buffer
    /// capacity; beyond it, queries fall back to the decaying reservoir.
    pub const MINIMUM_RATE: u64 = 10;

    /// Shards allocated per logical CPU for sharded distributions
    ///
    /// Over-provisioning shards relative to the CPU count bounds the
    /// collision probability of thread-hash routing while keeping the
    /// per-metric memory overhead predictable.
    pub const SHARDS_PER_CPU: usize = 4;

    /// Significant figures kept by distribution sketches
    ///
    /// Three significant figures bounds the relative quantile error at
    /// 0.1%, plenty for latency percentiles, at a modest memory cost.
    pub const SKETCH_SIGNIFICANT_FIGURES: u8 = 3;

    /// Sample capacity of the decaying fallback reservoir
    pub const RESERVOIR_SIZE: usize = 1028;

    /// Decay factor of the fallback reservoir
    ///
    /// Biases retention toward roughly the last five minutes of samples,
    /// mirroring the default TTL window.
    pub const RESERVOIR_ALPHA: f64 = 0.015;
}
