use anyhow::Result;
use crossbeam::utils::CachePadded;
use parking_lot::Mutex;
use std::cell::Cell;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::mem;
use tracing::debug;

use crate::defaults;
use crate::sketch::Sketch;

/// A metric that records measurements for rank-statistics queries.
///
/// Unlike a binned histogram, a distribution needs no percentile
/// configuration up front: the flushed sketch is shipped to the collector,
/// which can compute any percentile across sources from the merged data.
///
/// `record` never blocks and never fails for finite input; what a sketch
/// does with NaN or infinite values is the sketch's business.
pub trait Distribution: Send + Sync {
    /// Record a measurement.
    fn record(&self, value: f64);

    /// Atomically take the accumulated sketch, leaving an empty one in its
    /// place so a new recording window starts.
    fn digest_and_flush(&self) -> Sketch;

    /// Number of measurements in the current recording window.
    fn count(&self) -> u64;

    /// Serialize the accumulated sketch into its compact binary encoding
    /// and reset the recording window.
    fn value_and_flush(&self) -> Vec<u8> {
        self.digest_and_flush().into_bytes()
    }
}

/// A single distribution accumulator.
///
/// The sketch sits behind a short mutex: recorders serialize on it for the
/// duration of one sketch insert, and a flush swaps in a fresh sketch under
/// the same lock so a single accumulator's flush never tears.
pub struct SketchDistribution {
    sketch: Mutex<Sketch>,
}

impl SketchDistribution {
    pub fn new() -> Result<Self> {
        Ok(Self {
            sketch: Mutex::new(Sketch::new()?),
        })
    }
}

impl Distribution for SketchDistribution {
    fn record(&self, value: f64) {
        self.sketch.lock().add(value);
    }

    fn digest_and_flush(&self) -> Sketch {
        let mut guard = self.sketch.lock();
        let fresh = guard.fresh();
        mem::replace(&mut *guard, fresh)
    }

    fn count(&self) -> u64 {
        self.sketch.lock().count()
    }
}

thread_local! {
    /// Per-thread shard affinity, computed once from the thread's identity.
    static SHARD_AFFINITY: Cell<Option<usize>> = const { Cell::new(None) };
}

/// Stable per-thread routing value with a roughly uniform distribution.
fn shard_affinity() -> usize {
    SHARD_AFFINITY.with(|cell| match cell.get() {
        Some(affinity) => affinity,
        None => {
            let mut hasher = DefaultHasher::new();
            std::thread::current().id().hash(&mut hasher);
            let affinity = hasher.finish() as usize;
            cell.set(Some(affinity));
            affinity
        }
    })
}

/// A sharded distribution for high-throughput concurrent recording.
///
/// A single accumulator under many concurrent writers is either
/// synchronization-bound or visibly serialized on one lock. This type
/// trades memory for write scalability: it allocates a power-of-two number
/// of independent accumulators and routes each writer to one of them by a
/// hash of its thread identity, so contention only arises between threads
/// that collide on the same shard. Shards are cache-padded so neighbouring
/// accumulators do not share a cache line.
///
/// Flushing visits the shards sequentially. Each shard's flush is atomic on
/// its own, but the pass as a whole is not: a measurement recorded while a
/// flush is in progress lands either in the window being flushed or in the
/// following one. It is never lost and never double-counted, so flush
/// windows have soft boundaries.
pub struct ConcurrentDistribution<D = SketchDistribution> {
    shards: Box<[CachePadded<D>]>,
    shard_mask: usize,
}

impl ConcurrentDistribution<SketchDistribution> {
    /// Create a distribution sized for the available parallelism.
    pub fn new() -> Result<Self> {
        Self::with_min_shards(defaults::SHARDS_PER_CPU * num_cpus::get())
    }

    /// Create a distribution with at least `min_shards` accumulators.
    pub fn with_min_shards(min_shards: usize) -> Result<Self> {
        Self::with_shard_factory(SketchDistribution::new, min_shards)
    }
}

impl<D: Distribution> ConcurrentDistribution<D> {
    /// Create a distribution whose shards come from `factory`.
    ///
    /// The shard count is `min_shards` rounded up to the next power of two;
    /// rounding down would silently reduce the configured parallelism.
    pub fn with_shard_factory<F>(factory: F, min_shards: usize) -> Result<Self>
    where
        F: Fn() -> Result<D>,
    {
        let num_shards = min_shards.max(1).next_power_of_two();
        let shards = (0..num_shards)
            .map(|_| Ok(CachePadded::new(factory()?)))
            .collect::<Result<Vec<_>>>()?
            .into_boxed_slice();

        Ok(Self {
            shards,
            shard_mask: num_shards - 1,
        })
    }

    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }
}

impl<D: Distribution> Distribution for ConcurrentDistribution<D> {
    fn record(&self, value: f64) {
        let target = shard_affinity() & self.shard_mask;
        self.shards[target].record(value);
    }

    fn digest_and_flush(&self) -> Sketch {
        let mut merged = self.shards[0].digest_and_flush();
        for shard in &self.shards[1..] {
            let part = shard.digest_and_flush();
            merged.merge(&part);
        }
        debug!(
            shards = self.shards.len(),
            samples = merged.count(),
            "flushed distribution shards"
        );
        merged
    }

    fn count(&self) -> u64 {
        self.shards.iter().map(|shard| shard.count()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_record_tracks_count() {
        let distribution = SketchDistribution::new().unwrap();
        for value in [1.34, 1.56, 1.0, 58.0] {
            distribution.record(value);
        }
        assert_eq!(distribution.count(), 4);

        for value in [1.32, 1.57, 1.55, 0.456, 2.45] {
            distribution.record(value);
        }
        assert_eq!(distribution.count(), 9);
    }

    /// After a flush the accumulator starts an empty recording window.
    #[test]
    fn test_count_resets_after_flush() {
        let distribution = SketchDistribution::new().unwrap();
        for value in [1.34, 1.56, 1.0] {
            distribution.record(value);
        }

        let digest = distribution.digest_and_flush();
        assert_eq!(digest.count(), 3);
        assert_eq!(distribution.count(), 0);
        assert_eq!(distribution.digest_and_flush().count(), 0);
    }

    #[test]
    fn test_shard_count_rounds_up_to_power_of_two() {
        let distribution =
            ConcurrentDistribution::with_min_shards(5).unwrap();
        assert_eq!(distribution.num_shards(), 8);

        let exact = ConcurrentDistribution::with_min_shards(4).unwrap();
        assert_eq!(exact.num_shards(), 4);

        let minimal = ConcurrentDistribution::with_min_shards(0).unwrap();
        assert_eq!(minimal.num_shards(), 1);
    }

    #[test]
    fn test_shard_factory_error_fails_construction() {
        let result = ConcurrentDistribution::<SketchDistribution>::with_shard_factory(
            || anyhow::bail!("shard factory is broken"),
            4,
        );
        assert!(result.is_err());
    }

    /// Four threads each record a thousand values; one flush sees all of
    /// them, and a second immediate flush sees none.
    #[test]
    fn test_concurrent_record_and_flush_merge() {
        let distribution = Arc::new(ConcurrentDistribution::with_min_shards(4).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let distribution = Arc::clone(&distribution);
                std::thread::spawn(move || {
                    for i in 0..1000 {
                        distribution.record(i as f64);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(distribution.count(), 4000);
        assert_eq!(distribution.digest_and_flush().count(), 4000);
        assert_eq!(distribution.digest_and_flush().count(), 0);
        assert_eq!(distribution.count(), 0);
    }

    #[test]
    fn test_value_and_flush_serializes_and_resets() {
        let distribution = ConcurrentDistribution::with_min_shards(2).unwrap();
        for i in 0..100 {
            distribution.record(i as f64);
        }

        let payload = distribution.value_and_flush();
        assert!(!payload.is_empty());
        assert_eq!(distribution.count(), 0);
    }
}
