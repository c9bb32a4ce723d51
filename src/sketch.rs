use anyhow::Result;
use hdrhistogram::serialization::{Serializer, V2Serializer};
use hdrhistogram::Histogram;
use tracing::warn;

use crate::defaults;

/// Fixed-point scale applied to recorded values, giving the integer-valued
/// histogram three fractional digits of resolution.
const VALUE_SCALE: f64 = 1_000.0;

/// A mergeable, approximate summary of a numeric distribution.
///
/// Wraps an auto-resizing HDR histogram. Merging is associative and
/// commutative, so a set of per-shard sketches can be folded in any order
/// without changing the statistical meaning of the result.
///
/// Recording is total: values are scaled, rounded and clamped to the
/// histogram's non-negative range, and pathological inputs (NaN, infinite)
/// saturate rather than fail.
pub struct Sketch {
    histogram: Histogram<u64>,
}

impl Sketch {
    /// Create an empty sketch at the default precision.
    pub fn new() -> Result<Self> {
        let mut histogram = Histogram::new(defaults::SKETCH_SIGNIFICANT_FIGURES)?;
        histogram.auto(true);
        Ok(Self { histogram })
    }

    /// Create an empty sketch with the same configuration as this one.
    ///
    /// Used as the replacement value when an accumulator flushes; unlike
    /// `new`, a configuration already proven valid cannot fail again.
    pub fn fresh(&self) -> Self {
        let mut histogram = Histogram::new_from(&self.histogram);
        histogram.auto(true);
        Self { histogram }
    }

    /// Record a single observation.
    pub fn add(&mut self, value: f64) {
        // f64 -> u64 casts saturate: NaN to 0, negatives to 0, +inf to max.
        let ticks = (value * VALUE_SCALE).round() as u64;
        self.histogram.saturating_record(ticks);
    }

    /// Fold another sketch into this one.
    ///
    /// With auto-resize enabled a merge cannot fail in practice; if it ever
    /// does, the failure is logged and the affected samples dropped rather
    /// than surfaced to the recording hot path.
    pub fn merge(&mut self, other: &Sketch) {
        if let Err(err) = self.histogram.add(&other.histogram) {
            warn!(?err, "failed to merge sketch shard, dropping its samples");
        }
    }

    /// Total number of recorded observations.
    pub fn count(&self) -> u64 {
        self.histogram.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histogram.is_empty()
    }

    /// Lowest recorded value, or 0.0 when empty.
    pub fn min(&self) -> f64 {
        self.histogram.min() as f64 / VALUE_SCALE
    }

    /// Highest recorded value, or 0.0 when empty.
    pub fn max(&self) -> f64 {
        self.histogram.max() as f64 / VALUE_SCALE
    }

    pub fn mean(&self) -> f64 {
        self.histogram.mean() / VALUE_SCALE
    }

    /// Estimate the value at the given percentile (0.0 to 100.0).
    pub fn value_at_percentile(&self, percentile: f64) -> f64 {
        self.histogram.value_at_percentile(percentile) as f64 / VALUE_SCALE
    }

    /// Serialize the sketch into its compact binary encoding (the V2
    /// histogram wire format).
    ///
    /// Serializing into memory does not fail for any recordable state; the
    /// unreachable error path is logged and yields an empty payload so the
    /// reporter never sees an error from a flush.
    pub fn into_bytes(self) -> Vec<u8> {
        let mut buffer = Vec::new();
        if let Err(err) = V2Serializer::new().serialize(&self.histogram, &mut buffer) {
            warn!(?err, "failed to serialize sketch, emitting empty payload");
            buffer.clear();
        }
        buffer
    }
}
