use anyhow::Result;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::reservoir::{SampleReservoir, Snapshot};
use crate::ttl_reservoir::TtlReservoir;

/// A histogram metric with time-bounded retention.
///
/// Pairs a total-update counter with a TTL reservoir: the counter covers
/// the metric's whole lifetime while statistical queries only see samples
/// from the reservoir's retention policy.
pub struct TtlHistogram<R = TtlReservoir> {
    count: AtomicU64,
    reservoir: R,
}

impl TtlHistogram {
    /// Histogram over the default TTL window.
    pub fn new() -> Result<Self> {
        Ok(Self::with_reservoir(TtlReservoir::new()?))
    }

    pub fn with_ttl(ttl_seconds: u64) -> Result<Self> {
        Ok(Self::with_reservoir(TtlReservoir::with_ttl(ttl_seconds)?))
    }
}

impl<R: SampleReservoir> TtlHistogram<R> {
    /// Histogram over a caller-assembled reservoir.
    pub fn with_reservoir(reservoir: R) -> Self {
        Self {
            count: AtomicU64::new(0),
            reservoir,
        }
    }

    /// Record a value.
    pub fn update(&self, value: i64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.reservoir.update(value);
    }

    /// Total number of values recorded over the metric's lifetime.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Point-in-time view of the currently retained samples.
    pub fn snapshot(&self) -> Snapshot {
        self.reservoir.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_is_lifetime_total() {
        let histogram = TtlHistogram::new().unwrap();
        for i in 0..50 {
            histogram.update(i);
        }

        assert_eq!(histogram.count(), 50);
        assert_eq!(histogram.snapshot().size(), 50);
    }

    #[test]
    fn test_snapshot_answers_statistics() {
        let histogram = TtlHistogram::with_ttl(60).unwrap();
        for i in 1..=9 {
            histogram.update(i);
        }

        let snapshot = histogram.snapshot();
        assert_eq!(snapshot.min(), 1);
        assert_eq!(snapshot.max(), 9);
        assert_eq!(snapshot.median(), 5.0);
    }
}
