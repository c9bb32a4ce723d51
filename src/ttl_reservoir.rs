use anyhow::Result;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::defaults;
use crate::reservoir::{ExponentiallyDecayingReservoir, SampleReservoir, Snapshot};
use crate::ring_buffer::RingBuffer;

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Time source for TTL bookkeeping, injectable so tests can drive it by
/// hand.
pub trait Clock: Send + Sync {
    /// Nanoseconds since the Unix epoch.
    fn now_ns(&self) -> i64;
}

/// Wall-clock time with nanosecond precision.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ns(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as i64
    }
}

#[derive(Debug, Clone, Copy)]
struct TimestampedValue {
    value: i64,
    recorded_at_ns: i64,
}

impl TimestampedValue {
    fn is_older_than(&self, cutoff_ns: i64) -> bool {
        self.recorded_at_ns < cutoff_ns
    }
}

/// The pre-fill sentinel is older than any reachable cutoff, so an
/// un-overwritten slot reads as stale.
const SENTINEL: TimestampedValue = TimestampedValue {
    value: 0,
    recorded_at_ns: i64::MIN,
};

/// A reservoir that answers queries from a hard time window while write
/// throughput allows, and from a decaying statistical sample once it does
/// not.
///
/// Every update is written to both retention mechanisms: a timestamped ring
/// buffer sized for `ttl_seconds * minimum_rate` samples, and a delegate
/// reservoir. That way the delegate always has a valid population the
/// moment it is needed, with no warm-up gap.
///
/// Which side answers a read is decided fresh on every call:
///
/// - If any slot still holds the sentinel or a sample older than
///   `now - ttl`, the buffer's retention spans the whole TTL window, and
///   queries filter the buffer down to in-window samples.
/// - If every slot is younger than the cutoff, the buffer wrapped inside
///   the window (writes outpaced `minimum_rate`) and can no longer
///   represent it faithfully, so queries defer to the delegate.
///
/// The staleness check is a best-effort scan over a lock-free buffer, so a
/// read racing writers near the TTL boundary may pick either side for one
/// cycle. Both sides give valid answers; the ambiguity is accepted
/// imprecision, not an error.
pub struct TtlReservoir<R = ExponentiallyDecayingReservoir, C = SystemClock> {
    delegate: R,
    buffer: RingBuffer<TimestampedValue>,
    ttl_ns: i64,
    clock: C,
}

impl TtlReservoir {
    /// Default TTL window backed by a fresh decaying reservoir.
    pub fn new() -> Result<Self> {
        Self::with_ttl(defaults::TTL_SECONDS)
    }

    pub fn with_ttl(ttl_seconds: u64) -> Result<Self> {
        Self::with_parts(
            ExponentiallyDecayingReservoir::new(),
            ttl_seconds,
            defaults::MINIMUM_RATE,
            SystemClock,
        )
    }
}

impl<R: SampleReservoir, C: Clock> TtlReservoir<R, C> {
    /// Assemble a reservoir from its collaborators.
    ///
    /// `minimum_rate` is the write rate (per second) up to which the buffer
    /// must be able to hold a full TTL window; together with `ttl_seconds`
    /// it fixes the buffer capacity. Zero for either is a configuration
    /// error.
    pub fn with_parts(delegate: R, ttl_seconds: u64, minimum_rate: u64, clock: C) -> Result<Self> {
        if ttl_seconds == 0 {
            anyhow::bail!("ttl must be a positive number of seconds but was: 0");
        }
        if minimum_rate == 0 {
            anyhow::bail!("minimum rate must be a positive number per second but was: 0");
        }
        let capacity = ttl_seconds
            .checked_mul(minimum_rate)
            .and_then(|c| usize::try_from(c).ok())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "ttl {} s at minimum rate {}/s overflows the buffer capacity",
                    ttl_seconds,
                    minimum_rate
                )
            })?;
        let ttl_ns = (ttl_seconds as i64)
            .checked_mul(NANOS_PER_SEC)
            .ok_or_else(|| anyhow::anyhow!("ttl {} s overflows nanosecond precision", ttl_seconds))?;

        Ok(Self {
            delegate,
            buffer: RingBuffer::new(SENTINEL, capacity)?,
            ttl_ns,
            clock,
        })
    }

    fn cutoff_ns(&self) -> i64 {
        self.clock.now_ns().saturating_sub(self.ttl_ns)
    }

    /// True when the buffer retention still spans the whole TTL window.
    ///
    /// It is hard to reliably locate the tail of a moving buffer, so every
    /// element is checked instead.
    fn buffer_covers_window(&self, cutoff_ns: i64) -> bool {
        self.buffer.any_match(|sample| sample.is_older_than(cutoff_ns))
    }

    fn in_window_values(&self, cutoff_ns: i64) -> Vec<i64> {
        self.buffer
            .snapshot(|sample| !sample.is_older_than(cutoff_ns), |sample| sample.value)
    }
}

impl<R: SampleReservoir, C: Clock> SampleReservoir for TtlReservoir<R, C> {
    fn update(&self, value: i64) {
        self.buffer.add(TimestampedValue {
            value,
            recorded_at_ns: self.clock.now_ns(),
        });
        self.delegate.update(value);
    }

    fn size(&self) -> usize {
        let cutoff_ns = self.cutoff_ns();
        if self.buffer_covers_window(cutoff_ns) {
            // Reporting paths only need this occasionally, so the full
            // filtered pass is affordable.
            self.in_window_values(cutoff_ns).len()
        } else {
            self.delegate.size()
        }
    }

    fn snapshot(&self) -> Snapshot {
        let cutoff_ns = self.cutoff_ns();
        if self.buffer_covers_window(cutoff_ns) {
            Snapshot::from_values(self.in_window_values(cutoff_ns))
        } else {
            self.delegate.snapshot()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
    use std::sync::Arc;

    const TTL_SECONDS: u64 = 10;
    const MINIMUM_RATE: u64 = 10;
    const BUFFER_SIZE: usize = (TTL_SECONDS * MINIMUM_RATE) as usize;

    /// Hand-advanced clock shared between the test and the reservoir.
    #[derive(Clone, Default)]
    struct ManualClock {
        now_ns: Arc<AtomicI64>,
    }

    impl ManualClock {
        fn advance_secs(&self, seconds: i64) {
            self.now_ns
                .fetch_add(seconds * NANOS_PER_SEC, Ordering::Relaxed);
        }
    }

    impl Clock for ManualClock {
        fn now_ns(&self) -> i64 {
            self.now_ns.load(Ordering::Relaxed)
        }
    }

    /// Delegate double that records every interaction.
    #[derive(Clone, Default)]
    struct RecordingReservoir {
        inner: Arc<RecordingInner>,
    }

    #[derive(Default)]
    struct RecordingInner {
        values: Mutex<Vec<i64>>,
        size_calls: AtomicUsize,
        snapshot_calls: AtomicUsize,
    }

    impl RecordingReservoir {
        fn update_count(&self) -> usize {
            self.inner.values.lock().len()
        }

        fn size_calls(&self) -> usize {
            self.inner.size_calls.load(Ordering::Relaxed)
        }

        fn snapshot_calls(&self) -> usize {
            self.inner.snapshot_calls.load(Ordering::Relaxed)
        }
    }

    impl SampleReservoir for RecordingReservoir {
        fn update(&self, value: i64) {
            self.inner.values.lock().push(value);
        }

        fn size(&self) -> usize {
            self.inner.size_calls.fetch_add(1, Ordering::Relaxed);
            self.inner.values.lock().len()
        }

        fn snapshot(&self) -> Snapshot {
            self.inner.snapshot_calls.fetch_add(1, Ordering::Relaxed);
            Snapshot::from_values(self.inner.values.lock().clone())
        }
    }

    fn reservoir_under_test() -> (
        TtlReservoir<RecordingReservoir, ManualClock>,
        RecordingReservoir,
        ManualClock,
    ) {
        let delegate = RecordingReservoir::default();
        let clock = ManualClock::default();
        let reservoir =
            TtlReservoir::with_parts(delegate.clone(), TTL_SECONDS, MINIMUM_RATE, clock.clone())
                .unwrap();
        (reservoir, delegate, clock)
    }

    #[test]
    fn test_construction_rejects_zero_ttl_and_rate() {
        let clock = ManualClock::default();
        assert!(
            TtlReservoir::with_parts(RecordingReservoir::default(), 0, 10, clock.clone()).is_err()
        );
        assert!(TtlReservoir::with_parts(RecordingReservoir::default(), 10, 0, clock).is_err());
    }

    /// Below the buffer capacity the window is answered internally; the
    /// delegate still receives every update but is never read.
    #[test]
    fn test_internal_buffer_used_when_write_rate_is_low() {
        let (reservoir, delegate, _clock) = reservoir_under_test();

        for i in 0..(BUFFER_SIZE - 1) as i64 {
            reservoir.update(i);
        }

        assert_eq!(reservoir.size(), BUFFER_SIZE - 1);
        assert_eq!(reservoir.snapshot().size(), BUFFER_SIZE - 1);
        assert_eq!(delegate.update_count(), BUFFER_SIZE - 1);
        assert_eq!(delegate.size_calls(), 0);
        assert_eq!(delegate.snapshot_calls(), 0);
    }

    /// Once the buffer wraps inside the window, reads defer to the
    /// delegate.
    #[test]
    fn test_delegate_used_when_write_rate_is_high() {
        let (reservoir, delegate, _clock) = reservoir_under_test();

        for i in 0..BUFFER_SIZE as i64 {
            reservoir.update(i);
        }

        assert_eq!(reservoir.size(), BUFFER_SIZE);
        assert_eq!(delegate.size_calls(), 1);

        reservoir.snapshot();
        assert_eq!(delegate.snapshot_calls(), 1);
    }

    #[test]
    fn test_values_in_buffer_expire() {
        let (reservoir, _delegate, clock) = reservoir_under_test();

        for i in 0..10 {
            reservoir.update(i);
        }
        assert_eq!(reservoir.size(), 10);

        clock.advance_secs(1);
        for i in 0..5 {
            reservoir.update(i);
        }
        assert_eq!(reservoir.size(), 15);

        clock.advance_secs(9);
        assert_eq!(reservoir.size(), 15);
        assert_eq!(
            reservoir.snapshot().values(),
            &[0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 6, 7, 8, 9]
        );

        clock.advance_secs(1);
        assert_eq!(reservoir.size(), 5);
        assert_eq!(reservoir.snapshot().values(), &[0, 1, 2, 3, 4]);
    }

    /// The mode decision is recomputed per read: a reservoir that was
    /// delegate-backed flips back once its buffer contents go stale.
    #[test]
    fn test_mode_decision_is_not_sticky() {
        let (reservoir, delegate, clock) = reservoir_under_test();

        for i in 0..BUFFER_SIZE as i64 {
            reservoir.update(i);
        }
        assert_eq!(reservoir.size(), BUFFER_SIZE);
        assert_eq!(delegate.size_calls(), 1);

        clock.advance_secs(TTL_SECONDS as i64 + 1);
        assert_eq!(reservoir.size(), 0);
        assert_eq!(delegate.size_calls(), 1);
    }
}
