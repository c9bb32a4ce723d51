use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::defaults;

/// A bounded sample population used to answer statistical queries without
/// retaining the full value stream.
pub trait SampleReservoir: Send + Sync {
    /// Record a value into the reservoir.
    fn update(&self, value: i64);

    /// Number of samples currently retained.
    fn size(&self) -> usize;

    /// Immutable point-in-time view of the retained samples.
    fn snapshot(&self) -> Snapshot;
}

/// An immutable, sorted view of reservoir samples.
///
/// Statistical queries run against this view without blocking further
/// writes to the reservoir that produced it.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    values: Vec<i64>,
}

impl Snapshot {
    /// Build a snapshot from unordered samples.
    pub fn from_values(mut values: Vec<i64>) -> Self {
        values.sort_unstable();
        Self { values }
    }

    pub fn size(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The retained samples in ascending order.
    pub fn values(&self) -> &[i64] {
        &self.values
    }

    /// Smallest retained sample, or 0 when empty.
    pub fn min(&self) -> i64 {
        self.values.first().copied().unwrap_or(0)
    }

    /// Largest retained sample, or 0 when empty.
    pub fn max(&self) -> i64 {
        self.values.last().copied().unwrap_or(0)
    }

    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().map(|&v| v as f64).sum::<f64>() / self.values.len() as f64
    }

    /// Population standard deviation of the retained samples.
    pub fn std_dev(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let mean = self.mean();
        let variance = self
            .values
            .iter()
            .map(|&v| (v as f64 - mean).powi(2))
            .sum::<f64>()
            / self.values.len() as f64;
        variance.sqrt()
    }

    pub fn median(&self) -> f64 {
        self.value_at_percentile(50.0)
    }

    /// Value at the given percentile (0.0 to 100.0), linearly interpolated
    /// between adjacent samples.
    pub fn value_at_percentile(&self, percentile: f64) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }

        let index = (percentile.clamp(0.0, 100.0) / 100.0) * (self.values.len() - 1) as f64;
        let lower_index = index.floor() as usize;
        let upper_index = index.ceil() as usize;

        if lower_index == upper_index {
            self.values[lower_index] as f64
        } else {
            let lower_value = self.values[lower_index] as f64;
            let upper_value = self.values[upper_index] as f64;
            let weight = index - lower_index as f64;
            lower_value + weight * (upper_value - lower_value)
        }
    }
}

/// Weights decay over at most an hour before priorities are rescaled to a
/// new landmark, keeping the exponents in a safe range.
const RESCALE_INTERVAL: Duration = Duration::from_secs(60 * 60);

struct DecayState {
    /// Retained samples keyed by priority. Priorities are positive finite
    /// floats, whose IEEE 754 bit patterns order the same way the floats
    /// do, so the raw bits serve as the map key.
    samples: BTreeMap<u64, i64>,
    landmark: Instant,
    next_rescale: Instant,
}

impl DecayState {
    fn rescale(&mut self, now: Instant, alpha: f64) {
        let factor = (-alpha * now.duration_since(self.landmark).as_secs_f64()).exp();
        let old = std::mem::take(&mut self.samples);
        self.samples = old
            .into_iter()
            .map(|(priority, value)| ((f64::from_bits(priority) * factor).to_bits(), value))
            .collect();
        self.landmark = now;
        self.next_rescale = now + RESCALE_INTERVAL;
    }
}

/// A forward-decay priority sampling reservoir.
///
/// Keeps a statistically representative, recency-biased sample of an
/// unbounded value stream: each update draws priority `e^(alpha * age) / u`
/// with `u` uniform in (0, 1], and only the highest-priority samples are
/// retained. Newer values win more draws, so the retention window is
/// effectively unbounded but exponentially biased toward the recent past.
///
/// This is the fallback delegate behind the TTL reservoir; its internal
/// state lives under one mutex, which is its own concurrency contract and
/// independent of the lock-free structures that call into it.
pub struct ExponentiallyDecayingReservoir {
    max_size: usize,
    alpha: f64,
    state: Mutex<DecayState>,
}

impl ExponentiallyDecayingReservoir {
    pub fn new() -> Self {
        Self::with_config(defaults::RESERVOIR_SIZE, defaults::RESERVOIR_ALPHA)
    }

    /// `max_size` bounds the retained sample count; `alpha` sets the decay
    /// rate (higher means more recency bias).
    pub fn with_config(max_size: usize, alpha: f64) -> Self {
        let now = Instant::now();
        Self {
            max_size,
            alpha,
            state: Mutex::new(DecayState {
                samples: BTreeMap::new(),
                landmark: now,
                next_rescale: now + RESCALE_INTERVAL,
            }),
        }
    }
}

impl Default for ExponentiallyDecayingReservoir {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleReservoir for ExponentiallyDecayingReservoir {
    fn update(&self, value: i64) {
        let now = Instant::now();
        let mut state = self.state.lock();
        if now >= state.next_rescale {
            state.rescale(now, self.alpha);
        }

        let age = now.duration_since(state.landmark).as_secs_f64();
        let weight = (self.alpha * age).exp();
        // 1 - gen() maps the [0, 1) draw into (0, 1], keeping the division
        // away from zero.
        let uniform: f64 = 1.0 - rand::thread_rng().gen::<f64>();
        let priority = (weight / uniform).to_bits();

        if state.samples.len() < self.max_size {
            state.samples.insert(priority, value);
        } else if let Some(lowest) = state.samples.keys().next().copied() {
            if priority > lowest {
                state.samples.remove(&lowest);
                state.samples.insert(priority, value);
            }
        }
    }

    fn size(&self) -> usize {
        self.state.lock().samples.len()
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot::from_values(self.state.lock().samples.values().copied().collect())
    }
}
