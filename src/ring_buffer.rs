use anyhow::Result;
use crossbeam::atomic::AtomicCell;
use std::sync::atomic::{AtomicI64, Ordering};

/// Fixed-capacity ring buffer that overwrites the oldest element on every
/// write.
///
/// The buffer is pre-populated with a sentinel element at construction, so
/// every slot always holds a valid element and readers never observe an
/// uninitialized slot. Writers claim a slot through an atomically
/// incremented position counter and overwrite it with a single atomic
/// store; no operation blocks or spins.
///
/// Reads (`any_match`, `snapshot`) are weakly consistent: they scan the
/// slots without freezing writers, so a concurrent `add` may or may not be
/// visible within a single pass. Callers use the results as a recent-writes
/// heuristic, not as an atomic view.
pub struct RingBuffer<T> {
    slots: Box<[AtomicCell<T>]>,
    position: AtomicI64,
}

impl<T: Copy> RingBuffer<T> {
    /// Create a buffer of `capacity` slots, each holding `sentinel`.
    ///
    /// Zero capacity is a configuration error and fails immediately.
    pub fn new(sentinel: T, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            anyhow::bail!("ring buffer capacity must be a positive integer but was: 0");
        }

        let slots = (0..capacity)
            .map(|_| AtomicCell::new(sentinel))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Ok(Self {
            slots,
            position: AtomicI64::new(0),
        })
    }

    /// Number of slots in the buffer, fixed at construction.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Add an element, evicting exactly one other element (the oldest).
    ///
    /// Multiple concurrent calls interleave arbitrarily; each call writes
    /// some slot exactly once and advances the position counter by one.
    pub fn add(&self, element: T) {
        // The counter is unbounded and eventually wraps into negative
        // representation; mask off the sign bit before the modulo.
        let claimed = self.position.fetch_add(1, Ordering::Relaxed);
        let index = ((claimed & i64::MAX) as u64 % self.slots.len() as u64) as usize;
        self.slots[index].store(element);
    }

    /// Check whether any element matches the predicate, stopping at the
    /// first match.
    ///
    /// The scan starts just after the current write cursor, where the
    /// oldest elements probably are (though the cursor keeps moving), and
    /// wraps around to cover every slot once.
    pub fn any_match<P>(&self, predicate: P) -> bool
    where
        P: Fn(&T) -> bool,
    {
        let start =
            ((self.position.load(Ordering::Relaxed) & i64::MAX) as u64 % self.slots.len() as u64) as usize;

        for slot in &self.slots[start..] {
            if predicate(&slot.load()) {
                return true;
            }
        }

        // Scan the skipped part of the buffer too
        for slot in &self.slots[..start] {
            if predicate(&slot.load()) {
                return true;
            }
        }

        false
    }

    /// Grab a snapshot of the buffer, filtered and transformed.
    ///
    /// This is not an atomic operation and the returned elements are in no
    /// particular order: a write racing the pass may be reflected in zero,
    /// one, or two slots. The result is eventually consistent within one
    /// buffer pass.
    pub fn snapshot<R, P, M>(&self, filter: P, map: M) -> Vec<R>
    where
        P: Fn(&T) -> bool,
        M: Fn(&T) -> R,
    {
        let mut result = Vec::with_capacity(self.slots.len());
        for slot in self.slots.iter() {
            let element = slot.load();
            if filter(&element) {
                result.push(map(&element));
            }
        }
        result
    }
}
