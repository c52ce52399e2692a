//! Fixed-capacity ring indexed by an ever-increasing sequence number.

use std::num::NonZeroUsize;

/// A ring of `capacity` slots addressed by `i32` sequence numbers.
///
/// Sequence `n` lives in slot `n mod capacity`. The ring does not track
/// which sequence currently owns a slot; callers store that alongside the
/// value when they need to detect staleness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ring<T> {
    slots: Vec<T>,
    mask: Option<usize>,
}

impl<T: Clone + Default> Ring<T> {
    /// Creates a ring with every slot set to `T::default()`.
    ///
    /// Capacities above `i32::MAX` are clamped.
    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        let cap = capacity.get().min(i32::MAX as usize);
        let mask = cap.is_power_of_two().then_some(cap - 1);
        Self {
            slots: vec![T::default(); cap],
            mask,
        }
    }

    /// Resets every slot to `T::default()`.
    pub fn clear(&mut self) {
        self.slots.fill(T::default());
    }
}

impl<T> Ring<T> {
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Capacity as a sequence distance.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn span(&self) -> i32 {
        self.slots.len() as i32
    }

    /// Slot index for a sequence number.
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub fn index(&self, sequence: i32) -> usize {
        match self.mask {
            Some(mask) => (sequence as u32 as usize) & mask,
            None => sequence.rem_euclid(self.span()) as usize,
        }
    }

    #[must_use]
    pub fn at(&self, sequence: i32) -> &T {
        &self.slots[self.index(sequence)]
    }

    pub fn at_mut(&mut self, sequence: i32) -> &mut T {
        let idx = self.index(sequence);
        &mut self.slots[idx]
    }

    /// Overwrites the slot for `sequence`.
    pub fn put(&mut self, sequence: i32, value: T) {
        *self.at_mut(sequence) = value;
    }
}
