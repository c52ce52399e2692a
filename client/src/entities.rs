//! Parsed-entity ring shared by all buffered snapshots.

use std::num::NonZeroUsize;

use wire::EntityState;

use crate::ring::Ring;

/// Entity states appended in decode order.
///
/// Snapshots refer to a span `[first, first + count)` of this ring by parse
/// index. A span is readable only while it lies within the last `capacity`
/// appended indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEntities {
    ring: Ring<EntityState>,
    next: i32,
}

impl ParseEntities {
    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            ring: Ring::new(capacity),
            next: 0,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Index the next appended entity will receive.
    #[must_use]
    pub const fn next_index(&self) -> i32 {
        self.next
    }

    pub fn push(&mut self, state: EntityState) {
        self.ring.put(self.next, state);
        self.next = self.next.wrapping_add(1);
    }

    /// Parse indices retained, as a sequence distance.
    #[must_use]
    pub fn window(&self) -> i32 {
        self.ring.span()
    }

    /// How far behind the write position `first` lies.
    #[must_use]
    pub const fn age(&self, first: i32) -> i32 {
        self.next.wrapping_sub(first)
    }

    /// Returns `true` if a span starting at `first` is still retained.
    #[must_use]
    pub fn is_retained(&self, first: i32) -> bool {
        self.age(first) < self.ring.span()
    }

    #[must_use]
    pub fn get(&self, index: i32) -> &EntityState {
        self.ring.at(index)
    }

    /// Copies up to `max` entities of a span.
    #[must_use]
    pub fn span(&self, first: i32, count: usize, max: usize) -> Vec<EntityState> {
        (0..count.min(max))
            .map(|i| {
                #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
                let offset = i as i32;
                *self.get(first.wrapping_add(offset))
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.ring.clear();
        self.next = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(number: u16) -> EntityState {
        EntityState {
            number,
            ..EntityState::default()
        }
    }

    #[test]
    fn spans_age_out() {
        let mut entities = ParseEntities::new(NonZeroUsize::new(4).unwrap());
        for n in 0..3 {
            entities.push(state(n));
        }
        assert!(entities.is_retained(0));
        entities.push(state(3));
        assert!(!entities.is_retained(0));
        assert!(entities.is_retained(1));
    }

    #[test]
    fn span_copies_in_order_and_caps() {
        let mut entities = ParseEntities::new(NonZeroUsize::new(8).unwrap());
        for n in 0..6 {
            entities.push(state(n));
        }
        let span = entities.span(2, 4, 3);
        let numbers: Vec<u16> = span.iter().map(|e| e.number).collect();
        assert_eq!(numbers, vec![2, 3, 4]);
    }
}
