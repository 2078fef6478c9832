//! # Priority Allocator
//!
//! Hands out free rule priorities above a reserved band. Claimed priorities
//! are recorded before being returned so repeated calls within one planning
//! pass never collide.

use std::collections::BTreeSet;

/// Allocates the smallest free integer priority at or above a floor.
///
/// No semantic meaning is attached to the numeric value beyond band
/// membership and uniqueness.
#[derive(Debug, Default)]
pub struct PriorityAllocator {
    taken: BTreeSet<u16>,
}

impl PriorityAllocator {
    pub fn new(existing: impl IntoIterator<Item = u16>) -> Self {
        Self {
            taken: existing.into_iter().collect(),
        }
    }

    /// Smallest integer >= `floor` not already taken; claims it immediately
    pub fn next(&mut self, floor: u16) -> u16 {
        let mut candidate = floor;
        while self.taken.contains(&candidate) {
            candidate += 1;
        }
        self.taken.insert(candidate);
        candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_returns_floor_when_free() {
        let mut alloc = PriorityAllocator::new([]);
        assert_eq!(alloc.next(4), 4);
    }

    #[test]
    fn test_next_skips_taken_priorities() {
        let mut alloc = PriorityAllocator::new([4, 5, 7]);
        assert_eq!(alloc.next(4), 6);
        assert_eq!(alloc.next(4), 8);
    }

    #[test]
    fn test_repeated_calls_never_collide() {
        let mut alloc = PriorityAllocator::new([4]);
        let mut seen = std::collections::BTreeSet::new();
        for _ in 0..50 {
            assert!(seen.insert(alloc.next(4)));
        }
        assert!(!seen.contains(&4));
    }

    #[test]
    fn test_floor_respected_above_existing() {
        let mut alloc = PriorityAllocator::new([1, 2, 3]);
        assert_eq!(alloc.next(10), 10);
    }
}
