//! Capacity tracking over `(head, tail, capacity)`.
//!
//! Discipline: **reserved slot**. One slot is always left empty so that
//! `head == tail` means empty and `advance(tail, 1) == head` means full.
//! A ring of capacity N therefore holds at most N - 1 descriptors, and
//! at every observation point:
//!
//! ```text
//! free_count + pending_count == capacity - RESERVED_SLOTS
//! ```
//!
//! Both indices are expected already wrapped into `[0, capacity)`.

/// Slots kept permanently empty to disambiguate full from empty.
pub const RESERVED_SLOTS: u32 = 1;

/// Slots the producer may still write.
#[inline]
pub fn free_count(head: u32, tail: u32, capacity: u32) -> u32 {
    if head > tail {
        head - tail - 1
    } else {
        capacity + head - tail - 1
    }
}

/// Slots written by the producer and not yet drained by the consumer.
#[inline]
pub fn pending_count(head: u32, tail: u32, wrap_mask: u32) -> u32 {
    tail.wrapping_sub(head) & wrap_mask
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_and_full() {
        // empty
        assert_eq!(free_count(0, 0, 8), 7);
        assert_eq!(pending_count(0, 0, 7), 0);
        // full: tail one behind head
        assert_eq!(free_count(3, 2, 8), 0);
        assert_eq!(pending_count(3, 2, 7), 7);
    }

    #[test]
    fn test_invariant_all_positions() {
        for cap in [1u32, 2, 4, 8, 64] {
            for head in 0..cap {
                for tail in 0..cap {
                    let free = free_count(head, tail, cap);
                    let pending = pending_count(head, tail, cap - 1);
                    assert_eq!(free + pending, cap - RESERVED_SLOTS, "cap={} head={} tail={}", cap, head, tail);
                }
            }
        }
    }
}
