//! Hardware queue assignment bitmap.
//!
//! Tracks which of a fixed set of hardware queues are bound to this
//! function (discovered once) and which of those are currently
//! assigned to a software queue. Claiming is a CAS on the assigned
//! word, so concurrent setup calls never hand out the same queue.

use core::ops::Range;
use core::sync::atomic::{AtomicU64, Ordering};

/// Number of bits per block
const BITS_PER_BLOCK: usize = 64;

pub struct QueueBitmap {
    /// Queues usable by this function.
    bound: Box<[AtomicU64]>,
    /// Queues handed out by `acquire_*`.
    assigned: Box<[AtomicU64]>,
    len: usize,
}

impl QueueBitmap {
    pub fn new(len: usize) -> Self {
        let num_blocks = len.div_ceil(BITS_PER_BLOCK).max(1);
        let zeroed = || -> Box<[AtomicU64]> { (0..num_blocks).map(|_| AtomicU64::new(0)).collect() };
        Self {
            bound: zeroed(),
            assigned: zeroed(),
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    fn locate(index: usize) -> (usize, u64) {
        (index / BITS_PER_BLOCK, 1u64 << (index % BITS_PER_BLOCK))
    }

    /// Mark queue `index` as usable.
    pub fn bind(&self, index: usize) {
        if index >= self.len {
            return;
        }
        let (block, mask) = Self::locate(index);
        self.bound[block].fetch_or(mask, Ordering::Release);
    }

    pub fn is_bound(&self, index: usize) -> bool {
        if index >= self.len {
            return false;
        }
        let (block, mask) = Self::locate(index);
        self.bound[block].load(Ordering::Acquire) & mask != 0
    }

    pub fn is_assigned(&self, index: usize) -> bool {
        if index >= self.len {
            return false;
        }
        let (block, mask) = Self::locate(index);
        self.assigned[block].load(Ordering::Acquire) & mask != 0
    }

    /// Claim the lowest bound, unassigned queue.
    pub fn acquire_first_free(&self) -> Option<usize> {
        self.acquire_first_free_in(0..self.len)
    }

    /// Claim the lowest bound, unassigned queue inside `range`.
    pub fn acquire_first_free_in(&self, range: Range<usize>) -> Option<usize> {
        let end = range.end.min(self.len);
        if range.start >= end {
            return None;
        }
        let first_block = range.start / BITS_PER_BLOCK;
        let last_block = (end - 1) / BITS_PER_BLOCK;

        for block in first_block..=last_block {
            let window = Self::window(block, range.start, end);
            if let Some(bit) = self.try_claim_from_block(block, window) {
                return Some(block * BITS_PER_BLOCK + bit);
            }
        }
        None
    }

    /// Bits of `block` that fall inside `[start, end)`.
    fn window(block: usize, start: usize, end: usize) -> u64 {
        let lo = (block * BITS_PER_BLOCK).max(start) - block * BITS_PER_BLOCK;
        let hi = (end - block * BITS_PER_BLOCK).min(BITS_PER_BLOCK);
        let upper = if hi == BITS_PER_BLOCK { u64::MAX } else { (1u64 << hi) - 1 };
        upper & !((1u64 << lo) - 1)
    }

    fn try_claim_from_block(&self, block: usize, window: u64) -> Option<usize> {
        loop {
            let assigned = self.assigned[block].load(Ordering::Acquire);
            let candidates = self.bound[block].load(Ordering::Acquire) & !assigned & window;
            if candidates == 0 {
                return None;
            }
            let bit = candidates.trailing_zeros() as usize;
            match self.assigned[block].compare_exchange_weak(
                assigned,
                assigned | (1u64 << bit),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(bit),
                Err(_) => continue,
            }
        }
    }

    /// Return queue `index` to the free set. Returns false if it was
    /// not assigned.
    pub fn release(&self, index: usize) -> bool {
        if index >= self.len {
            return false;
        }
        let (block, mask) = Self::locate(index);
        self.assigned[block].fetch_and(!mask, Ordering::AcqRel) & mask != 0
    }

    pub fn bound_count(&self) -> usize {
        self.bound
            .iter()
            .map(|b| b.load(Ordering::Relaxed).count_ones() as usize)
            .sum()
    }

    pub fn assigned_count(&self) -> usize {
        self.assigned
            .iter()
            .map(|b| b.load(Ordering::Relaxed).count_ones() as usize)
            .sum()
    }
}
