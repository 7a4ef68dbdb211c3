//! Ring geometry: power-of-two capacity and wrap mask.
//!
//! Every index computation in the engine goes through [`RingGeometry`].
//! The power-of-two invariant is enforced once, at construction; the
//! per-operation helpers only mask.

use crate::error::{Result, RingError};

/// Validated ring size.
///
/// `capacity` is always a non-zero power of two and `wrap_mask`
/// is always `capacity - 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingGeometry {
    capacity: u32,
    wrap_mask: u32,
}

impl RingGeometry {
    /// Smallest power-of-two capacity that holds `requested` slots.
    ///
    /// Fails with `InvalidSize` for a zero request and with
    /// `SizeExceedsMax` when the rounded size is larger than the
    /// hardware-fixed `max`.
    pub fn for_size(requested: u32, max: u32) -> Result<Self> {
        if requested == 0 {
            return Err(RingError::InvalidSize(requested));
        }
        let capacity = requested
            .checked_next_power_of_two()
            .ok_or(RingError::SizeExceedsMax { requested, max })?;
        if capacity > max {
            return Err(RingError::SizeExceedsMax { requested, max });
        }
        Ok(Self {
            capacity,
            wrap_mask: capacity - 1,
        })
    }

    /// Geometry for an exact capacity; no rounding.
    pub fn exact(capacity: u32, max: u32) -> Result<Self> {
        if capacity == 0 || !capacity.is_power_of_two() {
            return Err(RingError::InvalidSize(capacity));
        }
        Self::for_size(capacity, max)
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    #[inline]
    pub fn wrap_mask(&self) -> u32 {
        self.wrap_mask
    }

    /// Reduce an unbounded counter into `[0, capacity)`.
    #[inline(always)]
    pub fn wrap(&self, index: u32) -> u32 {
        index & self.wrap_mask
    }

    /// `(index + n) & wrap_mask`
    #[inline(always)]
    pub fn advance(&self, index: u32, n: u32) -> u32 {
        index.wrapping_add(n) & self.wrap_mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rounds_up_to_power_of_two() {
        let g = RingGeometry::for_size(5, 1024).unwrap();
        assert_eq!(g.capacity(), 8);
        assert_eq!(g.wrap_mask(), 7);

        let g = RingGeometry::for_size(8, 1024).unwrap();
        assert_eq!(g.capacity(), 8);

        let g = RingGeometry::for_size(1, 1024).unwrap();
        assert_eq!(g.capacity(), 1);
        assert_eq!(g.wrap_mask(), 0);
    }

    #[test]
    fn test_rejects_zero_and_oversize() {
        assert_eq!(RingGeometry::for_size(0, 1024), Err(RingError::InvalidSize(0)));
        assert_eq!(
            RingGeometry::for_size(1025, 1024),
            Err(RingError::SizeExceedsMax { requested: 1025, max: 1024 })
        );
        // 600 rounds to 1024, which is over a non-power-of-two max
        assert!(RingGeometry::for_size(600, 1000).is_err());
        assert!(RingGeometry::for_size(u32::MAX, u32::MAX).is_err());
    }

    #[test]
    fn test_exact_requires_power_of_two() {
        assert_eq!(RingGeometry::exact(12, 1024), Err(RingError::InvalidSize(12)));
        assert_eq!(RingGeometry::exact(16, 1024).unwrap().capacity(), 16);
        assert!(RingGeometry::exact(2048, 1024).is_err());
    }

    #[test]
    fn test_advance_wraps() {
        let g = RingGeometry::for_size(8, 1024).unwrap();
        assert_eq!(g.advance(6, 1), 7);
        assert_eq!(g.advance(7, 1), 0);
        assert_eq!(g.advance(6, 3), 1);
        assert_eq!(g.wrap(20), 4);
        assert_eq!(g.advance(u32::MAX, 1), 0);
    }
}
