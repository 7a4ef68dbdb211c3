//! Register back-ends for [`RegisterIo`].
//!
//! - [`MmioRegion`]: volatile loads/stores over a mapped BAR.
//! - [`HeapRegisters`]: an in-memory register file of 32-bit words.
//!   Narrow accesses read-modify-write the containing word atomically,
//!   so a device thread and the driver can share one file.

use std::sync::atomic::{AtomicU32, Ordering};

use dring_core::regs::RegisterIo;

/// Volatile register window over mapped device memory.
pub struct MmioRegion {
    base: *mut u8,
    len: usize,
}

// Safety: MMIO accesses are single volatile loads/stores; ordering
// against descriptor memory is the ring's barrier responsibility.
unsafe impl Send for MmioRegion {}
unsafe impl Sync for MmioRegion {}

impl MmioRegion {
    /// Wrap a mapped register window.
    ///
    /// # Safety
    /// - `base` must point to `len` bytes of mapped device memory.
    /// - The mapping must outlive this struct.
    pub unsafe fn new(base: *mut u8, len: usize) -> Self {
        Self { base, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline(always)]
    fn in_bounds(&self, offset: usize, width: usize) -> bool {
        offset % width == 0 && offset + width <= self.len
    }

    #[inline(always)]
    unsafe fn read<T: Copy>(&self, offset: usize) -> T {
        std::ptr::read_volatile(self.base.add(offset) as *const T)
    }

    #[inline(always)]
    unsafe fn write<T: Copy>(&self, offset: usize, value: T) {
        std::ptr::write_volatile(self.base.add(offset) as *mut T, value)
    }
}

impl RegisterIo for MmioRegion {
    fn read_u8(&self, offset: usize) -> u8 {
        if !self.in_bounds(offset, 1) {
            tracing::warn!(offset, "mmio read_u8 out of range");
            return u8::MAX;
        }
        unsafe { self.read(offset) }
    }

    fn read_u16(&self, offset: usize) -> u16 {
        if !self.in_bounds(offset, 2) {
            tracing::warn!(offset, "mmio read_u16 out of range");
            return u16::MAX;
        }
        unsafe { self.read(offset) }
    }

    fn read_u32(&self, offset: usize) -> u32 {
        if !self.in_bounds(offset, 4) {
            tracing::warn!(offset, "mmio read_u32 out of range");
            return u32::MAX;
        }
        unsafe { self.read(offset) }
    }

    fn write_u8(&self, offset: usize, value: u8) {
        if !self.in_bounds(offset, 1) {
            tracing::warn!(offset, value, "mmio write_u8 out of range");
            return;
        }
        unsafe { self.write(offset, value) }
    }

    fn write_u16(&self, offset: usize, value: u16) {
        if !self.in_bounds(offset, 2) {
            tracing::warn!(offset, value, "mmio write_u16 out of range");
            return;
        }
        unsafe { self.write(offset, value) }
    }

    fn write_u32(&self, offset: usize, value: u32) {
        if !self.in_bounds(offset, 4) {
            tracing::warn!(offset, value, "mmio write_u32 out of range");
            return;
        }
        unsafe { self.write(offset, value) }
    }
}

/// In-memory register file.
///
/// Out-of-range reads return all ones (what a PCI read of an absent
/// register returns); out-of-range writes are dropped.
pub struct HeapRegisters {
    words: Box<[AtomicU32]>,
}

impl HeapRegisters {
    /// Register file covering `bytes` (rounded up to whole words).
    pub fn new(bytes: usize) -> Self {
        let n = bytes.div_ceil(4);
        Self {
            words: (0..n).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.words.len() * 4
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    #[inline]
    fn word(&self, offset: usize) -> Option<&AtomicU32> {
        self.words.get(offset / 4)
    }

    fn read_bits(&self, offset: usize, width: usize) -> Option<u32> {
        if offset % width != 0 {
            return None;
        }
        let word = self.word(offset)?.load(Ordering::Acquire);
        let shift = (offset % 4) * 8;
        let mask = if width == 4 { u32::MAX } else { (1u32 << (width * 8)) - 1 };
        Some((word >> shift) & mask)
    }

    fn write_bits(&self, offset: usize, width: usize, value: u32) -> bool {
        if offset % width != 0 {
            return false;
        }
        let Some(word) = self.word(offset) else {
            return false;
        };
        if width == 4 {
            word.store(value, Ordering::Release);
            return true;
        }
        let shift = (offset % 4) * 8;
        let mask = ((1u32 << (width * 8)) - 1) << shift;
        let _ = word.fetch_update(Ordering::AcqRel, Ordering::Acquire, |old| {
            Some((old & !mask) | ((value << shift) & mask))
        });
        true
    }
}

impl RegisterIo for HeapRegisters {
    fn read_u8(&self, offset: usize) -> u8 {
        self.read_bits(offset, 1).map(|v| v as u8).unwrap_or_else(|| {
            tracing::warn!(offset, "register read_u8 out of range");
            u8::MAX
        })
    }

    fn read_u16(&self, offset: usize) -> u16 {
        self.read_bits(offset, 2).map(|v| v as u16).unwrap_or_else(|| {
            tracing::warn!(offset, "register read_u16 out of range");
            u16::MAX
        })
    }

    fn read_u32(&self, offset: usize) -> u32 {
        self.read_bits(offset, 4).unwrap_or_else(|| {
            tracing::warn!(offset, "register read_u32 out of range");
            u32::MAX
        })
    }

    fn write_u8(&self, offset: usize, value: u8) {
        if !self.write_bits(offset, 1, value as u32) {
            tracing::warn!(offset, value, "register write_u8 out of range");
        }
    }

    fn write_u16(&self, offset: usize, value: u16) {
        if !self.write_bits(offset, 2, value as u32) {
            tracing::warn!(offset, value, "register write_u16 out of range");
        }
    }

    fn write_u32(&self, offset: usize, value: u32) {
        if !self.write_bits(offset, 4, value) {
            tracing::warn!(offset, value, "register write_u32 out of range");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_narrow_writes_share_word() {
        let regs = HeapRegisters::new(16);
        regs.write_u32(4, 0x1122_3344);
        regs.write_u8(5, 0xAA);
        assert_eq!(regs.read_u32(4), 0x1122_AA44);
        regs.write_u16(6, 0xBEEF);
        assert_eq!(regs.read_u32(4), 0xBEEF_AA44);
        assert_eq!(regs.read_u16(4), 0xAA44);
        assert_eq!(regs.read_u8(7), 0xBE);
    }

    #[test]
    fn test_heap_u64_pair() {
        let regs = HeapRegisters::new(16);
        regs.write_u64(8, 0xDEAD_BEEF_0000_1000);
        assert_eq!(regs.read_u32(8), 0x0000_1000);
        assert_eq!(regs.read_u32(12), 0xDEAD_BEEF);
        assert_eq!(regs.read_u64(8), 0xDEAD_BEEF_0000_1000);
    }

    #[test]
    fn test_heap_out_of_range() {
        let regs = HeapRegisters::new(8);
        assert_eq!(regs.read_u32(8), u32::MAX);
        assert_eq!(regs.read_u16(1), u16::MAX); // misaligned
        regs.write_u32(64, 5);
        assert_eq!(regs.read_u32(0), 0);
        assert_eq!(regs.read_u32(4), 0);
    }

    #[test]
    fn test_mmio_over_plain_memory() {
        let mut backing = [0u32; 4];
        let mmio = unsafe { MmioRegion::new(backing.as_mut_ptr() as *mut u8, 16) };
        mmio.write_u32(0, 0xCAFE_F00D);
        mmio.write_u16(4, 0x1234);
        assert_eq!(mmio.read_u32(0), 0xCAFE_F00D);
        assert_eq!(mmio.read_u16(4), 0x1234);
        assert_eq!(mmio.read_u32(16), u32::MAX);
        drop(mmio);
        assert_eq!(backing[0], 0xCAFE_F00D);
    }
}
