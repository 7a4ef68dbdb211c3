//! Memory-mapped register access.
//!
//! The ring consumes this interface for the doorbell and the
//! administrative path; it never implements device registers itself.
//!
//! # Implementors
//!
//! - `MmioRegion` (dring-module): volatile access over a mapped BAR.
//! - `HeapRegisters` (dring-module): in-memory register file, used by
//!   the simulator and tests.
//!
//! **Contract:** accesses to the same region are not reordered by the
//! compiler or CPU relative to each other beyond what the explicit
//! barriers in [`crate::barrier`] permit.

use std::sync::Arc;

/// 8/16/32-bit register access at byte offsets.
pub trait RegisterIo: Send + Sync {
    fn read_u8(&self, offset: usize) -> u8;
    fn read_u16(&self, offset: usize) -> u16;
    fn read_u32(&self, offset: usize) -> u32;

    fn write_u8(&self, offset: usize, value: u8);
    fn write_u16(&self, offset: usize, value: u16);
    fn write_u32(&self, offset: usize, value: u32);

    /// 64-bit value as a low/high 32-bit pair.
    fn write_u64(&self, offset: usize, value: u64) {
        self.write_u32(offset, value as u32);
        self.write_u32(offset + 4, (value >> 32) as u32);
    }

    fn read_u64(&self, offset: usize) -> u64 {
        let lo = self.read_u32(offset) as u64;
        let hi = self.read_u32(offset + 4) as u64;
        lo | (hi << 32)
    }
}

impl<T: RegisterIo + ?Sized> RegisterIo for Arc<T> {
    #[inline] fn read_u8(&self, offset: usize) -> u8 { (**self).read_u8(offset) }
    #[inline] fn read_u16(&self, offset: usize) -> u16 { (**self).read_u16(offset) }
    #[inline] fn read_u32(&self, offset: usize) -> u32 { (**self).read_u32(offset) }
    #[inline] fn write_u8(&self, offset: usize, value: u8) { (**self).write_u8(offset, value) }
    #[inline] fn write_u16(&self, offset: usize, value: u16) { (**self).write_u16(offset, value) }
    #[inline] fn write_u32(&self, offset: usize, value: u32) { (**self).write_u32(offset, value) }
}

impl<T: RegisterIo + ?Sized> RegisterIo for &T {
    #[inline] fn read_u8(&self, offset: usize) -> u8 { (**self).read_u8(offset) }
    #[inline] fn read_u16(&self, offset: usize) -> u16 { (**self).read_u16(offset) }
    #[inline] fn read_u32(&self, offset: usize) -> u32 { (**self).read_u32(offset) }
    #[inline] fn write_u8(&self, offset: usize, value: u8) { (**self).write_u8(offset, value) }
    #[inline] fn write_u16(&self, offset: usize, value: u16) { (**self).write_u16(offset, value) }
    #[inline] fn write_u32(&self, offset: usize, value: u32) { (**self).write_u32(offset, value) }
}
