//! `DmaRegion`: descriptor memory shared with the device.
//!
//! One anonymous, zero-filled, page-rounded mapping per ring. The
//! region's virtual address doubles as its bus address: in user space
//! there is no IOMMU translation, and the simulator reads the same
//! memory the ring writes.
//!
//! The mapping is unmapped on drop. Rings and device views share it
//! through `Arc`, so it outlives whichever side is dropped last.

use dring_core::constants::PAGE_SIZE;
use dring_core::error::{Result, RingError};
use nix::errno::Errno;

pub struct DmaRegion {
    base: *mut u8,
    len: usize,
}

// Safety: the region is plain memory. Concurrent access between the
// producer and the device side is ordered by the ring's barriers and
// the per-slot `done` flag.
unsafe impl Send for DmaRegion {}
unsafe impl Sync for DmaRegion {}

impl DmaRegion {
    /// Map at least `bytes` of zeroed memory, rounded up to whole pages.
    pub fn alloc(bytes: usize) -> Result<Self> {
        let len = bytes.max(1).div_ceil(PAGE_SIZE) * PAGE_SIZE;
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(RingError::MmapFailed(Errno::last() as i32));
        }
        tracing::debug!(len, addr = ptr as usize, "dma region mapped");
        Ok(Self {
            base: ptr as *mut u8,
            len,
        })
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.base
    }

    /// Address the device uses to reach the first byte of the region.
    #[inline]
    pub fn bus_address(&self) -> u64 {
        self.base as u64
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for DmaRegion {
    fn drop(&mut self) {
        if !self.base.is_null() && self.len > 0 {
            unsafe {
                libc::munmap(self.base as *mut libc::c_void, self.len);
            }
            self.base = std::ptr::null_mut();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_rounding_and_zeroed() {
        let region = DmaRegion::alloc(100).unwrap();
        assert_eq!(region.len(), PAGE_SIZE);
        assert_eq!(region.bus_address() % PAGE_SIZE as u64, 0);
        let bytes = unsafe { std::slice::from_raw_parts(region.as_ptr(), region.len()) };
        assert!(bytes.iter().all(|&b| b == 0));

        let region = DmaRegion::alloc(PAGE_SIZE + 1).unwrap();
        assert_eq!(region.len(), 2 * PAGE_SIZE);
    }
}
