//! Producer/consumer memory barriers.
//!
//! Exactly two ordering points exist in the engine:
//!
//! - [`wmb`]: descriptor writes become visible before the index/doorbell
//!   update (producer side).
//! - [`rmb`]: an observed `done` flag is ordered before reads of the
//!   descriptor status and payload (consumer side).
//!
//! Each emits the architecture's DMA-visible fence and a Rust fence so
//! the compiler and the language memory model agree with the hardware.

use core::sync::atomic::{fence, Ordering};

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        #[inline(always)]
        fn store_fence() {
            // SAFETY: sfence has no safety requirements.
            unsafe { core::arch::x86_64::_mm_sfence() };
        }

        #[inline(always)]
        fn load_fence() {
            // SAFETY: lfence has no safety requirements.
            unsafe { core::arch::x86_64::_mm_lfence() };
        }
    } else if #[cfg(target_arch = "aarch64")] {
        #[inline(always)]
        fn store_fence() {
            // SAFETY: barrier instruction only.
            unsafe { core::arch::asm!("dmb oshst", options(nostack, preserves_flags)) };
        }

        #[inline(always)]
        fn load_fence() {
            // SAFETY: barrier instruction only.
            unsafe { core::arch::asm!("dmb oshld", options(nostack, preserves_flags)) };
        }
    } else {
        #[inline(always)]
        fn store_fence() {
            fence(Ordering::SeqCst);
        }

        #[inline(always)]
        fn load_fence() {
            fence(Ordering::SeqCst);
        }
    }
}

/// Write memory barrier.
#[inline(always)]
pub fn wmb() {
    fence(Ordering::Release);
    store_fence();
}

/// Read memory barrier.
#[inline(always)]
pub fn rmb() {
    load_fence();
    fence(Ordering::Acquire);
}
