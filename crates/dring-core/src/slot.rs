//! Hardware-visible descriptor slot.
//!
//! Every slot carries the same completion header followed by a
//! device-specific payload. A ring is homogeneous: the payload type is
//! picked once, as the ring's type parameter, instead of reinterpreting
//! one layout per descriptor.
//!
//! ```text
//! 0x00  done        u8   set by hardware, cleared by software before reuse
//! 0x01  error       u8   set by hardware on failure
//! 0x02  irq_en      u8   raise an interrupt when this slot completes
//! 0x03  chained     u8   more descriptors of the same request follow
//! 0x04  error_code  u8   device error code (0 = none)
//! 0x05  _rsvd       [u8; 3]
//! 0x08  request_ref u64  opaque back-reference, round-tripped
//! 0x10  payload     P
//! ```

use core::ptr;
use core::sync::atomic::{AtomicU8, Ordering};

use crate::request::{status, Completion, RequestRef, RingRequest};

#[repr(C, align(32))]
#[derive(Debug, Clone, Copy, Default)]
pub struct DescriptorSlot<P> {
    pub done: u8,
    pub error: u8,
    pub irq_en: u8,
    pub chained: u8,
    pub error_code: u8,
    pub _rsvd: [u8; 3],
    pub request_ref: RequestRef,
    pub payload: P,
}

impl<P: Payload> DescriptorSlot<P> {
    /// A freshly filled slot: completion flags clear, no interrupt.
    #[inline]
    pub fn fresh(request_ref: RequestRef, payload: P, chained: bool) -> Self {
        Self {
            done: 0,
            error: 0,
            irq_en: 0,
            chained: chained as u8,
            error_code: 0,
            _rsvd: [0; 3],
            request_ref,
            payload,
        }
    }

    /// Size of one slot in the DMA region (bytes).
    pub const SIZE: usize = core::mem::size_of::<Self>();

    /// Read the `done` flag.
    ///
    /// # Safety
    /// `slot` must point to a live, aligned slot.
    #[inline(always)]
    pub unsafe fn load_done(slot: *const Self) -> bool {
        let done = &*(ptr::addr_of!((*slot).done) as *const AtomicU8);
        done.load(Ordering::Acquire) != 0
    }

    /// Publish completion: status fields first, `done` last.
    ///
    /// # Safety
    /// `slot` must point to a live, aligned slot owned by the device side.
    #[inline(always)]
    pub unsafe fn store_done(slot: *mut Self) {
        let done = &*(ptr::addr_of!((*slot).done) as *const AtomicU8);
        done.store(1, Ordering::Release);
    }
}

/// Device-specific descriptor body.
pub trait Payload: Copy + Default + Send + 'static {
    /// Software request this payload is built from.
    type Request: RingRequest;

    /// Build descriptor number `part` (of `request.descriptor_count()`).
    fn build(request: &Self::Request, part: usize) -> Self;

    /// Translate hardware status of a completed slot.
    fn translate(slot: &DescriptorSlot<Self>) -> Completion {
        let mut completion = Completion::success(slot.request_ref);
        if slot.error != 0 {
            completion.status |= status::DATA_ERROR;
        }
        completion
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, Default)]
    struct Word(u64);

    struct Req(u64);

    impl RingRequest for Req {
        fn request_ref(&self) -> RequestRef {
            RequestRef(self.0)
        }
        fn mark(&mut self, _status: u32) {}
    }

    impl Payload for Word {
        type Request = Req;
        fn build(request: &Req, part: usize) -> Self {
            Word(request.0 * 10 + part as u64)
        }
    }

    #[test]
    fn test_layout() {
        assert_eq!(DescriptorSlot::<Word>::SIZE, 32);
        assert_eq!(core::mem::align_of::<DescriptorSlot<Word>>(), 32);
        assert_eq!(core::mem::offset_of!(DescriptorSlot<Word>, request_ref), 8);
        assert_eq!(core::mem::offset_of!(DescriptorSlot<Word>, payload), 16);
    }

    #[test]
    fn test_done_flag_round_trip() {
        let mut slot = DescriptorSlot::fresh(RequestRef(7), Word::build(&Req(7), 1), false);
        assert_eq!(slot.payload.0, 71);
        unsafe {
            assert!(!DescriptorSlot::load_done(&slot));
            DescriptorSlot::store_done(&mut slot);
            assert!(DescriptorSlot::load_done(&slot));
        }
    }

    #[test]
    fn test_default_translate() {
        let mut slot = DescriptorSlot::fresh(RequestRef(3), Word(0), false);
        assert!(Word::translate(&slot).is_ok());
        slot.error = 1;
        let c = Word::translate(&slot);
        assert_eq!(c.request, RequestRef(3));
        assert_eq!(c.status, status::DATA_ERROR);
    }
}
