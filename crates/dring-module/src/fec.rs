//! FEC encode/decode descriptor formats.
//!
//! A FEC queue carries either encode or decode descriptors, never both,
//! so each direction is its own [`Payload`] and a ring is built for one
//! of them.
//!
//! Decode completions carry decoder results in the descriptor:
//!
//! - `iter`: iterations run, minus one
//! - `crc24b_ind` / `crc_pass`: CRC attached and whether it matched
//! - `et_pass`: early termination (syndrome check) passed
//!
//! Loopback descriptors (HARQ memory moves) report no decoder status.

use dring_core::request::{status, Completion, RequestCheck, RequestRef, RingRequest};
use dring_core::slot::{DescriptorSlot, Payload};

/// A DMA-able buffer: bus address and length in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferRef {
    pub iova: u64,
    pub len: u32,
}

impl BufferRef {
    pub fn new(iova: u64, len: u32) -> Self {
        Self { iova, len }
    }
}

/// Device descriptor error codes.
pub mod desc_error {
    pub const NONE: u8 = 0x0;
    pub const K_P_OUT_OF_RANGE: u8 = 0x1;
    pub const Z_C_NOT_LEGAL: u8 = 0x2;
    pub const DESC_OFFSET_ERR: u8 = 0x3;
    pub const DESC_READ_FAIL: u8 = 0x4;
    pub const DESC_READ_TIMEOUT: u8 = 0x5;
    pub const DESC_READ_TLP_POISONED: u8 = 0x6;
    pub const HARQ_INPUT_LEN: u8 = 0x7;
    pub const CB_READ_FAIL: u8 = 0x8;
    pub const CB_READ_TIMEOUT: u8 = 0x9;
    pub const CB_READ_TLP_POISONED: u8 = 0xA;
    pub const HBSTORE_ERR: u8 = 0xB;
}

/// Human-readable text for a descriptor error code. `None` for no error.
pub fn describe_error(code: u8) -> Option<&'static str> {
    use desc_error::*;
    Some(match code {
        NONE => return None,
        K_P_OUT_OF_RANGE => "encode block size K' out of range",
        Z_C_NOT_LEGAL => "Zc is illegal",
        DESC_OFFSET_ERR => "queue offset does not match the device",
        DESC_READ_FAIL => "unsuccessful completion for descriptor read",
        DESC_READ_TIMEOUT => "descriptor read timed out",
        DESC_READ_TLP_POISONED => "descriptor read TLP poisoned",
        HARQ_INPUT_LEN => "HARQ input length invalid",
        CB_READ_FAIL => "unsuccessful completion for code block read",
        CB_READ_TIMEOUT => "code block read timed out",
        CB_READ_TLP_POISONED => "code block read TLP poisoned",
        HBSTORE_ERR => "HARQ store exceeds buffer size",
        _ => "unknown descriptor error",
    })
}

/// `DATA_ERROR` if the slot reports a device error; logs the code.
fn desc_status<P>(slot: &DescriptorSlot<P>) -> u32 {
    match describe_error(slot.error_code) {
        Some(text) => {
            tracing::error!(code = slot.error_code, request = ?slot.request_ref, "{}", text);
            status::DATA_ERROR
        }
        None if slot.error != 0 => status::DATA_ERROR,
        None => status::SUCCESS,
    }
}

fn check_buffers(input: Option<BufferRef>, output: Option<BufferRef>, expected_len: u32) -> RequestCheck {
    match (input, output) {
        (Some(input), Some(_)) if input.len != expected_len => RequestCheck::SizeMismatch,
        (Some(_), Some(_)) => RequestCheck::Valid,
        _ => RequestCheck::Malformed,
    }
}

// ── Encode ──

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct EncodePayload {
    pub in_addr: u64,
    pub out_addr: u64,
    pub in_len: u32,
    pub out_len: u32,
}

/// One code block to encode.
#[derive(Debug, Clone, Default)]
pub struct EncodeOp {
    pub handle: RequestRef,
    pub input: Option<BufferRef>,
    pub output: Option<BufferRef>,
    /// Code block size the input must match, in bytes.
    pub expected_len: u32,
    pub status: u32,
}

impl EncodeOp {
    pub fn new(handle: RequestRef, input: BufferRef, output: BufferRef, expected_len: u32) -> Self {
        Self {
            handle,
            input: Some(input),
            output: Some(output),
            expected_len,
            status: 0,
        }
    }

    /// Fold a completion's status into the op.
    pub fn apply(&mut self, completion: &Completion) {
        self.status |= completion.status;
    }
}

impl RingRequest for EncodeOp {
    fn request_ref(&self) -> RequestRef {
        self.handle
    }

    fn check(&self) -> RequestCheck {
        check_buffers(self.input, self.output, self.expected_len)
    }

    fn mark(&mut self, status: u32) {
        self.status |= status;
    }
}

impl Payload for EncodePayload {
    type Request = EncodeOp;

    fn build(op: &EncodeOp, _part: usize) -> Self {
        let input = op.input.unwrap_or_default();
        let output = op.output.unwrap_or_default();
        Self {
            in_addr: input.iova,
            out_addr: output.iova,
            in_len: input.len,
            out_len: output.len,
        }
    }

    fn translate(slot: &DescriptorSlot<Self>) -> Completion {
        let mut completion = Completion::success(slot.request_ref);
        completion.status |= desc_status(slot);
        completion
    }
}

// ── Decode ──

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct DecodePayload {
    pub in_addr: u64,
    pub out_addr: u64,
    pub in_len: u32,
    pub out_len: u32,
    pub max_iter: u8,
    /// Written by the device: iterations run, minus one.
    pub iter: u8,
    pub crc24b_ind: u8,
    /// Written by the device.
    pub crc_pass: u8,
    /// Written by the device.
    pub et_pass: u8,
    pub loopback: u8,
    pub _rsvd: [u8; 2],
}

/// One code block to decode.
#[derive(Debug, Clone, Default)]
pub struct DecodeOp {
    pub handle: RequestRef,
    pub input: Option<BufferRef>,
    pub output: Option<BufferRef>,
    pub expected_len: u32,
    pub max_iter: u8,
    /// A CRC24B is attached and should be checked.
    pub crc24b: bool,
    /// HARQ loopback: move data, no decoding.
    pub loopback: bool,
    pub status: u32,
    pub iter_count: u8,
}

impl DecodeOp {
    pub fn new(handle: RequestRef, input: BufferRef, output: BufferRef, expected_len: u32) -> Self {
        Self {
            handle,
            input: Some(input),
            output: Some(output),
            expected_len,
            max_iter: 8,
            ..Self::default()
        }
    }

    pub fn with_crc24b(mut self) -> Self {
        self.crc24b = true;
        self
    }

    pub fn with_loopback(mut self) -> Self {
        self.loopback = true;
        self
    }

    pub fn apply(&mut self, completion: &Completion) {
        self.status |= completion.status;
        self.iter_count = completion.iter_count;
    }
}

impl RingRequest for DecodeOp {
    fn request_ref(&self) -> RequestRef {
        self.handle
    }

    fn check(&self) -> RequestCheck {
        check_buffers(self.input, self.output, self.expected_len)
    }

    fn mark(&mut self, status: u32) {
        self.status |= status;
    }
}

impl Payload for DecodePayload {
    type Request = DecodeOp;

    fn build(op: &DecodeOp, _part: usize) -> Self {
        let input = op.input.unwrap_or_default();
        let output = op.output.unwrap_or_default();
        Self {
            in_addr: input.iova,
            out_addr: output.iova,
            in_len: input.len,
            out_len: output.len,
            max_iter: op.max_iter,
            crc24b_ind: op.crc24b as u8,
            loopback: op.loopback as u8,
            ..Self::default()
        }
    }

    fn translate(slot: &DescriptorSlot<Self>) -> Completion {
        let mut completion = Completion::success(slot.request_ref);
        let p = &slot.payload;
        if p.loopback != 0 {
            return completion;
        }

        completion.iter_count = p.iter.wrapping_add(1);
        if p.crc24b_ind != 0 && p.crc_pass == 0 {
            completion.status |= status::CRC_ERROR;
        }
        if p.et_pass == 0 {
            completion.status |= status::SYNDROME_ERROR;
        }
        completion.status |= desc_status(slot);
        completion
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RingConfig;
    use crate::mmio::HeapRegisters;
    use crate::ring::{DescriptorRing, Doorbell};
    use std::sync::Arc;

    fn decoded(update: impl FnOnce(&mut DecodePayload), error_code: u8) -> Completion {
        let op = DecodeOp::new(RequestRef(5), BufferRef::new(0x1000, 64), BufferRef::new(0x2000, 64), 64).with_crc24b();
        let mut slot = DescriptorSlot::fresh(op.handle, DecodePayload::build(&op, 0), false);
        update(&mut slot.payload);
        slot.error_code = error_code;
        DecodePayload::translate(&slot)
    }

    #[test]
    fn test_decode_success_reports_iterations() {
        let c = decoded(|p| { p.iter = 3; p.crc_pass = 1; p.et_pass = 1; }, 0);
        assert_eq!(c.status, status::SUCCESS);
        assert_eq!(c.iter_count, 4);
        assert_eq!(c.request, RequestRef(5));
    }

    #[test]
    fn test_decode_failure_bits() {
        let c = decoded(|p| { p.et_pass = 1; }, 0);
        assert_eq!(c.status, status::CRC_ERROR);

        let c = decoded(|p| { p.crc_pass = 1; }, 0);
        assert_eq!(c.status, status::SYNDROME_ERROR);

        let c = decoded(|p| { p.crc_pass = 1; p.et_pass = 1; }, desc_error::CB_READ_TIMEOUT);
        assert_eq!(c.status, status::DATA_ERROR);

        let c = decoded(|_| {}, desc_error::HBSTORE_ERR);
        assert_eq!(c.status, status::CRC_ERROR | status::SYNDROME_ERROR | status::DATA_ERROR);
    }

    #[test]
    fn test_crc_not_checked_without_indicator() {
        let op = DecodeOp::new(RequestRef(1), BufferRef::new(1, 8), BufferRef::new(2, 8), 8);
        let mut slot = DescriptorSlot::fresh(op.handle, DecodePayload::build(&op, 0), false);
        slot.payload.et_pass = 1;
        assert!(DecodePayload::translate(&slot).is_ok());
    }

    #[test]
    fn test_loopback_ignores_decoder_status() {
        let c = decoded(|p| { p.loopback = 1; p.iter = 7; }, desc_error::DESC_READ_FAIL);
        assert_eq!(c.status, status::SUCCESS);
        assert_eq!(c.iter_count, 0);
    }

    #[test]
    fn test_encode_translate() {
        let op = EncodeOp::new(RequestRef(2), BufferRef::new(0x10, 32), BufferRef::new(0x20, 48), 32);
        let mut slot = DescriptorSlot::fresh(op.handle, EncodePayload::build(&op, 0), false);
        assert_eq!(slot.payload.in_addr, 0x10);
        assert_eq!(slot.payload.out_len, 48);
        assert!(EncodePayload::translate(&slot).is_ok());
        slot.error = 1;
        assert_eq!(EncodePayload::translate(&slot).status, status::DATA_ERROR);
    }

    #[test]
    fn test_request_checks() {
        let ok = EncodeOp::new(RequestRef(1), BufferRef::new(1, 32), BufferRef::new(2, 32), 32);
        assert_eq!(ok.check(), RequestCheck::Valid);

        let short = EncodeOp::new(RequestRef(1), BufferRef::new(1, 30), BufferRef::new(2, 32), 32);
        assert_eq!(short.check(), RequestCheck::SizeMismatch);

        let no_output = EncodeOp { output: None, ..ok.clone() };
        assert_eq!(no_output.check(), RequestCheck::Malformed);

        let no_input = DecodeOp { input: None, ..DecodeOp::default() };
        assert_eq!(no_input.check(), RequestCheck::Malformed);
    }

    #[test]
    fn test_describe_error() {
        assert_eq!(describe_error(desc_error::NONE), None);
        assert_eq!(describe_error(desc_error::Z_C_NOT_LEGAL), Some("Zc is illegal"));
        assert_eq!(describe_error(0x7F), Some("unknown descriptor error"));
    }

    #[test]
    fn test_decode_ring_round_trip() {
        let config = RingConfig::new().ring_size(8);
        let mut ring: DescriptorRing<DecodePayload, _> =
            DescriptorRing::new(&config, Arc::new(HeapRegisters::new(16)), Doorbell::Index { offset: 0 }).unwrap();
        let dev = ring.device_view();

        let mut ops: Vec<DecodeOp> = (0..3)
            .map(|i| DecodeOp::new(RequestRef(i), BufferRef::new(0x1000 * i, 16), BufferRef::new(0x9000, 16), 16))
            .collect();
        assert_eq!(ring.enqueue(&mut ops), 3);
        assert_eq!(dev.read(1).payload.in_addr, 0x1000);

        for i in 0..3 {
            dev.complete_with(i, |s| {
                s.payload.iter = i as u8;
                s.payload.et_pass = (i != 2) as u8;
            });
        }
        let done = ring.dequeue(8);
        for (op, c) in ops.iter_mut().zip(&done) {
            op.apply(c);
        }
        assert_eq!(ops[0].iter_count, 1);
        assert_eq!(ops[1].iter_count, 2);
        assert_eq!(ops[2].status, status::SYNDROME_ERROR);
    }
}
