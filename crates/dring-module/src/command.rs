//! Command-queue descriptor format.
//!
//! Command queues have no per-descriptor completion flags worth
//! trusting; they are driven through a byte-offset doorbell and a
//! [`BatchCoordinator`](crate::batch::BatchCoordinator) that watches the
//! device head register.
//!
//! A cipher request that needs an IV occupies two descriptors: a
//! passthrough that loads the IV into the engine's storage block,
//! followed by the AES operation itself. ECB needs no IV and takes one.

use dring_core::request::{RequestCheck, RequestRef, RingRequest};
use dring_core::slot::Payload;

use crate::fec::BufferRef;

/// Bytes in one engine storage block.
pub const SB_BYTES: u32 = 32;

/// Storage block the IV is loaded into.
pub const SB_IV: u64 = 2;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    Passthru = 0,
    Aes = 1,
}

impl Engine {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Passthru),
            1 => Some(Self::Aes),
            _ => None,
        }
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AesMode {
    #[default]
    Ecb = 0,
    Cbc = 1,
    Ctr = 2,
}

impl AesMode {
    /// Descriptors one operation in this mode occupies.
    pub fn descriptor_count(self) -> usize {
        match self {
            Self::Ecb => 1,
            Self::Cbc | Self::Ctr => 2,
        }
    }
}

/// Function word bits.
pub mod function {
    pub const ENCRYPT: u8 = 1 << 0;
    pub const MODE_SHIFT: u8 = 1;
    pub const MODE_MASK: u8 = 0x7 << MODE_SHIFT;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandPayload {
    /// Raw [`Engine`] value.
    pub engine: u8,
    pub function: u8,
    /// Start of a message.
    pub init: u8,
    /// End of a message.
    pub eom: u8,
    /// Storage block consulted by the engine (IV slot).
    pub sb_id: u8,
    pub _rsvd: [u8; 3],
    pub len: u32,
    pub _pad: u32,
    pub src: u64,
    pub dst: u64,
    pub key: u64,
}

impl CommandPayload {
    pub fn engine(&self) -> Option<Engine> {
        Engine::from_raw(self.engine)
    }

    pub fn aes_mode(&self) -> Option<AesMode> {
        match (self.function & function::MODE_MASK) >> function::MODE_SHIFT {
            0 => Some(AesMode::Ecb),
            1 => Some(AesMode::Cbc),
            2 => Some(AesMode::Ctr),
            _ => None,
        }
    }

    pub fn is_encrypt(&self) -> bool {
        self.function & function::ENCRYPT != 0
    }
}

/// One AES operation over a contiguous buffer.
#[derive(Debug, Clone, Default)]
pub struct CipherOp {
    pub handle: RequestRef,
    pub mode: AesMode,
    pub encrypt: bool,
    pub src: Option<BufferRef>,
    /// `None` means in place.
    pub dst: Option<BufferRef>,
    pub key: u64,
    /// Bus address of the IV block. Ignored for ECB.
    pub iv: u64,
    pub status: u32,
}

impl CipherOp {
    pub fn new(handle: RequestRef, mode: AesMode, src: BufferRef, key: u64) -> Self {
        Self {
            handle,
            mode,
            encrypt: true,
            src: Some(src),
            key,
            ..Self::default()
        }
    }

    pub fn with_iv(mut self, iv: u64) -> Self {
        self.iv = iv;
        self
    }

    pub fn with_dst(mut self, dst: BufferRef) -> Self {
        self.dst = Some(dst);
        self
    }

    pub fn decrypt(mut self) -> Self {
        self.encrypt = false;
        self
    }

    fn aes(&self) -> CommandPayload {
        let src = self.src.unwrap_or_default();
        let dst = self.dst.unwrap_or(src);
        let mut func = (self.mode as u8) << function::MODE_SHIFT;
        if self.encrypt {
            func |= function::ENCRYPT;
        }
        CommandPayload {
            engine: Engine::Aes as u8,
            function: func,
            init: 1,
            eom: 1,
            sb_id: if self.mode == AesMode::Ecb { 0 } else { SB_IV as u8 },
            len: src.len,
            src: src.iova,
            dst: dst.iova,
            key: self.key,
            ..CommandPayload::default()
        }
    }

    fn iv_load(&self) -> CommandPayload {
        CommandPayload {
            engine: Engine::Passthru as u8,
            len: SB_BYTES,
            src: self.iv,
            dst: SB_IV * SB_BYTES as u64,
            ..CommandPayload::default()
        }
    }
}

impl RingRequest for CipherOp {
    fn request_ref(&self) -> RequestRef {
        self.handle
    }

    fn descriptor_count(&self) -> usize {
        self.mode.descriptor_count()
    }

    fn check(&self) -> RequestCheck {
        let Some(src) = self.src else {
            return RequestCheck::Malformed;
        };
        if self.mode != AesMode::Ecb && self.iv == 0 {
            return RequestCheck::Malformed;
        }
        match self.dst {
            Some(dst) if dst.len != src.len => RequestCheck::SizeMismatch,
            _ => RequestCheck::Valid,
        }
    }

    fn mark(&mut self, status: u32) {
        self.status |= status;
    }
}

impl Payload for CommandPayload {
    type Request = CipherOp;

    fn build(op: &CipherOp, part: usize) -> Self {
        if part + 1 < op.descriptor_count() {
            op.iv_load()
        } else {
            op.aes()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchCoordinator;
    use crate::config::{MismatchPolicy, RingConfig};
    use crate::mmio::HeapRegisters;
    use crate::ring::{DescriptorRing, Doorbell};
    use dring_core::regs::RegisterIo;
    use dring_core::request::status;
    use std::sync::Arc;

    const TAIL_REG: usize = 0x04;
    const HEAD_REG: usize = 0x08;

    type CommandRing = DescriptorRing<CommandPayload, Arc<HeapRegisters>>;

    fn ring(cap: u32, regs: &Arc<HeapRegisters>) -> CommandRing {
        let config = RingConfig::new().ring_size(cap);
        let doorbell = Doorbell::ByteOffset { offset: TAIL_REG, control: None };
        CommandRing::new(&config, Arc::clone(regs), doorbell).unwrap()
    }

    fn cbc(id: u64) -> CipherOp {
        CipherOp::new(RequestRef(id), AesMode::Cbc, BufferRef::new(0x4000 + id * 0x100, 64), 0x7000)
            .with_iv(0x8000 + id * 0x20)
    }

    #[test]
    fn test_descriptor_counts() {
        assert_eq!(AesMode::Ecb.descriptor_count(), 1);
        assert_eq!(AesMode::Cbc.descriptor_count(), 2);
        assert_eq!(AesMode::Ctr.descriptor_count(), 2);
    }

    #[test]
    fn test_build_iv_then_aes() {
        let op = cbc(1).decrypt();
        let iv = CommandPayload::build(&op, 0);
        assert_eq!(iv.engine(), Some(Engine::Passthru));
        assert_eq!(iv.src, 0x8020);
        assert_eq!(iv.dst, SB_IV * SB_BYTES as u64);
        assert_eq!(iv.len, SB_BYTES);

        let aes = CommandPayload::build(&op, 1);
        assert_eq!(aes.engine(), Some(Engine::Aes));
        assert_eq!(aes.aes_mode(), Some(AesMode::Cbc));
        assert!(!aes.is_encrypt());
        assert_eq!(aes.len, 64);
        assert_eq!(aes.src, aes.dst);
        assert_eq!(aes.sb_id, SB_IV as u8);
    }

    #[test]
    fn test_ecb_single_descriptor() {
        let op = CipherOp::new(RequestRef(9), AesMode::Ecb, BufferRef::new(0x100, 16), 0x200)
            .with_dst(BufferRef::new(0x300, 16));
        assert_eq!(op.check(), RequestCheck::Valid);
        let aes = CommandPayload::build(&op, 0);
        assert_eq!(aes.engine(), Some(Engine::Aes));
        assert!(aes.is_encrypt());
        assert_eq!(aes.dst, 0x300);
        assert_eq!(aes.sb_id, 0);
    }

    #[test]
    fn test_cipher_checks() {
        let no_src = CipherOp { src: None, ..cbc(1) };
        assert_eq!(no_src.check(), RequestCheck::Malformed);

        let no_iv = CipherOp { iv: 0, ..cbc(1) };
        assert_eq!(no_iv.check(), RequestCheck::Malformed);

        let short_dst = cbc(1).with_dst(BufferRef::new(0x9000, 32));
        assert_eq!(short_dst.check(), RequestCheck::SizeMismatch);
    }

    #[test]
    fn test_chained_cipher_through_ring() {
        let regs = Arc::new(HeapRegisters::new(0x10));
        let mut ring = ring(8, &regs);
        let dev = ring.device_view();

        let mut ops = vec![cbc(0), cbc(1), cbc(2), cbc(3)];
        // Seven usable slots hold three two-descriptor requests
        assert_eq!(ring.enqueue(&mut ops), 3);
        assert_eq!(ring.pending_count(), 6);
        assert_eq!(regs.read_u32(TAIL_REG), ring.byte_offset(6));

        assert_eq!(dev.read(0).chained, 1);
        assert_eq!(dev.read(1).chained, 0);
        assert_eq!(dev.read(2).payload.engine(), Some(Engine::Passthru));

        dev.complete(0);
        dev.complete(1);
        dev.fail(2, 1);
        dev.complete(3);
        dev.complete(4);
        let done = ring.dequeue(8);
        assert_eq!(done.len(), 2);
        assert!(done[0].is_ok());
        assert_eq!(done[1].request, RequestRef(1));
        assert_eq!(done[1].status, status::DATA_ERROR);

        // Passthrough done, AES still running
        assert!(ring.dequeue(8).is_empty());
        dev.complete(5);
        assert_eq!(ring.dequeue(8).len(), 1);
    }

    #[test]
    fn test_size_mismatch_policies() {
        let regs = Arc::new(HeapRegisters::new(0x10));
        let mut ring = ring(8, &regs);
        let mut ops = vec![cbc(0), cbc(1).with_dst(BufferRef::new(0, 8)), cbc(2)];
        assert_eq!(ring.enqueue(&mut ops), 3);
        assert_eq!(ops[1].status, status::DATA_ERROR);

        let mut ring = self::ring(8, &regs);
        ring.set_mismatch_policy(MismatchPolicy::FailFast);
        let mut ops = vec![cbc(3), cbc(4).with_dst(BufferRef::new(0, 8)), cbc(5)];
        assert_eq!(ring.enqueue(&mut ops), 1);
        assert_eq!(ops[1].status, status::DATA_ERROR);
        assert_eq!(ops[2].status, 0);
        assert_eq!(ring.pending_count(), 2);
    }

    #[test]
    fn test_cipher_batches() {
        let regs = Arc::new(HeapRegisters::new(0x10));
        let ring = ring(16, &regs);
        let mut coord = BatchCoordinator::new(ring, HEAD_REG, &RingConfig::new().ring_size(16));

        let ecb = CipherOp::new(RequestRef(10), AesMode::Ecb, BufferRef::new(0x100, 16), 0x200);
        let mut ops = vec![ecb, cbc(11)];
        let handle = coord.submit_batch(&mut ops).unwrap();
        assert_eq!(handle.requests, 2);
        assert_eq!(handle.descriptors, 3);
        assert_eq!(handle.tail_offset, coord.producer().byte_offset(3));

        regs.write_u32(HEAD_REG, coord.producer().byte_offset(2));
        assert!(coord.poll_batch(8).is_none());

        regs.write_u32(HEAD_REG, handle.tail_offset);
        let done = coord.poll_batch(8).unwrap();
        assert_eq!(done.iter().map(|c| c.request.0).collect::<Vec<_>>(), vec![10, 11]);
        assert_eq!(coord.consumer().pending_count(), 0);
    }
}
