//! Administrative queue path: discover, setup, start, stop, release.
//!
//! These are the only ring-related operations that wait. `stop` asks
//! the device to flush a queue and busy-polls the flush status with a
//! bounded timeout; everything else is a handful of register writes.
//!
//! # Register layout
//!
//! ```text
//! 0x000          QUEUE_MAP_DONE    bit 0: queue map programmed
//! 0x080 + q      FLUSH_STATUS[q]   u8, bit 0: flush acknowledged
//! 0x100 + 4q     QUEUE_MAP[q]      u32, INVALID_QUEUE when not bound here
//! 0x200 + 0x20q  RING_CTRL[q]      per-queue control block:
//!     +0x00  BASE_ADDR    u64  bus address of descriptor slot 0
//!     +0x08  HEAD_ADDR    u64  where the device reports its completion head
//!     +0x10  SIZE         u16  descriptors
//!     +0x12  MISC         u16
//!     +0x14  ENABLE       u8
//!     +0x15  FLUSH_EN     u8
//!     +0x18  SHADOW_TAIL  u16  doorbell
//!     +0x1C  HEAD_POINT   u16  device head index
//! ```

use std::ops::Range;
use std::time::{Duration, Instant};

use dring_core::constants::INDEX_RING_LIMIT;
use dring_core::geometry::RingGeometry;
use dring_core::regs::RegisterIo;
use dring_core::slot::Payload;
use dring_core::{Result, RingError};

use crate::config::RingConfig;
use crate::queue_map::QueueBitmap;
use crate::ring::{DescriptorRing, Doorbell, RingProducer};

/// Register offsets.
pub mod layout {
    pub const QUEUE_MAP_DONE: usize = 0x000;
    pub const FLUSH_STATUS_BASE: usize = 0x080;
    pub const QUEUE_MAP_BASE: usize = 0x100;
    pub const RING_CTRL_BASE: usize = 0x200;
    pub const RING_CTRL_STRIDE: usize = 0x20;

    /// Queue map value for a queue not bound to this function.
    pub const INVALID_QUEUE: u32 = 0xFFFF_FFFF;
    /// Queues addressable by this layout.
    pub const MAX_QUEUES: usize = 64;

    /// Offsets inside one ring control block.
    pub mod ring_ctrl {
        pub const BASE_ADDR: usize = 0x00;
        pub const HEAD_ADDR: usize = 0x08;
        pub const SIZE: usize = 0x10;
        pub const MISC: usize = 0x12;
        pub const ENABLE: usize = 0x14;
        pub const FLUSH_EN: usize = 0x15;
        pub const SHADOW_TAIL: usize = 0x18;
        pub const HEAD_POINT: usize = 0x1C;
    }

    #[inline]
    pub const fn ring_ctrl(q: usize) -> usize {
        RING_CTRL_BASE + q * RING_CTRL_STRIDE
    }

    #[inline]
    pub const fn queue_map(q: usize) -> usize {
        QUEUE_MAP_BASE + (q << 2)
    }

    #[inline]
    pub const fn flush_status(q: usize) -> usize {
        FLUSH_STATUS_BASE + q
    }

    /// Bytes of register space covering `total_queues` control blocks.
    pub const fn register_file_size(total_queues: usize) -> usize {
        ring_ctrl(total_queues)
    }
}

use layout::ring_ctrl;

/// Direction of a FEC queue. Decode queues live in the lower half of
/// the queue space, encode queues in the upper half.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    Decode,
    Encode,
}

/// An assigned hardware queue. Released by [`QueueControl::release`].
#[derive(Debug)]
pub struct QueueHandle {
    q_idx: u32,
    kind: QueueKind,
    ring_size: u32,
}

impl QueueHandle {
    pub fn index(&self) -> u32 {
        self.q_idx
    }

    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    pub fn ring_size(&self) -> u32 {
        self.ring_size
    }

    /// Offset of this queue's control block.
    pub fn ctrl_offset(&self) -> usize {
        layout::ring_ctrl(self.q_idx as usize)
    }

    /// Shadow-tail doorbell for a ring attached to this queue.
    pub fn doorbell(&self) -> Doorbell {
        Doorbell::Index {
            offset: self.ctrl_offset() + ring_ctrl::SHADOW_TAIL,
        }
    }

    pub fn head_point_offset(&self) -> usize {
        self.ctrl_offset() + ring_ctrl::HEAD_POINT
    }
}

pub struct QueueControl<R: RegisterIo> {
    regs: R,
    map: QueueBitmap,
    total_queues: usize,
    max_ring_size: u32,
    flush_timeout: Duration,
    flush_poll: Duration,
}

impl<R: RegisterIo> QueueControl<R> {
    /// Scan the queue map and bind every queue mapped to this function.
    ///
    /// Fails if the map has not been programmed yet or no queue is
    /// bound. Control blocks of bound queues are cleared.
    pub fn discover(regs: R, total_queues: usize, config: &RingConfig) -> Result<Self> {
        if regs.read_u32(layout::QUEUE_MAP_DONE) & 0x1 == 0 {
            tracing::error!("queue map not programmed; was the physical function configured?");
            return Err(RingError::QueueMapNotReady);
        }

        let total_queues = if total_queues > layout::MAX_QUEUES {
            tracing::warn!(total_queues, max = layout::MAX_QUEUES, "clamping queue count");
            layout::MAX_QUEUES
        } else {
            total_queues
        };

        let map = QueueBitmap::new(total_queues);
        for q in 0..total_queues {
            let hw_id = regs.read_u32(layout::queue_map(q));
            tracing::debug!(queue = q, hw_id, "queue map");
            if hw_id != layout::INVALID_QUEUE {
                map.bind(q);
                clear_ctrl_block(&regs, q);
            }
        }

        let bound = map.bound_count();
        if bound == 0 {
            tracing::error!("no hardware queues bound to this function");
            return Err(RingError::NoHardwareQueues);
        }
        tracing::info!(bound, total = total_queues, "hardware queues discovered");

        Ok(Self {
            regs,
            map,
            total_queues,
            max_ring_size: config.max_ring_size,
            flush_timeout: config.flush_timeout,
            flush_poll: config.flush_poll_interval,
        })
    }

    fn range(&self, kind: QueueKind) -> Range<usize> {
        let half = self.total_queues >> 1;
        match kind {
            QueueKind::Decode => 0..half,
            QueueKind::Encode => half..self.total_queues,
        }
    }

    /// Claim a free queue of `kind` and program its control block.
    pub fn setup(
        &self,
        kind: QueueKind,
        ring_size: u32,
        ring_base: u64,
        head_addr: u64,
    ) -> Result<QueueHandle> {
        let Some(q) = self.map.acquire_first_free_in(self.range(kind)) else {
            tracing::info!(?kind, "no free hardware queue");
            return Err(RingError::NoFreeQueue);
        };

        // SIZE and SHADOW_TAIL are 16 bits wide
        let max = self.max_ring_size.min(INDEX_RING_LIMIT);
        if let Err(e) = RingGeometry::exact(ring_size, max) {
            self.map.release(q);
            tracing::error!(queue = q, ring_size, max, "invalid queue size");
            return Err(e);
        }

        let base = ring_ctrl(q);
        self.regs.write_u64(base + ring_ctrl::BASE_ADDR, ring_base);
        self.regs.write_u64(base + ring_ctrl::HEAD_ADDR, head_addr);
        self.regs.write_u16(base + ring_ctrl::SIZE, ring_size as u16);
        self.regs.write_u16(base + ring_ctrl::MISC, 0);
        self.regs.write_u16(base + ring_ctrl::HEAD_POINT, 0);
        self.regs.write_u16(base + ring_ctrl::SHADOW_TAIL, 0);
        self.regs.write_u8(base + ring_ctrl::ENABLE, 1);

        tracing::debug!(queue = q, ?kind, ring_size, "queue set up");
        Ok(QueueHandle {
            q_idx: q as u32,
            kind,
            ring_size,
        })
    }

    /// Set up a queue for an existing ring and point the ring's
    /// doorbell at the queue's shadow tail.
    pub fn setup_ring<P: Payload, R2: RegisterIo>(
        &self,
        kind: QueueKind,
        ring: &mut DescriptorRing<P, R2>,
        head_addr: u64,
    ) -> Result<QueueHandle> {
        let queue = self.setup(kind, ring.capacity(), ring.bus_address(), head_addr)?;
        ring.set_doorbell(queue.doorbell());
        Ok(queue)
    }

    fn check_live(&self, queue: &QueueHandle) -> Result<usize> {
        let q = queue.q_idx as usize;
        if !self.map.is_assigned(q) {
            tracing::error!(queue = q, "queue not set up");
            return Err(RingError::QueueNotSetUp(queue.q_idx));
        }
        Ok(q)
    }

    /// Zero software and hardware indices, then enable the queue.
    pub fn start<P: Payload, R2: RegisterIo>(
        &self,
        queue: &QueueHandle,
        ring: &mut DescriptorRing<P, R2>,
    ) -> Result<()> {
        let q = self.check_live(queue)?;
        let base = ring_ctrl(q);

        ring.reset();
        self.regs.write_u16(base + ring_ctrl::HEAD_POINT, 0);
        self.regs.write_u16(base + ring_ctrl::SHADOW_TAIL, 0);
        self.regs.write_u8(base + ring_ctrl::FLUSH_EN, 0);
        self.regs.write_u8(layout::flush_status(q), 0);
        self.regs.write_u8(base + ring_ctrl::ENABLE, 1);

        tracing::debug!(queue = q, "queue started");
        Ok(())
    }

    /// Flush and disable the queue.
    ///
    /// Polls the flush status every `flush_poll_interval` for at most
    /// `flush_timeout`. On timeout the queue is disabled anyway and
    /// `Timeout` is returned.
    pub fn stop(&self, queue: &QueueHandle) -> Result<()> {
        let q = self.check_live(queue)?;
        let base = ring_ctrl(q);

        self.regs.write_u8(base + ring_ctrl::FLUSH_EN, 1);

        let start = Instant::now();
        while self.regs.read_u8(layout::flush_status(q)) & 0x1 == 0 {
            let waited = start.elapsed();
            if waited > self.flush_timeout {
                self.regs.write_u8(base + ring_ctrl::ENABLE, 0);
                tracing::error!(queue = q, waited_us = waited.as_micros() as u64, "queue flush failed");
                return Err(RingError::Timeout {
                    queue: queue.q_idx,
                    op: "flush",
                    waited_us: waited.as_micros() as u64,
                });
            }
            std::thread::sleep(self.flush_poll);
        }

        self.regs.write_u8(base + ring_ctrl::ENABLE, 0);
        tracing::debug!(queue = q, "queue stopped");
        Ok(())
    }

    /// Disable the queue, clear its control block and return it to the
    /// free set.
    pub fn release(&self, queue: QueueHandle) -> Result<()> {
        let q = self.check_live(&queue)?;
        self.regs.write_u8(ring_ctrl(q) + ring_ctrl::ENABLE, 0);
        clear_ctrl_block(&self.regs, q);
        self.map.release(q);
        tracing::debug!(queue = q, "queue released");
        Ok(())
    }

    /// Per-queue completion interrupt enable. Takes effect on the next
    /// enqueue from `producer`.
    pub fn set_interrupts<P: Payload, R2: RegisterIo>(
        &self,
        queue: &QueueHandle,
        producer: &mut RingProducer<P, R2>,
        enable: bool,
    ) -> Result<()> {
        self.check_live(queue)?;
        producer.set_irq_enable(enable);
        Ok(())
    }

    pub fn is_enabled(&self, queue: &QueueHandle) -> bool {
        self.regs.read_u8(queue.ctrl_offset() + ring_ctrl::ENABLE) != 0
    }

    pub fn bound_queues(&self) -> usize {
        self.map.bound_count()
    }

    pub fn assigned_queues(&self) -> usize {
        self.map.assigned_count()
    }

    pub fn regs(&self) -> &R {
        &self.regs
    }
}

fn clear_ctrl_block<R: RegisterIo>(regs: &R, q: usize) {
    let base = ring_ctrl(q);
    for word in (0..layout::RING_CTRL_STRIDE).step_by(4) {
        regs.write_u32(base + word, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mmio::HeapRegisters;
    use crate::testutil::{reqs, TestRing};
    use std::sync::Arc;

    const QUEUES: usize = 8;

    fn device(bound: &[usize]) -> Arc<HeapRegisters> {
        let regs = Arc::new(HeapRegisters::new(layout::register_file_size(QUEUES)));
        regs.write_u32(layout::QUEUE_MAP_DONE, 1);
        for q in 0..QUEUES {
            let value = if bound.contains(&q) { q as u32 } else { layout::INVALID_QUEUE };
            regs.write_u32(layout::queue_map(q), value);
        }
        regs
    }

    fn config() -> RingConfig {
        RingConfig::new()
            .flush_timeout(Duration::from_micros(300))
            .flush_poll_interval(Duration::from_micros(10))
    }

    fn control(bound: &[usize]) -> (QueueControl<Arc<HeapRegisters>>, Arc<HeapRegisters>) {
        let regs = device(bound);
        (QueueControl::discover(Arc::clone(&regs), QUEUES, &config()).unwrap(), regs)
    }

    #[test]
    fn test_discover_requires_map_done() {
        let regs = device(&[0, 1]);
        regs.write_u32(layout::QUEUE_MAP_DONE, 0);
        let err = QueueControl::discover(regs, QUEUES, &config()).err();
        assert_eq!(err, Some(RingError::QueueMapNotReady));
    }

    #[test]
    fn test_discover_requires_bound_queue() {
        let err = QueueControl::discover(device(&[]), QUEUES, &config()).err();
        assert_eq!(err, Some(RingError::NoHardwareQueues));
    }

    #[test]
    fn test_discover_clears_bound_blocks() {
        let regs = device(&[1, 6]);
        regs.write_u32(layout::ring_ctrl(6) + ring_ctrl::SIZE, 0xABCD);
        regs.write_u32(layout::ring_ctrl(2) + ring_ctrl::SIZE, 0xABCD);
        let ctl = QueueControl::discover(Arc::clone(&regs), QUEUES, &config()).unwrap();
        assert_eq!(ctl.bound_queues(), 2);
        assert_eq!(regs.read_u32(layout::ring_ctrl(6) + ring_ctrl::SIZE), 0);
        // Unbound queue untouched
        assert_eq!(regs.read_u32(layout::ring_ctrl(2) + ring_ctrl::SIZE), 0xABCD);
    }

    #[test]
    fn test_setup_splits_decode_and_encode() {
        let (ctl, regs) = control(&[1, 2, 5, 6]);
        let dec = ctl.setup(QueueKind::Decode, 16, 0x1_0000_2000, 0x3000).unwrap();
        let enc = ctl.setup(QueueKind::Encode, 16, 0x4000, 0x5000).unwrap();
        assert_eq!(dec.index(), 1);
        assert_eq!(enc.index(), 5);

        let base = dec.ctrl_offset();
        assert_eq!(regs.read_u64(base + ring_ctrl::BASE_ADDR), 0x1_0000_2000);
        assert_eq!(regs.read_u64(base + ring_ctrl::HEAD_ADDR), 0x3000);
        assert_eq!(regs.read_u16(base + ring_ctrl::SIZE), 16);
        assert_eq!(regs.read_u8(base + ring_ctrl::ENABLE), 1);
        assert_eq!(
            dec.doorbell(),
            Doorbell::Index { offset: layout::ring_ctrl(1) + ring_ctrl::SHADOW_TAIL }
        );

        assert_eq!(ctl.setup(QueueKind::Decode, 16, 0, 0).unwrap().index(), 2);
        assert_eq!(ctl.setup(QueueKind::Decode, 16, 0, 0).err(), Some(RingError::NoFreeQueue));
        assert_eq!(ctl.assigned_queues(), 3);
    }

    #[test]
    fn test_setup_rejects_bad_size_and_releases() {
        let (ctl, _) = control(&[0]);
        assert_eq!(
            ctl.setup(QueueKind::Decode, 2048, 0, 0).err(),
            Some(RingError::SizeExceedsMax { requested: 2048, max: 1024 })
        );
        assert_eq!(ctl.setup(QueueKind::Decode, 12, 0, 0).err(), Some(RingError::InvalidSize(12)));
        assert_eq!(ctl.assigned_queues(), 0);
        assert!(ctl.setup(QueueKind::Decode, 1024, 0, 0).is_ok());
    }

    #[test]
    fn test_setup_size_fits_queue_registers() {
        let regs = device(&[0]);
        let config = config().max_ring_size(1 << 17);
        let ctl = QueueControl::discover(Arc::clone(&regs), QUEUES, &config).unwrap();
        assert_eq!(
            ctl.setup(QueueKind::Decode, 1 << 16, 0, 0).err(),
            Some(RingError::SizeExceedsMax { requested: 1 << 16, max: INDEX_RING_LIMIT })
        );
        let queue = ctl.setup(QueueKind::Decode, INDEX_RING_LIMIT, 0, 0).unwrap();
        assert_eq!(regs.read_u16(queue.ctrl_offset() + ring_ctrl::SIZE) as u32, INDEX_RING_LIMIT);
    }

    #[test]
    fn test_start_resets_ring_and_registers() {
        let (ctl, regs) = control(&[0]);
        let mut ring = TestRing::new(&RingConfig::new().ring_size(8), Arc::clone(&regs), Doorbell::Index { offset: 0 }).unwrap();
        let queue = ctl.setup_ring(QueueKind::Decode, &mut ring, 0).unwrap();
        assert_eq!(regs.read_u64(queue.ctrl_offset() + ring_ctrl::BASE_ADDR), ring.bus_address());
        assert_eq!(ring.doorbell(), queue.doorbell());

        ring.enqueue(&mut reqs(0..3));
        assert_eq!(regs.read_u16(queue.ctrl_offset() + ring_ctrl::SHADOW_TAIL), 3);
        regs.write_u16(queue.head_point_offset(), 2);
        regs.write_u8(layout::flush_status(0), 1);

        ctl.start(&queue, &mut ring).unwrap();
        assert_eq!((ring.head(), ring.tail()), (0, 0));
        assert_eq!(regs.read_u16(queue.ctrl_offset() + ring_ctrl::SHADOW_TAIL), 0);
        assert_eq!(regs.read_u16(queue.head_point_offset()), 0);
        assert_eq!(regs.read_u8(layout::flush_status(0)), 0);
        assert!(ctl.is_enabled(&queue));
    }

    #[test]
    fn test_stop_acknowledged() {
        let (ctl, regs) = control(&[0]);
        let queue = ctl.setup(QueueKind::Decode, 8, 0, 0).unwrap();
        let flush_en = queue.ctrl_offset() + ring_ctrl::FLUSH_EN;

        let device = {
            let regs = Arc::clone(&regs);
            std::thread::spawn(move || {
                let deadline = Instant::now() + Duration::from_secs(5);
                while regs.read_u8(flush_en) == 0 && Instant::now() < deadline {
                    std::hint::spin_loop();
                }
                regs.write_u8(layout::flush_status(0), 1);
            })
        };

        let ctl = QueueControl { flush_timeout: Duration::from_secs(5), ..ctl };
        ctl.stop(&queue).unwrap();
        device.join().unwrap();
        assert!(!ctl.is_enabled(&queue));
    }

    #[test]
    fn test_stop_timeout_disables_queue() {
        let (ctl, _) = control(&[0]);
        let queue = ctl.setup(QueueKind::Decode, 8, 0, 0).unwrap();
        match ctl.stop(&queue) {
            Err(RingError::Timeout { queue: 0, op: "flush", waited_us }) => assert!(waited_us >= 300),
            other => panic!("unexpected {:?}", other),
        }
        assert!(!ctl.is_enabled(&queue));
    }

    #[test]
    fn test_release_and_reuse() {
        let (ctl, regs) = control(&[3]);
        let queue = ctl.setup(QueueKind::Decode, 8, 0xDEAD_0000, 0).unwrap();
        let base = queue.ctrl_offset();
        ctl.release(queue).unwrap();
        assert_eq!(regs.read_u64(base + ring_ctrl::BASE_ADDR), 0);
        assert_eq!(regs.read_u8(base + ring_ctrl::ENABLE), 0);
        assert_eq!(ctl.assigned_queues(), 0);

        let again = ctl.setup(QueueKind::Decode, 8, 0, 0).unwrap();
        assert_eq!(again.index(), 3);
    }

    #[test]
    fn test_operations_on_released_queue() {
        let (ctl, _) = control(&[0]);
        let queue = ctl.setup(QueueKind::Decode, 8, 0, 0).unwrap();
        let stale = QueueHandle { q_idx: queue.q_idx, kind: queue.kind, ring_size: 8 };
        ctl.release(queue).unwrap();
        assert_eq!(ctl.stop(&stale).err(), Some(RingError::QueueNotSetUp(0)));
    }

    #[test]
    fn test_set_interrupts() {
        let (ctl, _) = control(&[0]);
        let mut ring = TestRing::new(&RingConfig::new().ring_size(8), Arc::new(HeapRegisters::new(64)), Doorbell::Index { offset: 0 }).unwrap();
        let queue = ctl.setup_ring(QueueKind::Decode, &mut ring, 0).unwrap();
        ctl.set_interrupts(&queue, ring.producer(), true).unwrap();
        assert!(ring.irq_enable());
        ctl.set_interrupts(&queue, ring.producer(), false).unwrap();
        assert!(!ring.irq_enable());
    }
}
