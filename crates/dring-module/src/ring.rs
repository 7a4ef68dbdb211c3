//! `DescriptorRing`: single-producer/single-consumer hardware descriptor ring.
//!
//! Software writes descriptors at `tail` and rings a doorbell; the
//! device (a third actor reaching the same memory through a
//! [`DeviceView`]) processes them strictly in order and sets `done` on
//! each. The consumer drains from `head` and stops at the first slot
//! that is not done yet.
//!
//! # Indices
//!
//! `head` and `tail` are kept wrapped into `[0, capacity)`. Capacity
//! follows the reserved-slot discipline of [`dring_core::capacity`]:
//! at most `capacity - 1` descriptors are in flight.
//!
//! # Ordering
//!
//! ```text
//! producer:  write slots ... wmb() ... store tail (Release) ... doorbell(tail)
//! device:    read slots ... write status ... store done (Release)
//! consumer:  load tail (Acquire) ... load done (Acquire) ... rmb() ... read slot
//!            ... store head (Release)
//! producer:  load head (Acquire) before reusing a slot
//! ```
//!
//! # Thread model
//!
//! [`DescriptorRing`] owns both ends and suits a caller that submits
//! and drains from one place. [`DescriptorRing::split`] hands out a
//! [`RingProducer`] (sole writer of `tail`) and a [`RingConsumer`]
//! (sole writer of `head`) that may live on different threads; they
//! share the slots and the two atomic indices and nothing else.

use std::ptr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dring_core::barrier::{rmb, wmb};
use dring_core::capacity;
use dring_core::constants::INDEX_RING_LIMIT;
use dring_core::geometry::RingGeometry;
use dring_core::regs::RegisterIo;
use dring_core::request::{status, Completion, RequestCheck, RingRequest};
use dring_core::slot::{DescriptorSlot, Payload};
use dring_core::{Result, RingError};

use crate::config::{MismatchPolicy, RingConfig};
use crate::dma::DmaRegion;

/// How the new tail is announced to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Doorbell {
    /// 16-bit tail index written to a shadow-tail register.
    Index { offset: usize },
    /// Low 32 bits of the tail descriptor's bus address, optionally
    /// followed by a 32-bit control write (e.g. a run bit).
    ByteOffset {
        offset: usize,
        control: Option<(usize, u32)>,
    },
}

/// Ring counters. Requests, not descriptors.
///
/// Each half counts its own side; the other side's fields stay zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingStats {
    pub enqueued: u64,
    pub enqueue_errors: u64,
    pub dequeued: u64,
    pub doorbells: u64,
}

/// Index on its own cache line so producer and consumer stores do not
/// contend.
#[repr(align(64))]
struct PaddedIndex(AtomicU32);

/// State shared by both halves of a ring.
struct RingCore<P> {
    geometry: RingGeometry,
    region: Arc<DmaRegion>,
    slots: *mut DescriptorSlot<P>,
    /// Next slot to drain. Stored by the consumer only.
    head: PaddedIndex,
    /// Next slot to fill. Stored by the producer only.
    tail: PaddedIndex,
}

// Safety: slots in [head, tail) belong to the device and the consumer,
// slots outside it to the producer. Ownership moves only through the
// Release/Acquire pairs on `head` and `tail`; the Arc keeps the region
// mapped.
unsafe impl<P: Payload> Send for RingCore<P> {}
unsafe impl<P: Payload> Sync for RingCore<P> {}

impl<P: Payload> RingCore<P> {
    #[inline]
    fn head(&self) -> u32 {
        self.head.0.load(Ordering::Acquire)
    }

    #[inline]
    fn tail(&self) -> u32 {
        self.tail.0.load(Ordering::Acquire)
    }

    #[inline]
    fn free_count(&self) -> u32 {
        capacity::free_count(self.head(), self.tail(), self.geometry.capacity())
    }

    #[inline]
    fn pending_count(&self) -> u32 {
        capacity::pending_count(self.head(), self.tail(), self.geometry.wrap_mask())
    }

    #[inline]
    fn byte_offset(&self, index: u32) -> u32 {
        byte_offset::<P>(self.region.bus_address(), self.geometry.wrap(index))
    }

    fn device_view(&self) -> DeviceView<P> {
        DeviceView {
            region: Arc::clone(&self.region),
            slots: self.slots,
            geometry: self.geometry,
        }
    }

    #[inline(always)]
    fn slot_ptr(&self, index: u32) -> *mut DescriptorSlot<P> {
        unsafe { self.slots.add(self.geometry.wrap(index) as usize) }
    }
}

// ── Producer ──

/// Submission half: writes descriptors at `tail` and rings the doorbell.
pub struct RingProducer<P: Payload, R: RegisterIo> {
    core: Arc<RingCore<P>>,
    regs: R,
    doorbell: Doorbell,
    irq_enable: bool,
    policy: MismatchPolicy,
    stats: RingStats,
}

impl<P: Payload, R: RegisterIo> RingProducer<P, R> {
    /// Write descriptors for as many of `requests` as fit, in order.
    ///
    /// Returns the number of requests written. Returns 0 when the ring
    /// is full; requests past the first one not written are left
    /// untouched. A request rejected by its own check is marked
    /// through [`RingRequest::mark`] and ends the call.
    pub fn enqueue(&mut self, requests: &mut [P::Request]) -> usize {
        let geometry = self.core.geometry;
        let tail = self.core.tail.0.load(Ordering::Relaxed);
        let mut avail = capacity::free_count(self.core.head(), tail, geometry.capacity());
        let mut written = 0usize;
        let mut slots_used = 0u32;

        for request in requests.iter_mut() {
            let parts = request.descriptor_count().max(1) as u32;
            if parts > avail {
                break;
            }

            match request.check() {
                RequestCheck::Valid => {}
                RequestCheck::Malformed => {
                    request.mark(status::MALFORMED | status::DATA_ERROR);
                    tracing::warn!(request = ?request.request_ref(), "malformed request, enqueue stopped");
                    break;
                }
                RequestCheck::SizeMismatch => {
                    request.mark(status::DATA_ERROR);
                    if self.policy == MismatchPolicy::FailFast {
                        tracing::warn!(request = ?request.request_ref(), "length mismatch, enqueue stopped");
                        break;
                    }
                    tracing::warn!(request = ?request.request_ref(), "length mismatch, submitting anyway");
                }
            }

            let request_ref = request.request_ref();
            for part in 0..parts {
                let index = geometry.advance(tail, slots_used);
                let slot = DescriptorSlot::fresh(
                    request_ref,
                    P::build(request, part as usize),
                    part + 1 < parts,
                );
                unsafe { ptr::write_volatile(self.core.slot_ptr(index), slot) };
                slots_used += 1;
            }
            avail -= parts;
            written += 1;
        }

        self.stats.enqueue_errors += (requests.len() - written) as u64;
        if slots_used == 0 {
            return 0;
        }

        self.set_last_irq(tail, slots_used);
        let new_tail = geometry.advance(tail, slots_used);
        wmb();
        self.core.tail.0.store(new_tail, Ordering::Release);
        self.ring_doorbell(new_tail);

        self.stats.enqueued += written as u64;
        tracing::trace!(written, slots = slots_used, tail = new_tail, "enqueue");
        written
    }

    /// Interrupt only on the final descriptor of this enqueue: the device
    /// completes in order, so its completion implies all earlier ones.
    fn set_last_irq(&self, tail: u32, slots_used: u32) {
        let last = self.core.geometry.advance(tail, slots_used - 1);
        unsafe {
            let slot = self.core.slot_ptr(last);
            ptr::addr_of_mut!((*slot).irq_en).write_volatile(self.irq_enable as u8);
        }
    }

    fn ring_doorbell(&mut self, tail: u32) {
        match self.doorbell {
            Doorbell::Index { offset } => self.regs.write_u16(offset, tail as u16),
            Doorbell::ByteOffset { offset, control } => {
                self.regs.write_u32(offset, self.core.byte_offset(tail));
                if let Some((ctrl_offset, value)) = control {
                    self.regs.write_u32(ctrl_offset, value);
                }
            }
        }
        self.stats.doorbells += 1;
    }

    /// Free slots as seen by the producer. Never over-reports: a stale
    /// `head` only hides slots the consumer has just released.
    #[inline]
    pub fn free_count(&self) -> u32 {
        self.core.free_count()
    }

    pub fn tail(&self) -> u32 {
        self.core.tail.0.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> u32 {
        self.core.geometry.capacity()
    }

    pub fn geometry(&self) -> RingGeometry {
        self.core.geometry
    }

    /// Bus address of slot 0.
    pub fn bus_address(&self) -> u64 {
        self.core.region.bus_address()
    }

    /// Low 32 bits of the bus address of slot `index`.
    #[inline]
    pub fn byte_offset(&self, index: u32) -> u32 {
        self.core.byte_offset(index)
    }

    pub fn regs(&self) -> &R {
        &self.regs
    }

    pub fn doorbell(&self) -> Doorbell {
        self.doorbell
    }

    /// Point the doorbell at another register, e.g. once a hardware
    /// queue has been assigned.
    pub fn set_doorbell(&mut self, doorbell: Doorbell) {
        self.doorbell = doorbell;
    }

    pub fn irq_enable(&self) -> bool {
        self.irq_enable
    }

    pub fn set_irq_enable(&mut self, enable: bool) {
        self.irq_enable = enable;
    }

    pub fn mismatch_policy(&self) -> MismatchPolicy {
        self.policy
    }

    pub fn set_mismatch_policy(&mut self, policy: MismatchPolicy) {
        self.policy = policy;
    }

    pub fn stats(&self) -> RingStats {
        self.stats
    }

    /// Hardware-side handle onto the same descriptor memory.
    pub fn device_view(&self) -> DeviceView<P> {
        self.core.device_view()
    }
}

// ── Consumer ──

/// Completion half: drains done descriptors from `head`.
pub struct RingConsumer<P: Payload> {
    core: Arc<RingCore<P>>,
    stats: RingStats,
}

impl<P: Payload> RingConsumer<P> {
    /// Drain up to `max` completed requests in submission order.
    pub fn dequeue(&mut self, max: usize) -> Vec<Completion> {
        let mut out = Vec::with_capacity(max.min(self.pending_count() as usize));
        self.dequeue_into(&mut out, max);
        out
    }

    /// Like [`dequeue`](Self::dequeue) but appends to a caller-owned
    /// buffer. Returns the number of requests appended.
    pub fn dequeue_into(&mut self, out: &mut Vec<Completion>, max: usize) -> usize {
        let geometry = self.core.geometry;
        let head = self.core.head.0.load(Ordering::Relaxed);
        let avail = capacity::pending_count(head, self.core.tail(), geometry.wrap_mask());
        let mut confirmed = 0u32;
        let mut run = 0u32;
        let mut current: Option<Completion> = None;
        let mut emitted = 0usize;

        while emitted < max && confirmed + run < avail {
            let index = geometry.advance(head, confirmed + run);
            let slot_ptr = self.core.slot_ptr(index);
            if !unsafe { DescriptorSlot::load_done(slot_ptr) } {
                break;
            }
            rmb();
            let slot = unsafe { ptr::read_volatile(slot_ptr) };
            if slot.error != 0 {
                tracing::debug!(index, code = slot.error_code, request = ?slot.request_ref, "descriptor error");
            }

            let part = P::translate(&slot);
            current = Some(match current {
                None => part,
                Some(mut acc) => {
                    acc.status |= part.status;
                    acc.iter_count = acc.iter_count.max(part.iter_count);
                    acc
                }
            });
            run += 1;

            if slot.chained == 0 {
                if let Some(done) = current.take() {
                    out.push(done);
                }
                confirmed += run;
                run = 0;
                emitted += 1;
            }
        }

        if confirmed > 0 {
            let new_head = geometry.advance(head, confirmed);
            self.core.head.0.store(new_head, Ordering::Release);
            self.stats.dequeued += emitted as u64;
            tracing::trace!(emitted, slots = confirmed, head = new_head, "dequeue");
        }
        emitted
    }

    /// Advance `head` by `n` descriptors without reading their flags.
    ///
    /// For callers that learned completion some other way (the device's
    /// head register). Clamped to the pending count.
    pub fn retire(&mut self, n: u32) -> u32 {
        let n = n.min(self.pending_count());
        let head = self.core.head.0.load(Ordering::Relaxed);
        self.core.head.0.store(self.core.geometry.advance(head, n), Ordering::Release);
        n
    }

    /// Rewind both indices to slot 0. The producer half must be idle;
    /// used when a stopped queue is restarted.
    pub(crate) fn reset_indices(&mut self) {
        self.core.head.0.store(0, Ordering::Release);
        self.core.tail.0.store(0, Ordering::Release);
    }

    /// Descriptors in flight as seen by the consumer. Never
    /// over-reports: a stale `tail` only hides fresh submissions.
    #[inline]
    pub fn pending_count(&self) -> u32 {
        self.core.pending_count()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pending_count() == 0
    }

    pub fn head(&self) -> u32 {
        self.core.head.0.load(Ordering::Relaxed)
    }

    pub fn geometry(&self) -> RingGeometry {
        self.core.geometry
    }

    /// Low 32 bits of the bus address of slot `index`.
    #[inline]
    pub fn byte_offset(&self, index: u32) -> u32 {
        self.core.byte_offset(index)
    }

    pub fn stats(&self) -> RingStats {
        self.stats
    }

    /// Hardware-side handle onto the same descriptor memory.
    pub fn device_view(&self) -> DeviceView<P> {
        self.core.device_view()
    }
}

// ── Owned ring ──

/// Both halves of one ring, owned together.
pub struct DescriptorRing<P: Payload, R: RegisterIo> {
    producer: RingProducer<P, R>,
    consumer: RingConsumer<P>,
}

impl<P: Payload, R: RegisterIo> DescriptorRing<P, R> {
    /// Allocate a ring sized by `config` (rounded up to a power of two).
    ///
    /// This is the ring's only allocation. An index doorbell carries a
    /// 16-bit tail, so such rings are capped at `INDEX_RING_LIMIT`.
    pub fn new(config: &RingConfig, regs: R, doorbell: Doorbell) -> Result<Self> {
        let geometry = RingGeometry::for_size(config.ring_size, config.max_ring_size)?;
        if matches!(doorbell, Doorbell::Index { .. }) && geometry.capacity() > INDEX_RING_LIMIT {
            tracing::error!(capacity = geometry.capacity(), max = INDEX_RING_LIMIT, "ring too large for an index doorbell");
            return Err(RingError::SizeExceedsMax {
                requested: config.ring_size,
                max: INDEX_RING_LIMIT,
            });
        }
        let region = Arc::new(DmaRegion::alloc(
            geometry.capacity() as usize * DescriptorSlot::<P>::SIZE,
        )?);
        let slots = region.as_ptr() as *mut DescriptorSlot<P>;

        tracing::info!(
            capacity = geometry.capacity(),
            requested = config.ring_size,
            slot_size = DescriptorSlot::<P>::SIZE,
            bus = format_args!("{:#x}", region.bus_address()),
            "descriptor ring created"
        );

        let core = Arc::new(RingCore {
            geometry,
            region,
            slots,
            head: PaddedIndex(AtomicU32::new(0)),
            tail: PaddedIndex(AtomicU32::new(0)),
        });
        Ok(Self {
            producer: RingProducer {
                core: Arc::clone(&core),
                regs,
                doorbell,
                irq_enable: config.irq_enable,
                policy: config.mismatch_policy,
                stats: RingStats::default(),
            },
            consumer: RingConsumer {
                core,
                stats: RingStats::default(),
            },
        })
    }

    /// Separate the submission and completion halves, e.g. to run them
    /// on two threads.
    pub fn split(self) -> (RingProducer<P, R>, RingConsumer<P>) {
        (self.producer, self.consumer)
    }

    pub fn producer(&mut self) -> &mut RingProducer<P, R> {
        &mut self.producer
    }

    pub fn consumer(&mut self) -> &mut RingConsumer<P> {
        &mut self.consumer
    }

    pub fn enqueue(&mut self, requests: &mut [P::Request]) -> usize {
        self.producer.enqueue(requests)
    }

    pub fn dequeue(&mut self, max: usize) -> Vec<Completion> {
        self.consumer.dequeue(max)
    }

    pub fn dequeue_into(&mut self, out: &mut Vec<Completion>, max: usize) -> usize {
        self.consumer.dequeue_into(out, max)
    }

    pub fn retire(&mut self, n: u32) -> u32 {
        self.consumer.retire(n)
    }

    /// Forget every in-flight descriptor. Only valid while the device
    /// queue is disabled.
    pub fn reset(&mut self) {
        self.consumer.reset_indices();
    }

    // ── Capacity ──

    #[inline]
    pub fn free_count(&self) -> u32 {
        self.producer.free_count()
    }

    #[inline]
    pub fn pending_count(&self) -> u32 {
        self.consumer.pending_count()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.consumer.is_empty()
    }

    // ── Accessors ──

    pub fn head(&self) -> u32 {
        self.consumer.head()
    }

    pub fn tail(&self) -> u32 {
        self.producer.tail()
    }

    pub fn capacity(&self) -> u32 {
        self.producer.capacity()
    }

    pub fn geometry(&self) -> RingGeometry {
        self.producer.geometry()
    }

    pub fn bus_address(&self) -> u64 {
        self.producer.bus_address()
    }

    #[inline]
    pub fn byte_offset(&self, index: u32) -> u32 {
        self.producer.byte_offset(index)
    }

    pub fn regs(&self) -> &R {
        self.producer.regs()
    }

    pub fn doorbell(&self) -> Doorbell {
        self.producer.doorbell()
    }

    pub fn set_doorbell(&mut self, doorbell: Doorbell) {
        self.producer.set_doorbell(doorbell);
    }

    pub fn irq_enable(&self) -> bool {
        self.producer.irq_enable()
    }

    pub fn set_irq_enable(&mut self, enable: bool) {
        self.producer.set_irq_enable(enable);
    }

    pub fn mismatch_policy(&self) -> MismatchPolicy {
        self.producer.mismatch_policy()
    }

    pub fn set_mismatch_policy(&mut self, policy: MismatchPolicy) {
        self.producer.set_mismatch_policy(policy);
    }

    /// Counters of both halves.
    pub fn stats(&self) -> RingStats {
        RingStats {
            dequeued: self.consumer.stats.dequeued,
            ..self.producer.stats
        }
    }

    pub fn device_view(&self) -> DeviceView<P> {
        self.producer.device_view()
    }
}

#[inline]
fn byte_offset<P: Payload>(bus_base: u64, index: u32) -> u32 {
    bus_base.wrapping_add(index as u64 * DescriptorSlot::<P>::SIZE as u64) as u32
}

/// The device's view of a ring's descriptor memory.
///
/// Reads descriptors the producer published and completes them in
/// place. It has no notion of head or tail; the device model tracks
/// its own position.
pub struct DeviceView<P> {
    region: Arc<DmaRegion>,
    slots: *mut DescriptorSlot<P>,
    geometry: RingGeometry,
}

// Safety: slot accesses go through volatile reads/writes plus the
// Release store of `done`; the Arc keeps the memory mapped.
unsafe impl<P: Payload> Send for DeviceView<P> {}
unsafe impl<P: Payload> Sync for DeviceView<P> {}

impl<P: Payload> DeviceView<P> {
    pub fn geometry(&self) -> RingGeometry {
        self.geometry
    }

    pub fn bus_address(&self) -> u64 {
        self.region.bus_address()
    }

    /// Low 32 bits of the bus address of slot `index`.
    pub fn byte_offset(&self, index: u32) -> u32 {
        byte_offset::<P>(self.region.bus_address(), self.geometry.wrap(index))
    }

    /// Slot index for a low-32-bit bus address inside this ring.
    pub fn index_of(&self, byte_offset: u32) -> Option<u32> {
        let base = self.region.bus_address() as u32;
        let rel = byte_offset.wrapping_sub(base) as usize;
        if rel % DescriptorSlot::<P>::SIZE != 0 {
            return None;
        }
        let index = rel / DescriptorSlot::<P>::SIZE;
        (index < self.geometry.capacity() as usize).then_some(index as u32)
    }

    /// Snapshot of slot `index`.
    pub fn read(&self, index: u32) -> DescriptorSlot<P> {
        unsafe { ptr::read_volatile(self.slot_ptr(index)) }
    }

    /// Complete slot `index`: `update` edits a copy, then `error`,
    /// `error_code` and the payload are written back and `done` is
    /// published last with Release ordering.
    ///
    /// Returns the slot as completed.
    pub fn complete_with(
        &self,
        index: u32,
        update: impl FnOnce(&mut DescriptorSlot<P>),
    ) -> DescriptorSlot<P> {
        let p = self.slot_ptr(index);
        let mut slot = unsafe { ptr::read_volatile(p) };
        update(&mut slot);
        unsafe {
            ptr::addr_of_mut!((*p).error).write_volatile(slot.error);
            ptr::addr_of_mut!((*p).error_code).write_volatile(slot.error_code);
            ptr::addr_of_mut!((*p).payload).write_volatile(slot.payload);
            DescriptorSlot::store_done(p);
        }
        slot.done = 1;
        slot
    }

    /// Complete slot `index` successfully, payload unchanged.
    pub fn complete(&self, index: u32) -> DescriptorSlot<P> {
        self.complete_with(index, |_| {})
    }

    /// Complete slot `index` with a device error.
    pub fn fail(&self, index: u32, error_code: u8) -> DescriptorSlot<P> {
        self.complete_with(index, |s| {
            s.error = 1;
            s.error_code = error_code;
        })
    }

    #[inline(always)]
    fn slot_ptr(&self, index: u32) -> *mut DescriptorSlot<P> {
        unsafe { self.slots.add(self.geometry.wrap(index) as usize) }
    }
}
