//! `BatchCoordinator`: group completion over a byte-offset ring.
//!
//! Some devices never write per-descriptor completion flags. Instead
//! they expose a head register holding the bus address (low 32 bits) of
//! the next descriptor they will process. The coordinator submits
//! requests in batches, remembers each batch's byte span on the ring,
//! and declares a batch complete once the reported head has left that
//! span.
//!
//! Batches complete in submission order, so pending batches sit in a
//! FIFO and only the oldest is ever tested. Batch metadata comes from a
//! fixed pool; steady-state submit/poll does not allocate.
//!
//! [`BatchCoordinator::split`] separates a [`BatchSubmitter`] and a
//! [`BatchPoller`] for a submitting thread and a polling thread. The
//! FIFO and the pool are lock-free queues, so neither side blocks the
//! other.
//!
//! A device that never finishes a batch makes `poll_batch` return
//! `None` forever. [`BatchPoller::oldest_age`] lets the caller bound
//! that wait.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_queue::ArrayQueue;
use dring_core::regs::RegisterIo;
use dring_core::request::{Completion, RequestRef, RingRequest};
use dring_core::slot::Payload;
use dring_core::RingError;

use crate::config::RingConfig;
use crate::pool::ObjectPool;
use crate::ring::{DescriptorRing, Doorbell, RingConsumer, RingProducer};

/// Summary of a submitted batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchHandle {
    pub id: u64,
    /// Requests written.
    pub requests: usize,
    /// Descriptors those requests occupy.
    pub descriptors: u32,
    pub head_offset: u32,
    pub tail_offset: u32,
}

struct Batch {
    id: u64,
    head_offset: u32,
    tail_offset: u32,
    refs: Vec<RequestRef>,
    descriptors: u32,
    consumed: usize,
    retired: bool,
    submitted_at: Instant,
}

impl Batch {
    fn with_capacity(max_ops: usize) -> Self {
        Self {
            id: 0,
            head_offset: 0,
            tail_offset: 0,
            refs: Vec::with_capacity(max_ops),
            descriptors: 0,
            consumed: 0,
            retired: false,
            submitted_at: Instant::now(),
        }
    }
}

/// Is the device still inside the span `[head_offset, tail_offset)`?
///
/// A span with `head_offset >= tail_offset` wraps past the end of the
/// ring, so it covers `[head_offset, end) ∪ [start, tail_offset)`.
/// An empty span (`head_offset == tail_offset`) is never in progress.
#[inline]
pub fn span_in_progress(head_offset: u32, tail_offset: u32, hw_head: u32) -> bool {
    if head_offset == tail_offset {
        false
    } else if head_offset < tail_offset {
        hw_head >= head_offset && hw_head < tail_offset
    } else {
        hw_head >= head_offset || hw_head < tail_offset
    }
}

/// Submitted batches, oldest first, and the free list they come from.
///
/// `pending` never holds more than the pool's capacity, so a push after
/// a successful `pool.get()` always fits.
struct BatchFifo {
    pending: ArrayQueue<Batch>,
    pool: ObjectPool<Batch>,
}

impl BatchFifo {
    fn recycle(&self, mut batch: Batch) {
        batch.refs.clear();
        self.pool.put(batch);
    }

    /// Batches checked out of the pool: queued, or held by the poller.
    fn in_flight(&self) -> usize {
        self.pool.capacity() - self.pool.available()
    }
}

// ── Submit side ──

pub struct BatchSubmitter<P: Payload, R: RegisterIo> {
    ring: RingProducer<P, R>,
    fifo: Arc<BatchFifo>,
    max_batch_ops: usize,
    next_id: u64,
}

impl<P: Payload, R: RegisterIo> BatchSubmitter<P, R> {
    /// Submit up to `max_batch_ops` of `requests` as one batch.
    ///
    /// `None` when no batch object is available or nothing could be
    /// written; no request is consumed in that case.
    pub fn submit_batch(&mut self, requests: &mut [P::Request]) -> Option<BatchHandle> {
        let Some(mut batch) = self.fifo.pool.get() else {
            tracing::error!(error = %RingError::PoolExhausted("batch"), "batch allocation failed");
            return None;
        };

        let n = requests.len().min(self.max_batch_ops);
        let requests = &mut requests[..n];

        let tail_before = self.ring.tail();
        let head_offset = self.ring.byte_offset(tail_before);
        let written = self.ring.enqueue(requests);
        if written == 0 {
            self.fifo.recycle(batch);
            return None;
        }

        let tail_after = self.ring.tail();
        batch.id = self.next_id;
        batch.head_offset = head_offset;
        batch.tail_offset = self.ring.byte_offset(tail_after);
        batch.descriptors = self.ring.geometry().wrap(tail_after.wrapping_sub(tail_before));
        batch.refs.clear();
        batch.refs.extend(requests[..written].iter().map(|r| r.request_ref()));
        batch.consumed = 0;
        batch.retired = false;
        batch.submitted_at = Instant::now();
        self.next_id += 1;

        let handle = BatchHandle {
            id: batch.id,
            requests: written,
            descriptors: batch.descriptors,
            head_offset: batch.head_offset,
            tail_offset: batch.tail_offset,
        };
        tracing::debug!(
            id = handle.id,
            requests = written,
            descriptors = handle.descriptors,
            head = format_args!("{:#x}", handle.head_offset),
            tail = format_args!("{:#x}", handle.tail_offset),
            "batch submitted"
        );
        if let Err(batch) = self.fifo.pending.push(batch) {
            tracing::error!(id = batch.id, "batch fifo overflow");
            self.fifo.recycle(batch);
        }
        Some(handle)
    }

    pub fn pending_batches(&self) -> usize {
        self.fifo.in_flight()
    }

    pub fn available_batches(&self) -> usize {
        self.fifo.pool.available()
    }

    pub fn ring(&self) -> &RingProducer<P, R> {
        &self.ring
    }

    /// Producer access for the administrative path (interrupt enable).
    pub fn ring_mut(&mut self) -> &mut RingProducer<P, R> {
        &mut self.ring
    }
}

// ── Poll side ──

pub struct BatchPoller<P: Payload, R: RegisterIo> {
    ring: RingConsumer<P>,
    regs: R,
    /// Register holding the device's current head (low 32 bits of a bus address).
    hw_head_reg: usize,
    fifo: Arc<BatchFifo>,
    /// Oldest batch, taken off the FIFO and possibly partly drained.
    current: Option<Batch>,
    max_batch_ops: usize,
}

impl<P: Payload, R: RegisterIo> BatchPoller<P, R> {
    fn front(&mut self) -> Option<&mut Batch> {
        if self.current.is_none() {
            self.current = self.fifo.pending.pop();
        }
        self.current.as_mut()
    }

    /// Hand back up to `max` completions of the oldest batch.
    ///
    /// `None` while the device is still inside that batch (or nothing
    /// is pending). Partial drains keep the batch as the oldest; it is
    /// recycled once every request has been handed back.
    pub fn poll_batch(&mut self, max: usize) -> Option<Vec<Completion>> {
        let mut out = Vec::with_capacity(max.min(self.max_batch_ops));
        self.poll_batch_into(&mut out, max).map(|_| out)
    }

    /// Like [`poll_batch`](Self::poll_batch) but appends to `out`.
    pub fn poll_batch_into(&mut self, out: &mut Vec<Completion>, max: usize) -> Option<usize> {
        self.front()?;
        let batch = self.current.as_mut()?;

        if !batch.retired {
            let hw_head = self.regs.read_u32(self.hw_head_reg);
            if span_in_progress(batch.head_offset, batch.tail_offset, hw_head) {
                return None;
            }
            // The device is past the batch: its descriptors are free again.
            self.ring.retire(batch.descriptors);
            batch.retired = true;
            tracing::trace!(id = batch.id, hw_head = format_args!("{:#x}", hw_head), "batch complete");
        }

        let take = (batch.refs.len() - batch.consumed).min(max);
        let start = batch.consumed;
        out.extend(batch.refs[start..start + take].iter().map(|&r| Completion::success(r)));
        batch.consumed += take;

        if batch.consumed == batch.refs.len() {
            if let Some(done) = self.current.take() {
                self.fifo.recycle(done);
            }
        }
        Some(take)
    }

    /// Age of the oldest pending batch.
    pub fn oldest_age(&mut self) -> Option<Duration> {
        self.front().map(|b| b.submitted_at.elapsed())
    }

    pub fn pending_batches(&self) -> usize {
        self.fifo.in_flight()
    }

    pub fn ring(&self) -> &RingConsumer<P> {
        &self.ring
    }

    fn clear(&mut self) {
        if let Some(batch) = self.current.take() {
            self.fifo.recycle(batch);
        }
        while let Some(batch) = self.fifo.pending.pop() {
            self.fifo.recycle(batch);
        }
    }
}

// ── Both sides ──

pub struct BatchCoordinator<P: Payload, R: RegisterIo> {
    submitter: BatchSubmitter<P, R>,
    poller: BatchPoller<P, R>,
}

impl<P: Payload, R: RegisterIo + Clone> BatchCoordinator<P, R> {
    /// Take over `ring` and point the device head register at the ring's
    /// tail, so an idle device reads as "before the first batch".
    pub fn new(ring: DescriptorRing<P, R>, hw_head_reg: usize, config: &RingConfig) -> Self {
        if !matches!(ring.doorbell(), Doorbell::ByteOffset { .. }) {
            tracing::warn!("batch coordinator over an index doorbell ring");
        }
        let max_batch_ops = config.max_batch_ops.max(1);
        let pool = ObjectPool::new(config.batch_pool_size, || Batch::with_capacity(max_batch_ops));
        let fifo = Arc::new(BatchFifo {
            pending: ArrayQueue::new(pool.capacity()),
            pool,
        });

        let regs = ring.regs().clone();
        let (producer, consumer) = ring.split();
        let mut coordinator = Self {
            submitter: BatchSubmitter {
                ring: producer,
                fifo: Arc::clone(&fifo),
                max_batch_ops,
                next_id: 0,
            },
            poller: BatchPoller {
                ring: consumer,
                regs,
                hw_head_reg,
                fifo,
                current: None,
                max_batch_ops,
            },
        };
        coordinator.prime_head();
        coordinator
    }
}

impl<P: Payload, R: RegisterIo> BatchCoordinator<P, R> {
    fn prime_head(&mut self) {
        let offset = self.submitter.ring.byte_offset(self.submitter.ring.tail());
        self.poller.regs.write_u32(self.poller.hw_head_reg, offset);
        tracing::debug!(head = format_args!("{:#x}", offset), "device head primed");
    }

    /// Separate the submit and poll sides.
    pub fn split(self) -> (BatchSubmitter<P, R>, BatchPoller<P, R>) {
        (self.submitter, self.poller)
    }

    pub fn submit_batch(&mut self, requests: &mut [P::Request]) -> Option<BatchHandle> {
        self.submitter.submit_batch(requests)
    }

    pub fn poll_batch(&mut self, max: usize) -> Option<Vec<Completion>> {
        self.poller.poll_batch(max)
    }

    pub fn poll_batch_into(&mut self, out: &mut Vec<Completion>, max: usize) -> Option<usize> {
        self.poller.poll_batch_into(out, max)
    }

    pub fn oldest_age(&mut self) -> Option<Duration> {
        self.poller.oldest_age()
    }

    pub fn pending_batches(&self) -> usize {
        self.poller.pending_batches()
    }

    pub fn available_batches(&self) -> usize {
        self.submitter.available_batches()
    }

    pub fn producer(&self) -> &RingProducer<P, R> {
        self.submitter.ring()
    }

    pub fn producer_mut(&mut self) -> &mut RingProducer<P, R> {
        self.submitter.ring_mut()
    }

    pub fn consumer(&self) -> &RingConsumer<P> {
        self.poller.ring()
    }

    /// Drop every pending batch, rewind the ring and re-prime the
    /// device head. Only valid while the queue is stopped.
    pub fn reset(&mut self) {
        self.poller.clear();
        self.poller.ring.reset_indices();
        self.prime_head();
    }
}
