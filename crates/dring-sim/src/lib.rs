//! # dring-sim
//!
//! A software device for descriptor rings. It plays the hardware side:
//! picks up the doorbell, consumes descriptors strictly in order,
//! completes each one through a [`DeviceView`] (status first, `done`
//! last), publishes its head, raises the notifier for descriptors with
//! `irq_en` and acknowledges queue flushes.
//!
//! The device keeps no head of its own. It reads back the head register
//! it publishes, so a queue restart that zeroes the register also
//! rewinds the device.
//!
//! Faults are injected through [`SimControl`]: a stalled device makes
//! no progress and a hung one never acknowledges a flush.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use dring_core::env::env_get_micros;
use dring_core::notifier::Notifier;
use dring_core::regs::RegisterIo;
use dring_core::slot::{DescriptorSlot, Payload};
use dring_module::control::{layout, QueueHandle};
use dring_module::ring::{DeviceView, Doorbell};

/// Descriptors handled per loop iteration of a spawned device.
const STEP_BATCH: usize = 64;

/// Where the device publishes the next descriptor it will process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadReport {
    /// 16-bit slot index.
    Index { offset: usize },
    /// Low 32 bits of the slot's bus address.
    ByteOffset { offset: usize },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimStats {
    pub processed: u64,
    pub interrupts: u64,
    pub flushes: u64,
    pub bad_doorbells: u64,
}

/// Fault switches, shared with a running device thread.
#[derive(Debug, Default)]
pub struct SimControl {
    stalled: AtomicBool,
    hang_flush: AtomicBool,
}

impl SimControl {
    /// Stop processing descriptors and acknowledging flushes.
    pub fn stall(&self) {
        self.stalled.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.stalled.store(false, Ordering::Release);
    }

    pub fn is_stalled(&self) -> bool {
        self.stalled.load(Ordering::Acquire)
    }

    /// Never acknowledge a flush request.
    pub fn set_hang_flush(&self, hang: bool) {
        self.hang_flush.store(hang, Ordering::Release);
    }

    pub fn hangs_flush(&self) -> bool {
        self.hang_flush.load(Ordering::Acquire)
    }
}

/// Per-queue control registers the device watches.
#[derive(Debug, Clone, Copy)]
struct QueueRegs {
    enable: usize,
    flush_en: usize,
    flush_status: usize,
}

type Handler<P> = Box<dyn FnMut(&mut DescriptorSlot<P>) + Send>;

pub struct SimDevice<P: Payload, R: RegisterIo> {
    view: DeviceView<P>,
    regs: R,
    doorbell: Doorbell,
    head_report: HeadReport,
    queue: Option<QueueRegs>,
    handler: Handler<P>,
    notifier: Option<Arc<dyn Notifier>>,
    control: Arc<SimControl>,
    idle_sleep: Duration,
    stats: SimStats,
}

impl<P: Payload, R: RegisterIo> SimDevice<P, R> {
    /// A device reading `doorbell` and publishing its head at
    /// `head_report`. Every descriptor completes successfully until a
    /// handler is installed.
    pub fn new(view: DeviceView<P>, regs: R, doorbell: Doorbell, head_report: HeadReport) -> Self {
        Self {
            view,
            regs,
            doorbell,
            head_report,
            queue: None,
            handler: Box::new(|_| {}),
            notifier: None,
            control: Arc::new(SimControl::default()),
            idle_sleep: env_get_micros("DRING_SIM_IDLE_US", Duration::from_micros(20)),
            stats: SimStats::default(),
        }
    }

    /// A device behind an assigned hardware queue: shadow-tail doorbell,
    /// head pointer register, enable and flush handshake.
    pub fn for_queue(view: DeviceView<P>, regs: R, queue: &QueueHandle) -> Self {
        let ctrl = queue.ctrl_offset();
        let mut dev = Self::new(
            view,
            regs,
            queue.doorbell(),
            HeadReport::Index { offset: queue.head_point_offset() },
        );
        dev.queue = Some(QueueRegs {
            enable: ctrl + layout::ring_ctrl::ENABLE,
            flush_en: ctrl + layout::ring_ctrl::FLUSH_EN,
            flush_status: layout::flush_status(queue.index() as usize),
        });
        dev
    }

    /// Inspect or rewrite each descriptor before it is completed.
    pub fn with_handler(mut self, handler: impl FnMut(&mut DescriptorSlot<P>) + Send + 'static) -> Self {
        self.handler = Box::new(handler);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_idle_sleep(mut self, idle: Duration) -> Self {
        self.idle_sleep = idle;
        self
    }

    /// Handle for fault injection.
    pub fn control(&self) -> Arc<SimControl> {
        Arc::clone(&self.control)
    }

    pub fn stall(&self) {
        self.control.stall();
    }

    pub fn stats(&self) -> SimStats {
        self.stats
    }

    /// Process up to `max` descriptors, then service a pending flush.
    /// Returns the number of descriptors completed.
    pub fn step(&mut self, max: usize) -> usize {
        let processed = if self.control.is_stalled() || !self.enabled() {
            0
        } else {
            self.process(max)
        };
        self.service_flush();
        processed
    }

    /// Run the device on its own thread until `stop` is set.
    pub fn spawn(mut self, stop: Arc<AtomicBool>) -> io::Result<JoinHandle<SimStats>>
    where
        R: 'static,
    {
        thread::Builder::new().name("dring-sim".into()).spawn(move || {
            tracing::debug!("sim device running");
            while !stop.load(Ordering::Acquire) {
                if self.step(STEP_BATCH) == 0 {
                    thread::sleep(self.idle_sleep);
                }
            }
            tracing::debug!(processed = self.stats.processed, "sim device stopped");
            self.stats
        })
    }

    fn enabled(&self) -> bool {
        self.queue.map_or(true, |q| self.regs.read_u8(q.enable) != 0)
    }

    fn process(&mut self, max: usize) -> usize {
        let Some(tail) = self.read_tail() else {
            return 0;
        };
        let geometry = self.view.geometry();
        let mut head = self.read_head();
        let mut done = 0usize;

        while head != tail && done < max {
            let handler = &mut self.handler;
            let slot = self.view.complete_with(head, |s| handler(s));
            if slot.irq_en != 0 {
                self.raise_irq();
            }
            head = geometry.advance(head, 1);
            done += 1;
        }

        if done > 0 {
            self.write_head(head);
            self.stats.processed += done as u64;
            tracing::trace!(done, head, tail, "sim processed");
        }
        done
    }

    fn read_tail(&mut self) -> Option<u32> {
        let tail = match self.doorbell {
            Doorbell::Index { offset } => {
                let index = self.regs.read_u16(offset) as u32;
                (index < self.view.geometry().capacity()).then_some(index)
            }
            Doorbell::ByteOffset { offset, .. } => {
                let raw = self.regs.read_u32(offset);
                if raw == 0 {
                    // Never rung
                    return None;
                }
                self.view.index_of(raw)
            }
        };
        if tail.is_none() {
            self.stats.bad_doorbells += 1;
            tracing::warn!(doorbell = ?self.doorbell, "doorbell outside the ring");
        }
        tail
    }

    fn read_head(&self) -> u32 {
        match self.head_report {
            HeadReport::Index { offset } => self.view.geometry().wrap(self.regs.read_u16(offset) as u32),
            HeadReport::ByteOffset { offset } => self.view.index_of(self.regs.read_u32(offset)).unwrap_or(0),
        }
    }

    fn write_head(&self, head: u32) {
        match self.head_report {
            HeadReport::Index { offset } => self.regs.write_u16(offset, head as u16),
            HeadReport::ByteOffset { offset } => self.regs.write_u32(offset, self.view.byte_offset(head)),
        }
    }

    fn raise_irq(&mut self) {
        self.stats.interrupts += 1;
        if let Some(notifier) = &self.notifier {
            if let Err(e) = notifier.notify() {
                tracing::warn!(error = %e, "sim interrupt delivery failed");
            }
        }
    }

    /// Acknowledge a requested flush once every rung descriptor is done.
    fn service_flush(&mut self) {
        let Some(q) = self.queue else {
            return;
        };
        if self.regs.read_u8(q.flush_en) == 0 || self.regs.read_u8(q.flush_status) & 0x1 != 0 {
            return;
        }
        if self.control.is_stalled() || self.control.hangs_flush() {
            return;
        }
        let idle = match self.read_tail() {
            Some(tail) => tail == self.read_head(),
            None => true,
        };
        if idle {
            self.regs.write_u8(q.flush_status, 1);
            self.stats.flushes += 1;
            tracing::debug!(flush_status = q.flush_status, "sim flush acknowledged");
        }
    }
}
