//! # dring-module: Default implementations
//!
//! This crate provides the default implementation behind every
//! dring-core abstraction plus the ring engine itself.
//!
//! ## Default stack
//!
//! | Concern              | Implementation      | Notes                                  |
//! |----------------------|---------------------|----------------------------------------|
//! | Descriptor ring      | `DescriptorRing`    | enqueue / dequeue / retire             |
//! | Group completion     | `BatchCoordinator`  | FIFO of batches, hw head polling       |
//! | Queue assignment     | `QueueBitmap`       | acquire_first_free / release           |
//! | Admin path           | `QueueControl`      | setup / start / stop(flush) / release  |
//! | Descriptor memory    | `DmaRegion`         | anonymous page mapping                 |
//! | Registers            | `MmioRegion`        | `HeapRegisters` for simulation         |
//! | Object pool          | `ObjectPool`        | crossbeam `ArrayQueue`                 |
//! | Notification         | `EventFdNotifier`   |                                        |
//! | Context cache        | `ContextRegistry`   | explicit register/remove lifecycle     |
//! | Descriptor formats   | `fec`, `command`    | encode/decode, chained commands        |

pub mod config;
pub mod dma;
pub mod mmio;
pub mod ring;
pub mod batch;
pub mod queue_map;
pub mod control;
pub mod pool;
pub mod registry;
pub mod eventfd_notifier;
pub mod fec;
pub mod command;

#[cfg(test)]
mod testutil;

pub use config::{MismatchPolicy, RingConfig};
pub use dma::DmaRegion;
pub use mmio::{HeapRegisters, MmioRegion};
pub use ring::{DescriptorRing, DeviceView, Doorbell, RingConsumer, RingProducer, RingStats};
pub use batch::{BatchCoordinator, BatchHandle, BatchPoller, BatchSubmitter};
pub use queue_map::QueueBitmap;
pub use control::{QueueControl, QueueHandle, QueueKind};
pub use pool::ObjectPool;
pub use registry::ContextRegistry;
pub use eventfd_notifier::EventFdNotifier;
