//! # dring-core
//!
//! Core types and traits for the dring hardware descriptor ring engine.
//!
//! This crate is platform-agnostic and performs no I/O of its own.
//! Default implementations (the ring itself, MMIO back-ends, pools)
//! live in `dring-module`.
//!
//! ## Modules
//!
//! - `geometry` - Power-of-two ring sizing and wrap-mask arithmetic
//! - `capacity` - Free/pending slot counts over (head, tail)
//! - `slot` - Hardware-visible descriptor slot layout and payload trait
//! - `request` - Request back-references, status bits, completions
//! - `regs` - Memory-mapped register access collaborator
//! - `notifier` - Interrupt/notification collaborator
//! - `barrier` - Producer/consumer memory barriers
//! - `error` - Error types
//! - `env` - Environment variable utilities

pub mod geometry;
pub mod capacity;
pub mod slot;
pub mod request;
pub mod regs;
pub mod notifier;
pub mod barrier;
pub mod error;
pub mod env;

// Re-exports for convenience
pub use geometry::RingGeometry;
pub use slot::{DescriptorSlot, Payload};
pub use request::{Completion, RequestCheck, RequestRef, RingRequest};
pub use regs::RegisterIo;
pub use notifier::Notifier;
pub use error::{Result, RingError};
pub use env::{env_get, env_get_bool};

/// Constants shared by the ring and the device model.
pub mod constants {
    /// Largest ring a queue may be configured with (descriptors).
    pub const RING_MAX_SIZE: u32 = 1024;

    /// Largest ring whose size and tail index fit 16-bit queue registers.
    pub const INDEX_RING_LIMIT: u32 = 1 << 15;

    /// Descriptor slot alignment required by the DMA engine.
    pub const SLOT_ALIGN: usize = 32;

    /// Page size assumed for DMA region rounding.
    pub const PAGE_SIZE: usize = 4096;

    /// Cache line size for alignment
    pub const CACHE_LINE_SIZE: usize = 64;
}
