//! Completion notification abstraction.
//!
//! The device side raises a `Notifier` when a descriptor with `irq_en`
//! completes. Together with the doorbell write this is the only signal
//! that crosses the ring boundary.
//!
//! # Implementors
//!
//! - `EventFdNotifier` (default): writes 1 to an eventfd.
//!   The consumer polls/reads the eventfd and then calls `dequeue()`.

use crate::error::Result;

/// Wakes the consumer when completions are ready.
///
/// **Contract:**
/// - `notify()` must NEVER block.
/// - Multiple calls before the consumer wakes are coalesced.
pub trait Notifier: Send + Sync {
    /// Signal that new completions are available.
    fn notify(&self) -> Result<()>;
}
