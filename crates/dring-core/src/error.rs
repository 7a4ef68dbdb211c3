//! dring error types.
//!
//! Only construction and administrative operations return these.
//! The submission and completion hot paths report backpressure and
//! not-ready conditions through counts and `Option`.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RingError {
    /// Ring size is zero or not a power of two.
    #[error("invalid ring size {0}")]
    InvalidSize(u32),
    /// Ring size exceeds the hardware-fixed maximum.
    #[error("ring size {requested} exceeds maximum {max}")]
    SizeExceedsMax { requested: u32, max: u32 },
    /// Queue-to-function mapping has not been programmed by the PF.
    #[error("hardware queue map not ready")]
    QueueMapNotReady,
    /// No hardware queue is bound to this function.
    #[error("no hardware queues bound to this function")]
    NoHardwareQueues,
    /// Every bound queue of the requested kind is already assigned.
    #[error("no free hardware queue")]
    NoFreeQueue,
    /// Queue index has no live setup.
    #[error("queue {0} is not set up")]
    QueueNotSetUp(u32),
    /// Administrative operation was not acknowledged in time.
    #[error("queue {queue} {op} timed out after {waited_us}us")]
    Timeout {
        queue: u32,
        op: &'static str,
        waited_us: u64,
    },
    /// Fixed-capacity pool had no object to hand out.
    #[error("{0} pool exhausted")]
    PoolExhausted(&'static str),
    /// mmap of the descriptor region failed.
    #[error("mmap failed: errno {0}")]
    MmapFailed(i32),
    /// OS error with errno.
    #[error("OS error: errno {0}")]
    Os(i32),
}

pub type Result<T> = std::result::Result<T, RingError>;
