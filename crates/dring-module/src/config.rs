//! Ring configuration
//!
//! Library defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Builder calls
//! 2. Environment variables (`from_env()`)
//! 3. Library defaults
//!
//! # Example
//!
//! ```rust,ignore
//! use dring_module::config::{MismatchPolicy, RingConfig};
//!
//! let config = RingConfig::from_env()
//!     .ring_size(512)
//!     .mismatch_policy(MismatchPolicy::FailFast);
//! ```

use std::str::FromStr;
use std::time::Duration;

use dring_core::env::{env_get, env_get_bool, env_get_micros};

/// Library defaults.
pub mod defaults {
    /// Descriptors per ring.
    pub const RING_SIZE: u32 = 256;
    /// Hardware-fixed maximum ring size.
    pub const MAX_RING_SIZE: u32 = dring_core::constants::RING_MAX_SIZE;
    /// Interrupt on the last descriptor of each enqueue.
    pub const IRQ_ENABLE: bool = false;
    /// Bounded wait for a queue flush acknowledgement.
    pub const FLUSH_TIMEOUT_US: u64 = 1000;
    /// Poll interval while waiting for the flush acknowledgement.
    pub const FLUSH_POLL_US: u64 = 10;
    /// Batch metadata objects preallocated per coordinator.
    pub const BATCH_POOL_SIZE: usize = 64;
    /// Requests one batch can track.
    pub const MAX_BATCH_OPS: usize = 64;
}

/// What the submission path does with a request whose buffer length
/// disagrees with the expected block size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MismatchPolicy {
    /// Flag the request, write it anyway, keep going.
    #[default]
    BestEffort,
    /// Flag the request, do not write it, stop the enqueue.
    FailFast,
}

impl FromStr for MismatchPolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s.to_lowercase().as_str() {
            "best-effort" | "best_effort" | "continue" => Ok(Self::BestEffort),
            "fail-fast" | "fail_fast" | "stop" => Ok(Self::FailFast),
            _ => Err(()),
        }
    }
}

/// Per-ring configuration with builder pattern.
#[derive(Debug, Clone)]
pub struct RingConfig {
    /// Requested descriptors (rounded up to a power of two)
    pub ring_size: u32,
    /// Hardware maximum ring size
    pub max_ring_size: u32,
    /// Interrupt enable for the queue
    pub irq_enable: bool,
    /// Length mismatch handling on enqueue
    pub mismatch_policy: MismatchPolicy,
    /// Flush acknowledgement timeout
    pub flush_timeout: Duration,
    /// Flush status poll interval
    pub flush_poll_interval: Duration,
    /// Batch pool size
    pub batch_pool_size: usize,
    /// Max requests per batch
    pub max_batch_ops: usize,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl RingConfig {
    /// Library defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `DRING_RING_SIZE` - Descriptors per ring
    /// - `DRING_MAX_RING_SIZE` - Hardware maximum
    /// - `DRING_IRQ_ENABLE` - Interrupt enable (0/1)
    /// - `DRING_MISMATCH_POLICY` - `best-effort` or `fail-fast`
    /// - `DRING_FLUSH_TIMEOUT_US` - Flush timeout in microseconds
    /// - `DRING_FLUSH_POLL_US` - Flush poll interval in microseconds
    /// - `DRING_BATCH_POOL` - Batch pool size
    /// - `DRING_MAX_BATCH_OPS` - Max requests per batch
    pub fn from_env() -> Self {
        Self {
            ring_size: env_get("DRING_RING_SIZE", defaults::RING_SIZE),
            max_ring_size: env_get("DRING_MAX_RING_SIZE", defaults::MAX_RING_SIZE),
            irq_enable: env_get_bool("DRING_IRQ_ENABLE", defaults::IRQ_ENABLE),
            mismatch_policy: env_get("DRING_MISMATCH_POLICY", MismatchPolicy::default()),
            flush_timeout: env_get_micros(
                "DRING_FLUSH_TIMEOUT_US",
                Duration::from_micros(defaults::FLUSH_TIMEOUT_US),
            ),
            flush_poll_interval: env_get_micros(
                "DRING_FLUSH_POLL_US",
                Duration::from_micros(defaults::FLUSH_POLL_US),
            ),
            batch_pool_size: env_get("DRING_BATCH_POOL", defaults::BATCH_POOL_SIZE),
            max_batch_ops: env_get("DRING_MAX_BATCH_OPS", defaults::MAX_BATCH_OPS),
        }
    }

    /// Library defaults, no environment lookups.
    /// Useful for testing or when you want full control.
    pub fn new() -> Self {
        Self {
            ring_size: defaults::RING_SIZE,
            max_ring_size: defaults::MAX_RING_SIZE,
            irq_enable: defaults::IRQ_ENABLE,
            mismatch_policy: MismatchPolicy::default(),
            flush_timeout: Duration::from_micros(defaults::FLUSH_TIMEOUT_US),
            flush_poll_interval: Duration::from_micros(defaults::FLUSH_POLL_US),
            batch_pool_size: defaults::BATCH_POOL_SIZE,
            max_batch_ops: defaults::MAX_BATCH_OPS,
        }
    }

    pub fn ring_size(mut self, n: u32) -> Self {
        self.ring_size = n;
        self
    }

    pub fn max_ring_size(mut self, n: u32) -> Self {
        self.max_ring_size = n;
        self
    }

    pub fn irq_enable(mut self, enable: bool) -> Self {
        self.irq_enable = enable;
        self
    }

    pub fn mismatch_policy(mut self, policy: MismatchPolicy) -> Self {
        self.mismatch_policy = policy;
        self
    }

    pub fn flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = timeout;
        self
    }

    pub fn flush_poll_interval(mut self, interval: Duration) -> Self {
        self.flush_poll_interval = interval;
        self
    }

    pub fn batch_pool_size(mut self, n: usize) -> Self {
        self.batch_pool_size = n.max(1);
        self
    }

    pub fn max_batch_ops(mut self, n: usize) -> Self {
        self.max_batch_ops = n.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = RingConfig::new();
        assert_eq!(c.ring_size, defaults::RING_SIZE);
        assert_eq!(c.mismatch_policy, MismatchPolicy::BestEffort);
        assert_eq!(c.flush_timeout, Duration::from_millis(1));
    }

    #[test]
    fn test_builder() {
        let c = RingConfig::new()
            .ring_size(8)
            .irq_enable(true)
            .mismatch_policy(MismatchPolicy::FailFast)
            .batch_pool_size(0);
        assert_eq!(c.ring_size, 8);
        assert!(c.irq_enable);
        assert_eq!(c.mismatch_policy, MismatchPolicy::FailFast);
        assert_eq!(c.batch_pool_size, 1);
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!("fail-fast".parse::<MismatchPolicy>(), Ok(MismatchPolicy::FailFast));
        assert_eq!("Best-Effort".parse::<MismatchPolicy>(), Ok(MismatchPolicy::BestEffort));
        assert!("sometimes".parse::<MismatchPolicy>().is_err());
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("DRING_MISMATCH_POLICY", "fail-fast");
        std::env::set_var("DRING_FLUSH_POLL_US", "25");
        let c = RingConfig::from_env();
        assert_eq!(c.mismatch_policy, MismatchPolicy::FailFast);
        assert_eq!(c.flush_poll_interval, Duration::from_micros(25));
        std::env::remove_var("DRING_MISMATCH_POLICY");
        std::env::remove_var("DRING_FLUSH_POLL_US");
    }
}
