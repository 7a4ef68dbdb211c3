//! Environment variable helpers for configuration overrides.
//!
//! ```ignore
//! use dring_core::env::{env_get, env_get_bool, env_get_micros};
//!
//! let size: u32 = env_get("DRING_RING_SIZE", 256);
//! let irq = env_get_bool("DRING_IRQ_ENABLE", true);
//! let timeout = env_get_micros("DRING_FLUSH_TIMEOUT_US", Duration::from_millis(1));
//! ```

use std::str::FromStr;
use std::time::Duration;

/// Variable parsed as `T`, or `default` when unset or unparsable.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Boolean variable. "1", "true", "yes", "on" (any case) are true;
/// any other set value is false; unset returns `default`.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(val.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// Duration given in microseconds.
#[inline]
pub fn env_get_micros(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_micros)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_returns_default() {
        let val: u32 = env_get("__DRING_TEST_UNSET__", 42);
        assert_eq!(val, 42);
        assert!(env_get_bool("__DRING_TEST_UNSET__", true));
        assert_eq!(
            env_get_micros("__DRING_TEST_UNSET__", Duration::from_micros(5)),
            Duration::from_micros(5)
        );
    }

    #[test]
    fn test_parse_and_fallback() {
        std::env::set_var("__DRING_TEST_NUM__", " 128 ");
        let val: u32 = env_get("__DRING_TEST_NUM__", 0);
        assert_eq!(val, 128);

        std::env::set_var("__DRING_TEST_NUM__", "lots");
        let val: u32 = env_get("__DRING_TEST_NUM__", 9);
        assert_eq!(val, 9);
        std::env::remove_var("__DRING_TEST_NUM__");
    }

    #[test]
    fn test_bool_variants() {
        for (raw, expected) in [("1", true), ("TRUE", true), ("on", true), ("0", false), ("nope", false)] {
            std::env::set_var("__DRING_TEST_BOOL__", raw);
            assert_eq!(env_get_bool("__DRING_TEST_BOOL__", !expected), expected, "{}", raw);
        }
        std::env::remove_var("__DRING_TEST_BOOL__");
    }

    #[test]
    fn test_micros() {
        std::env::set_var("__DRING_TEST_US__", "250");
        assert_eq!(
            env_get_micros("__DRING_TEST_US__", Duration::ZERO),
            Duration::from_micros(250)
        );
        std::env::remove_var("__DRING_TEST_US__");
    }
}
