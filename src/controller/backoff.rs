//! # Exponential Backoff
//!
//! Per-item exponential backoff used by the work queue for rate-limited re-adds.
//!
//! The delay for an item that already failed `n` times is `base * 2^n`, capped at `max`.
//! With the defaults (5ms base, 1000s max) the sequence is 5ms, 10ms, 20ms, 40ms, ...
//!
//! ## Usage
//!
//! ```rust
//! use std::time::Duration;
//! use vault_engine_controller::controller::backoff::ExponentialBackoff;
//!
//! let backoff = ExponentialBackoff::new(Duration::from_millis(5), Duration::from_secs(1000));
//! assert_eq!(backoff.delay(0), Duration::from_millis(5));
//! assert_eq!(backoff.delay(1), Duration::from_millis(10));
//! assert_eq!(backoff.delay(2), Duration::from_millis(20));
//! ```

use std::time::Duration;

/// Exponential backoff calculator
///
/// Stateless: the failure count is tracked per item by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
}

impl ExponentialBackoff {
    /// Create a backoff starting at `base` and capped at `max`
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before the next attempt of an item that already failed `failures` times
    ///
    /// # Example
    ///
    /// ```
    /// use std::time::Duration;
    /// use vault_engine_controller::controller::backoff::ExponentialBackoff;
    ///
    /// let backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(10));
    /// assert_eq!(backoff.delay(3), Duration::from_secs(8));
    /// assert_eq!(backoff.delay(4), Duration::from_secs(10));
    /// ```
    #[must_use]
    pub fn delay(&self, failures: u32) -> Duration {
        let factor = 2u32.checked_pow(failures).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}
