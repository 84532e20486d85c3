//! Backoff between claim attempts after a lost compare-and-swap.

use std::time::Duration;

/// How long `claim_task` waits before re-selecting after losing a race.
///
/// delay = base_delay * multiplier^(attempts - 1), capped at `max_delay`.
///
/// Example with base_delay=25ms, multiplier=2.0:
/// - attempt 1: 25ms
/// - attempt 2: 50ms
/// - attempt 3: 100ms
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimRetryPolicy {
    /// Number of selection + CAS rounds before giving up for this call.
    pub max_attempts: u32,

    pub base_delay: Duration,

    pub multiplier: f64,

    pub max_delay: Duration,
}

impl Default for ClaimRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(25),
            multiplier: 2.0,
            max_delay: Duration::from_secs(1),
        }
    }
}

impl ClaimRetryPolicy {
    /// Delay after the `attempts`-th lost race (1-indexed).
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let exponent = i32::try_from(attempts.saturating_sub(1)).unwrap_or(i32::MAX);
        let delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        // clamp before converting: a steep curve overflows Duration
        let capped = delay_secs.min(self.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.max_delay)
    }
}
