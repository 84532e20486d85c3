//! Queue tuning: lease length, heartbeat cadence, claim retry, draw size.

use std::time::Duration;

use super::ClaimRetryPolicy;
use crate::domain::QuireError;

/// Tuning for the queue and the heartbeat that keeps its leases alive.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    /// Visibility timeout. Long enough for one stage call plus heartbeat
    /// jitter, short enough that a dead worker's task comes back promptly.
    pub lease: Duration,

    /// How often a running stage renews its lease. Must be shorter than `lease`.
    pub heartbeat_interval: Duration,

    pub claim_retry: ClaimRetryPolicy,

    /// Candidate words drawn for an impression task when the caller does
    /// not say how many.
    pub impression_word_count: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            lease: Duration::from_secs(5 * 60),
            heartbeat_interval: Duration::from_secs(60),
            claim_retry: ClaimRetryPolicy::default(),
            impression_word_count: 50,
        }
    }
}

impl QueueConfig {
    /// Reject settings the queue cannot run with. Called by `Queue::new`.
    pub fn validate(&self) -> Result<(), QuireError> {
        if self.lease.is_zero() {
            return Err(QuireError::Config("lease must be positive".into()));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(QuireError::Config("heartbeat interval must be positive".into()));
        }
        if self.heartbeat_interval >= self.lease {
            return Err(QuireError::Config(format!(
                "heartbeat interval {:?} must be shorter than the lease {:?}",
                self.heartbeat_interval, self.lease
            )));
        }
        if self.claim_retry.max_attempts == 0 {
            return Err(QuireError::Config("claim attempts must be at least 1".into()));
        }
        let multiplier = self.claim_retry.multiplier;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(QuireError::Config(format!(
                "claim backoff multiplier must be a finite number >= 1.0, got {multiplier}"
            )));
        }
        if self.impression_word_count == 0 {
            return Err(QuireError::Config("impression word count must be at least 1".into()));
        }
        Ok(())
    }
}
