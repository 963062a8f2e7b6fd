//! Typed retry policy.
//!
//! Each error kind has its own delay sequence; non-retryable kinds have
//! none. Rate-limit errors honor the upstream wait hint when one was
//! supplied. A small jitter keeps synchronized retries apart.

use rand::Rng;
use std::time::Duration;

use crate::utils::{ErrorKind, IngestError};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    network_delays: Vec<Duration>,
    timeout_delays: Vec<Duration>,
    rate_limit_delays: Vec<Duration>,
    /// Hard ceiling on attempts regardless of the per-kind sequences
    max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            network_delays: seconds(&[1, 2, 4]),
            timeout_delays: seconds(&[2, 4, 8]),
            rate_limit_delays: seconds(&[5, 15, 30]),
            max_attempts: 4,
        }
    }
}

fn seconds(values: &[u64]) -> Vec<Duration> {
    values.iter().map(|s| Duration::from_secs(*s)).collect()
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts: max_attempts.max(1), ..Self::default() }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retry number `attempt` (1-based count of failures so
    /// far). `None` means give up.
    pub fn delay_for(&self, error: &IngestError, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }

        let sequence = match error.kind() {
            ErrorKind::Network => &self.network_delays,
            ErrorKind::Timeout => &self.timeout_delays,
            ErrorKind::RateLimit => {
                // Upstream hint wins over the table.
                if let Some(hint) = error.retry_after() {
                    return Some(with_jitter(hint));
                }
                &self.rate_limit_delays
            }
            // auth, permission, not_found, validation, parsing, extraction,
            // internal: never retried here.
            _ => return None,
        };

        sequence.get(attempt as usize - 1).copied().map(with_jitter)
    }

    /// Whether this policy would retry the error at all.
    pub fn is_retryable(&self, error: &IngestError) -> bool {
        error.kind().is_retryable()
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        if self.max_attempts == 0 {
            return Err(IngestError::validation("retry policy must allow at least one attempt"));
        }
        if self.network_delays.is_empty()
            || self.timeout_delays.is_empty()
            || self.rate_limit_delays.is_empty()
        {
            return Err(IngestError::validation("retry policy delay sequences cannot be empty"));
        }
        Ok(())
    }
}

/// Up to 20% extra, so a herd of retries spreads out.
fn with_jitter(base: Duration) -> Duration {
    if base.is_zero() {
        return base;
    }
    let jitter = rand::thread_rng().gen_range(0.0..0.2);
    base + base.mul_f64(jitter)
}
