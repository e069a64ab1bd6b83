use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Exponential backoff limits for transient upload failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt before giving up.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    pub fn validate(&self) -> Result<(), String> {
        if self.base_delay_ms == 0 {
            return Err("retry base delay must be positive".into());
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(format!(
                "retry max delay ({}ms) is below the base delay ({}ms)",
                self.max_delay_ms, self.base_delay_ms
            ));
        }
        Ok(())
    }

    /// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`,
    /// capped at `max_delay_ms`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(63);
        let factor = 1u64 << exponent;
        let millis = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(millis)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// Retry state for one operation: consecutive failures and the earliest
/// time the next attempt may start.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    failures: u32,
    next_eligible_at: Option<Instant>,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            failures: 0,
            next_eligible_at: None,
        }
    }

    pub fn record_failure(&mut self, now: Instant) -> RetryDecision {
        self.failures += 1;
        if self.failures > self.policy.max_retries {
            self.next_eligible_at = None;
            return RetryDecision::GiveUp;
        }
        let delay = self.policy.delay_for(self.failures);
        self.next_eligible_at = Some(now + delay);
        RetryDecision::RetryAfter(delay)
    }

    /// A success resets the budget; the next failure starts at the base delay.
    pub fn record_success(&mut self) {
        self.failures = 0;
        self.next_eligible_at = None;
    }

    /// Attempts made so far in the current failure streak.
    pub fn attempts(&self) -> u32 {
        self.failures
    }

    pub fn next_eligible_at(&self) -> Option<Instant> {
        self.next_eligible_at
    }

    pub fn is_eligible(&self, now: Instant) -> bool {
        self.next_eligible_at.is_none_or(|at| now >= at)
    }
}
