//! Reconnection policy
//!
//! Exponential backoff with a cap and optional retry limit:
//! `initial, initial*f, initial*f^2, ... min(max)`.

use std::time::Duration;

use crate::config::reconnect::{BACKOFF_FACTOR, INITIAL_BACKOFF_MS, MAX_BACKOFF_MS, MAX_RETRIES};
use crate::error::{RadioError, Result};

/// Backoff parameters, immutable once a stream is built
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Must be > 1
    pub backoff_factor: f64,
    /// 0 = retry forever
    pub max_retries: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(MAX_BACKOFF_MS),
            backoff_factor: BACKOFF_FACTOR,
            max_retries: MAX_RETRIES,
        }
    }
}

impl ReconnectConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.backoff_factor.is_finite() || self.backoff_factor <= 1.0 {
            return Err(RadioError::Config(format!(
                "backoff factor must be a finite value above 1 (got {})",
                self.backoff_factor
            )));
        }
        if self.initial_backoff > self.max_backoff {
            return Err(RadioError::Config(format!(
                "initial backoff {:?} exceeds max backoff {:?}",
                self.initial_backoff, self.max_backoff
            )));
        }
        Ok(())
    }
}

/// Outcome of recording a failed reconnect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for the (escalated) delay and try again
    Retry(Duration),
    /// `max_retries` exceeded; the count of failed attempts
    GiveUp(u32),
}

/// Mutable backoff state for one producer.
#[derive(Debug)]
pub struct Backoff {
    config: ReconnectConfig,
    current: Duration,
    retries: u32,
}

impl Backoff {
    pub fn new(config: ReconnectConfig) -> Self {
        let current = config.initial_backoff;
        Self {
            config,
            current,
            retries: 0,
        }
    }

    /// Delay to wait before the next reconnect attempt
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Consecutive failed reconnect attempts
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Data flowed again: start the next failure sequence from scratch
    pub fn reset(&mut self) {
        self.current = self.config.initial_backoff;
        self.retries = 0;
    }

    /// A reconnect attempt failed.
    pub fn record_failure(&mut self) -> RetryDecision {
        self.retries = self.retries.saturating_add(1);
        if self.config.max_retries > 0 && self.retries > self.config.max_retries {
            return RetryDecision::GiveUp(self.retries);
        }
        let next_nanos = self.current.as_nanos() as f64 * self.config.backoff_factor;
        let max = self.config.max_backoff;
        self.current = if next_nanos.is_finite() && next_nanos < max.as_nanos() as f64 {
            Duration::from_nanos(next_nanos as u64)
        } else {
            max
        };
        RetryDecision::Retry(self.current)
    }
}
