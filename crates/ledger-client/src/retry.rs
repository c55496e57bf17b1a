//! Retry Options and Backoff
//!
//! Exponential backoff is a pure function of the attempt number, the options
//! and a jitter sample, so it can be tested without sleeping.

use rand::Rng;
use std::time::Duration;

use crate::circuit_breaker::CircuitBreakerConfig;

/// Fraction of the computed delay used as the jitter range (±25%)
const JITTER_FRACTION: f64 = 0.25;

/// Retry and circuit breaker options for remote ledger calls
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOptions {
    /// Maximum attempts per call, including the first one
    pub max_retry_attempts: u32,
    /// Delay before the second attempt
    pub initial_retry_delay: Duration,
    /// Upper bound for any single delay
    pub max_retry_delay: Duration,
    /// Multiplier applied per attempt
    pub backoff_multiplier: f64,
    /// Perturb delays by up to ±25%
    pub use_jitter: bool,
    /// Consecutive failures before the circuit opens
    pub circuit_breaker_failure_threshold: u32,
    /// Time the circuit stays open before a trial call is allowed
    pub circuit_breaker_recovery: Duration,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retry_attempts: 5,
            initial_retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            use_jitter: true,
            circuit_breaker_failure_threshold: 5,
            circuit_breaker_recovery: Duration::from_secs(60),
        }
    }
}

impl RetryOptions {
    /// Validate the options
    pub fn validate(&self) -> Result<(), String> {
        if self.max_retry_attempts == 0 {
            return Err("max_retry_attempts must be at least 1".to_string());
        }
        if self.initial_retry_delay > self.max_retry_delay {
            return Err("initial_retry_delay cannot exceed max_retry_delay".to_string());
        }
        if !(self.backoff_multiplier > 1.0) {
            return Err("backoff_multiplier must be greater than 1.0".to_string());
        }
        if self.circuit_breaker_failure_threshold == 0 {
            return Err("circuit_breaker_failure_threshold must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Circuit breaker settings derived from these options
    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.circuit_breaker_failure_threshold,
            recovery_window: self.circuit_breaker_recovery,
        }
    }

    /// Delay before the attempt following `attempt` (1-indexed), with jitter
    /// sampled from the thread RNG when enabled.
    pub fn delay_after_attempt(&self, attempt: u32) -> Duration {
        let sample = if self.use_jitter {
            rand::thread_rng().gen_range(-1.0..=1.0)
        } else {
            0.0
        };
        backoff_delay(self, attempt, sample)
    }
}

/// Compute the backoff delay after `attempt` (1-indexed).
///
/// `jitter_sample` is a value in `[-1.0, 1.0]` scaled to ±25% of the capped
/// delay. It is ignored when jitter is disabled. A jittered delay never drops
/// below `initial_retry_delay`.
pub fn backoff_delay(options: &RetryOptions, attempt: u32, jitter_sample: f64) -> Duration {
    let initial_us = options.initial_retry_delay.as_micros() as f64;
    let max_us = options.max_retry_delay.as_micros() as f64;

    let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let exponential_us = initial_us * options.backoff_multiplier.powi(exponent);
    let capped_us = exponential_us.min(max_us);

    let delay_us = if options.use_jitter {
        let jitter_us = capped_us * JITTER_FRACTION * jitter_sample.clamp(-1.0, 1.0);
        (capped_us + jitter_us).max(initial_us)
    } else {
        capped_us
    };

    Duration::from_micros(delay_us.max(0.0).round() as u64)
}
