//! Resilient Remote Calls
//!
//! [`ResilientCaller`] wraps a single idempotent remote operation with
//! exponential backoff retry and a consecutive-failure circuit breaker.
//! Every failure mode is reported in the returned [`RemoteCallResult`];
//! nothing is propagated as an error.

use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::circuit_breaker::{
    Admission, CircuitBreaker, CircuitBreakerStats, FailureOutcome,
};
use crate::error::{LedgerError, Result};
use crate::retry::RetryOptions;
use crate::telemetry::{status, LedgerMetrics};

/// Error message reported when the circuit rejects a call
pub const CIRCUIT_OPEN_MESSAGE: &str = "circuit breaker open";

/// Operation label used by [`ResilientCaller::execute`]
const DEFAULT_OPERATION: &str = "remote_call";

/// Why a call failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Rejected by the open circuit; the operation was never invoked
    CircuitOpen,
    /// Attempts failed until retries ran out or the circuit opened
    Failed,
    /// Cancelled by the caller's token
    Cancelled,
}

/// Outcome of a resilient call
#[derive(Debug, Clone)]
pub struct RemoteCallResult<T> {
    /// Whether the call succeeded
    pub success: bool,
    /// Payload on success
    pub value: Option<T>,
    /// Error message of the last failed attempt
    pub error: Option<String>,
    /// Attempts consumed (0 when rejected by the circuit)
    pub attempts: u32,
    /// Wall time including retry sleeps
    pub elapsed: Duration,
    /// Failure classification, `None` on success
    pub failure_kind: Option<FailureKind>,
}

impl<T> RemoteCallResult<T> {
    fn succeeded(value: T, attempts: u32, elapsed: Duration) -> Self {
        Self {
            success: true,
            value: Some(value),
            error: None,
            attempts,
            elapsed,
            failure_kind: None,
        }
    }

    fn failed(
        error: impl Into<String>,
        attempts: u32,
        elapsed: Duration,
        kind: FailureKind,
    ) -> Self {
        Self {
            success: false,
            value: None,
            error: Some(error.into()),
            attempts,
            elapsed,
            failure_kind: Some(kind),
        }
    }

    /// The call was rejected without contacting the node
    pub fn is_circuit_open(&self) -> bool {
        self.failure_kind == Some(FailureKind::CircuitOpen)
    }

    /// Convert into a plain result
    pub fn into_result(self) -> Result<T> {
        match (self.value, self.failure_kind) {
            (Some(value), _) => Ok(value),
            (None, Some(FailureKind::CircuitOpen)) => Err(LedgerError::CircuitOpen),
            (None, Some(FailureKind::Cancelled)) => Err(LedgerError::Cancelled),
            (None, _) => Err(LedgerError::Remote(
                self.error.unwrap_or_else(|| "unknown error".to_string()),
            )),
        }
    }
}

/// Read-only health view of the ledger connection
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerHealthStatus {
    /// Circuit closed and failures below half the threshold
    pub is_healthy: bool,
    /// Calls are currently rejected
    pub circuit_open: bool,
    /// Failures since the last success
    pub consecutive_failures: u32,
    /// Last successful call
    pub last_success: Option<DateTime<Utc>>,
    /// Last failed call
    pub last_failure: Option<DateTime<Utc>>,
    /// Error message of the last failed call
    pub last_error: Option<String>,
}

/// Retry-with-backoff and circuit breaker around remote ledger calls
pub struct ResilientCaller {
    options: RetryOptions,
    circuit: CircuitBreaker,
    metrics: Option<Arc<LedgerMetrics>>,
}

impl ResilientCaller {
    /// Create a new caller
    pub fn new(options: RetryOptions) -> Self {
        info!(
            "Resilient ledger caller initialized: max_attempts={}, initial_delay={:?}, max_delay={:?}, circuit_threshold={}",
            options.max_retry_attempts,
            options.initial_retry_delay,
            options.max_retry_delay,
            options.circuit_breaker_failure_threshold
        );

        let circuit = CircuitBreaker::with_config(options.circuit_breaker_config());
        Self {
            options,
            circuit,
            metrics: None,
        }
    }

    /// Attach metrics
    pub fn with_metrics(mut self, metrics: Arc<LedgerMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Options in use
    pub fn options(&self) -> &RetryOptions {
        &self.options
    }

    /// Run `operation` with retries under the circuit breaker
    pub async fn execute<I, T, F, Fut>(
        &self,
        operation: F,
        input: I,
        cancel: &CancellationToken,
    ) -> RemoteCallResult<T>
    where
        I: Clone,
        F: Fn(I, CancellationToken) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_named(DEFAULT_OPERATION, operation, input, cancel)
            .await
    }

    /// Same as [`execute`](Self::execute), labelling logs and metrics with `name`
    pub async fn execute_named<I, T, F, Fut>(
        &self,
        name: &str,
        operation: F,
        input: I,
        cancel: &CancellationToken,
    ) -> RemoteCallResult<T>
    where
        I: Clone,
        F: Fn(I, CancellationToken) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let started = Instant::now();

        if cancel.is_cancelled() {
            return RemoteCallResult::failed(
                LedgerError::Cancelled.to_string(),
                0,
                started.elapsed(),
                FailureKind::Cancelled,
            );
        }

        let admission = self.circuit.try_acquire();
        if admission == Admission::Rejected {
            warn!("Circuit breaker open, skipping {}", name);
            self.record_outcome(name, status::CIRCUIT_OPEN, started);
            return RemoteCallResult::failed(
                CIRCUIT_OPEN_MESSAGE,
                0,
                started.elapsed(),
                FailureKind::CircuitOpen,
            );
        }

        // A half-open trial decides the circuit in a single attempt
        let max_attempts = match admission {
            Admission::Trial => 1,
            _ => self.options.max_retry_attempts.max(1),
        };

        let mut attempts = 0;
        let mut last_error = String::new();

        loop {
            attempts += 1;
            debug!("Attempting {}, attempt {}/{}", name, attempts, max_attempts);

            match operation(input.clone(), cancel.clone()).await {
                Ok(value) => {
                    self.circuit.record_success();
                    self.record_outcome(name, status::SUCCESS, started);
                    debug!("{} succeeded on attempt {}", name, attempts);
                    return RemoteCallResult::succeeded(value, attempts, started.elapsed());
                }
                Err(LedgerError::Cancelled) if cancel.is_cancelled() => {
                    debug!("{} cancelled during attempt {}", name, attempts);
                    self.record_outcome(name, status::CANCELLED, started);
                    let message = if last_error.is_empty() {
                        LedgerError::Cancelled.to_string()
                    } else {
                        last_error
                    };
                    return RemoteCallResult::failed(
                        message,
                        attempts - 1,
                        started.elapsed(),
                        FailureKind::Cancelled,
                    );
                }
                Err(e) => {
                    last_error = e.to_string();
                    warn!(
                        "{} failed, attempt {}/{}: {}",
                        name, attempts, max_attempts, last_error
                    );

                    match self.circuit.record_failure(&last_error) {
                        FailureOutcome::Counted => {}
                        FailureOutcome::Opened => {
                            if let Some(ref m) = self.metrics {
                                m.record_circuit_opened();
                            }
                            warn!("Circuit breaker opened during retries of {}, aborting", name);
                            break;
                        }
                        FailureOutcome::AlreadyOpen => {
                            warn!("Circuit breaker open during retries of {}, aborting", name);
                            break;
                        }
                    }

                    if attempts >= max_attempts {
                        break;
                    }

                    if cancel.is_cancelled() {
                        return self.cancelled(name, last_error, attempts, started);
                    }

                    let delay = self.options.delay_after_attempt(attempts);
                    if let Some(ref m) = self.metrics {
                        m.record_retry(name);
                    }
                    debug!("Waiting {:?} before retrying {}", delay, name);

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => {
                            return self.cancelled(name, last_error, attempts, started);
                        }
                    }
                }
            }
        }

        self.record_outcome(name, status::FAILED, started);
        error!(
            "{} failed after {} attempts. Last error: {}",
            name, attempts, last_error
        );

        RemoteCallResult::failed(last_error, attempts, started.elapsed(), FailureKind::Failed)
    }

    fn cancelled<T>(
        &self,
        name: &str,
        last_error: String,
        attempts: u32,
        started: Instant,
    ) -> RemoteCallResult<T> {
        info!("{} cancelled after {} attempts", name, attempts);
        self.record_outcome(name, status::CANCELLED, started);
        RemoteCallResult::failed(last_error, attempts, started.elapsed(), FailureKind::Cancelled)
    }

    fn record_outcome(&self, name: &str, outcome: &str, started: Instant) {
        if let Some(ref m) = self.metrics {
            m.record_remote_call(name, outcome, started.elapsed().as_secs_f64() * 1000.0);
        }
    }

    /// Whether calls are currently rejected
    pub fn is_circuit_open(&self) -> bool {
        self.circuit.is_open()
    }

    /// Health view of the circuit. Pure read.
    pub fn health_status(&self) -> LedgerHealthStatus {
        let circuit_open = self.circuit.is_open();
        let state = self.circuit.snapshot();

        LedgerHealthStatus {
            is_healthy: !circuit_open
                && state.consecutive_failures < self.options.circuit_breaker_failure_threshold / 2,
            circuit_open,
            consecutive_failures: state.consecutive_failures,
            last_success: state.last_success,
            last_failure: state.last_failure,
            last_error: state.last_error,
        }
    }

    /// Circuit breaker counters
    pub fn circuit_stats(&self) -> CircuitBreakerStats {
        self.circuit.stats()
    }
}
