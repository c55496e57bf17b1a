//! Circuit Breaker Pattern
//!
//! Consecutive-failure circuit breaker guarding calls to the ledger node.
//! The open and half-open phases are derived from the time the circuit was
//! opened rather than stored, so the breaker recovers without any timer task.
//!
//! ```text
//! Closed   → Open      consecutive failures reach the threshold
//! Open     → HalfOpen  recovery window elapsed since opened_at (derived)
//! HalfOpen → Closed    trial call succeeds
//! HalfOpen → Open      trial call fails (fresh opened_at)
//! ```

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening circuit
    pub failure_threshold: u32,
    /// Duration to stay open before a trial call is allowed
    pub recovery_window: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_window: Duration::from_secs(60),
        }
    }
}

/// Circuit breaker phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitPhase {
    /// Calls flow normally
    Closed,
    /// Calls fail fast
    Open,
    /// Recovery window elapsed, one trial call may pass
    HalfOpen,
}

impl CircuitPhase {
    /// Check if circuit is open
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitPhase::Open)
    }

    /// Check if circuit is closed
    pub fn is_closed(&self) -> bool {
        matches!(self, CircuitPhase::Closed)
    }

    /// Check if circuit is half-open
    pub fn is_half_open(&self) -> bool {
        matches!(self, CircuitPhase::HalfOpen)
    }

    /// Get phase name for metrics
    pub fn state_name(&self) -> &'static str {
        match self {
            CircuitPhase::Closed => "closed",
            CircuitPhase::Open => "open",
            CircuitPhase::HalfOpen => "half_open",
        }
    }
}

/// Mutable circuit state, guarded by the breaker's mutex
#[derive(Debug, Clone, Default)]
pub struct CircuitState {
    /// Failures since the last success
    pub consecutive_failures: u32,
    /// When the circuit last opened, `None` while closed
    pub opened_at: Option<Instant>,
    /// Last successful call
    pub last_success: Option<DateTime<Utc>>,
    /// Last failed call
    pub last_failure: Option<DateTime<Utc>>,
    /// Error message of the last failed call
    pub last_error: Option<String>,
    /// Start of the half-open trial currently in flight
    trial_started_at: Option<Instant>,
}

impl CircuitState {
    /// Phase at `now`
    pub fn phase(&self, now: Instant, config: &CircuitBreakerConfig) -> CircuitPhase {
        match self.opened_at {
            None => CircuitPhase::Closed,
            Some(opened_at) if now.duration_since(opened_at) >= config.recovery_window => {
                CircuitPhase::HalfOpen
            }
            Some(_) => CircuitPhase::Open,
        }
    }

    /// A trial is in flight and has not gone stale. A trial whose caller
    /// vanished without reporting is abandoned after one recovery window.
    fn trial_in_flight(&self, now: Instant, config: &CircuitBreakerConfig) -> bool {
        self.trial_started_at
            .map(|started| now.duration_since(started) < config.recovery_window)
            .unwrap_or(false)
    }
}

/// Outcome of asking the breaker for permission to call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Circuit closed, call normally
    Allowed,
    /// Circuit half-open, this call is the single trial
    Trial,
    /// Circuit open, do not call
    Rejected,
}

/// What recording a failure did to the circuit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Still closed, below the threshold
    Counted,
    /// This failure opened (or reopened) the circuit
    Opened,
    /// The circuit was already open
    AlreadyOpen,
}

impl FailureOutcome {
    /// Circuit is open after the failure
    pub fn is_open(&self) -> bool {
        !matches!(self, FailureOutcome::Counted)
    }
}

/// Circuit breaker statistics
#[derive(Debug, Clone, Default)]
pub struct CircuitBreakerStats {
    /// Total successful calls
    pub total_success: u64,
    /// Total failed calls
    pub total_failures: u64,
    /// Total rejected calls (circuit open)
    pub total_rejected: u64,
    /// Current consecutive failures
    pub consecutive_failures: u32,
    /// Number of times circuit has opened
    pub open_count: u64,
    /// Number of times circuit has closed after being open
    pub close_count: u64,
    /// Current phase
    pub current_state: String,
}

/// Circuit breaker for fault tolerance
pub struct CircuitBreaker {
    /// Configuration
    config: CircuitBreakerConfig,
    /// Failure counter and timestamps. Never held across an await.
    state: Mutex<CircuitState>,
    /// Total successful calls
    total_success: AtomicU64,
    /// Total failed calls
    total_failures: AtomicU64,
    /// Total rejected calls (circuit open)
    total_rejected: AtomicU64,
    /// Number of times circuit has opened
    open_count: AtomicU64,
    /// Number of times circuit has closed
    close_count: AtomicU64,
}

impl CircuitBreaker {
    /// Create new circuit breaker with default config
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
    }

    /// Create new circuit breaker with custom config
    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        info!(
            "Creating circuit breaker: failure_threshold={}, recovery_window={:?}",
            config.failure_threshold, config.recovery_window
        );

        Self {
            config,
            state: Mutex::new(CircuitState::default()),
            total_success: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            total_rejected: AtomicU64::new(0),
            open_count: AtomicU64::new(0),
            close_count: AtomicU64::new(0),
        }
    }

    /// Configuration
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Ask for permission to make a call
    pub fn try_acquire(&self) -> Admission {
        let now = Instant::now();
        let mut state = self.state.lock();

        match state.phase(now, &self.config) {
            CircuitPhase::Closed => Admission::Allowed,
            CircuitPhase::Open => {
                self.total_rejected.fetch_add(1, Ordering::Relaxed);
                Admission::Rejected
            }
            CircuitPhase::HalfOpen => {
                if state.trial_in_flight(now, &self.config) {
                    self.total_rejected.fetch_add(1, Ordering::Relaxed);
                    Admission::Rejected
                } else {
                    info!("Circuit breaker half-open, admitting trial call");
                    state.trial_started_at = Some(now);
                    Admission::Trial
                }
            }
        }
    }

    /// Check whether calls are currently being rejected. Pure read.
    pub fn is_open(&self) -> bool {
        let now = Instant::now();
        let state = self.state.lock();
        match state.phase(now, &self.config) {
            CircuitPhase::Closed => false,
            CircuitPhase::Open => true,
            CircuitPhase::HalfOpen => state.trial_in_flight(now, &self.config),
        }
    }

    /// Current phase. Pure read.
    pub fn phase(&self) -> CircuitPhase {
        self.state.lock().phase(Instant::now(), &self.config)
    }

    /// Record successful call, closing the circuit
    pub fn record_success(&self) {
        self.total_success.fetch_add(1, Ordering::Relaxed);

        let mut state = self.state.lock();
        if state.opened_at.is_some() {
            info!(
                "Circuit breaker closing after successful trial, {} prior consecutive failures",
                state.consecutive_failures
            );
            self.close_count.fetch_add(1, Ordering::Relaxed);
        }

        state.consecutive_failures = 0;
        state.opened_at = None;
        state.trial_started_at = None;
        state.last_success = Some(Utc::now());
    }

    /// Record failed call
    pub fn record_failure(&self, error: &str) -> FailureOutcome {
        self.total_failures.fetch_add(1, Ordering::Relaxed);

        let now = Instant::now();
        let mut state = self.state.lock();
        let phase = state.phase(now, &self.config);

        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        state.last_failure = Some(Utc::now());
        state.last_error = Some(error.to_string());
        state.trial_started_at = None;

        match phase {
            CircuitPhase::Closed => {
                debug!(
                    "Call failed in closed state: {}/{}",
                    state.consecutive_failures, self.config.failure_threshold
                );
                if state.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        "Circuit breaker opening: {} consecutive failures reached threshold {}, recovery in {:?}",
                        state.consecutive_failures,
                        self.config.failure_threshold,
                        self.config.recovery_window
                    );
                    state.opened_at = Some(now);
                    self.open_count.fetch_add(1, Ordering::Relaxed);
                    return FailureOutcome::Opened;
                }
                FailureOutcome::Counted
            }
            CircuitPhase::HalfOpen => {
                warn!("Circuit breaker reopening: trial call failed");
                state.opened_at = Some(now);
                self.open_count.fetch_add(1, Ordering::Relaxed);
                FailureOutcome::Opened
            }
            CircuitPhase::Open => {
                debug!("Additional failure recorded in open state");
                FailureOutcome::AlreadyOpen
            }
        }
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> CircuitState {
        self.state.lock().clone()
    }

    /// Get statistics
    pub fn stats(&self) -> CircuitBreakerStats {
        let (consecutive_failures, phase) = {
            let state = self.state.lock();
            (
                state.consecutive_failures,
                state.phase(Instant::now(), &self.config),
            )
        };

        CircuitBreakerStats {
            total_success: self.total_success.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            total_rejected: self.total_rejected.load(Ordering::Relaxed),
            consecutive_failures,
            open_count: self.open_count.load(Ordering::Relaxed),
            close_count: self.close_count.load(Ordering::Relaxed),
            current_state: phase.state_name().to_string(),
        }
    }

    /// Reset circuit breaker to closed state
    pub fn reset(&self) {
        info!("Circuit breaker manually reset");
        let mut state = self.state.lock();
        state.consecutive_failures = 0;
        state.opened_at = None;
        state.trial_started_at = None;
    }

    /// Force circuit to open (for manual intervention)
    pub fn force_open(&self) {
        warn!("Circuit breaker manually forced open");
        let mut state = self.state.lock();
        state.opened_at = Some(Instant::now());
        state.trial_started_at = None;
        self.open_count.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}
