//! Ledger Client
//!
//! This crate provides the resilient integration layer between an identity
//! service and a remote ledger node. Every remote call goes through retry with
//! exponential backoff and a circuit breaker; audit events are buffered in a
//! bounded queue and shipped in size/interval-bounded batches by background
//! drivers, with critical events sent immediately.

pub mod account_service;
pub mod batch_driver;
pub mod circuit_breaker;
pub mod error;
pub mod event_batcher;
pub mod health;
pub mod ledger_events;
pub mod ledger_node;
pub mod resilient_caller;
pub mod retry;
pub mod retry_queue;
pub mod sync_driver;
pub mod telemetry;

pub use account_service::{
    FailedAccountCreation, FailedCreationStore, LedgerAccountService, DEFAULT_CURRENCY,
};

pub use batch_driver::{BatchDriver, BatchDriverSummary};

pub use circuit_breaker::{
    Admission, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitPhase,
    CircuitState, FailureOutcome,
};

pub use error::{LedgerError, Result};

pub use event_batcher::{BatchStatistics, BatcherOptions, EventBatcher, EventBatcherBuilder};

pub use health::{ComponentHealth, HealthChecker, HealthReport, HealthStatus};

pub use ledger_events::{event_types, BatchEventEntry, BatchReceipt, LedgerEventBatch};

pub use ledger_node::{LedgerAccounts, LedgerEventSink};

pub use resilient_caller::{
    FailureKind, LedgerHealthStatus, RemoteCallResult, ResilientCaller, CIRCUIT_OPEN_MESSAGE,
};

pub use retry::{backoff_delay, RetryOptions};

pub use retry_queue::{BufferLevel, RetryQueue};

pub use sync_driver::{run_sync_pass, SyncDriver, SyncOptions, SyncPassReport};

pub use telemetry::{LedgerMetrics, TelemetryConfig, TelemetryError, TelemetryProvider};
