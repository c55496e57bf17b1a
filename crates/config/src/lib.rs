//! Configuration management for the ledger integration layer

use figment::{Figment, providers::{Format, Yaml, Env}};
use ledger_client::{BatcherOptions, RetryOptions, SyncOptions, TelemetryConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Main ledger integration configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerIntegrationConfig {
    /// Retry and circuit breaker settings
    pub resilience: ResilienceConfig,

    /// Event batching settings
    pub batching: BatchingConfig,

    /// Failed-creation sync settings
    pub sync: SyncConfig,

    /// Observability settings
    pub observability: ObservabilityConfig,
}

impl LedgerIntegrationConfig {
    /// Load configuration from file and environment
    pub fn load(config_path: Option<PathBuf>) -> Result<Self> {
        let mut figment = Figment::new();

        // Load from file if provided
        if let Some(path) = config_path {
            figment = figment.merge(Yaml::file(path));
        }

        // Override with environment variables (prefixed with LEDGER_)
        figment = figment.merge(Env::prefixed("LEDGER_").split("__"));

        figment.extract().map_err(|e| ConfigError::LoadError(e.to_string()))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.retry_options()
            .validate()
            .map_err(|e| ConfigError::ValidationError(format!("resilience: {}", e)))?;

        self.batcher_options()
            .validate()
            .map_err(|e| ConfigError::ValidationError(format!("batching: {}", e)))?;

        self.sync_options()
            .validate()
            .map_err(|e| ConfigError::ValidationError(format!("sync: {}", e)))?;

        if self.observability.log_level.trim().is_empty() {
            return Err(ConfigError::ValidationError("Log level required".to_string()));
        }

        Ok(())
    }

    /// Options for the resilient caller
    pub fn retry_options(&self) -> RetryOptions {
        let r = &self.resilience;
        RetryOptions {
            max_retry_attempts: r.max_retry_attempts,
            initial_retry_delay: Duration::from_millis(r.initial_retry_delay_ms),
            max_retry_delay: Duration::from_millis(r.max_retry_delay_ms),
            backoff_multiplier: r.backoff_multiplier,
            use_jitter: r.use_jitter,
            circuit_breaker_failure_threshold: r.circuit_breaker_failure_threshold,
            circuit_breaker_recovery: Duration::from_secs(r.circuit_breaker_recovery_secs),
        }
    }

    /// Options for the event batcher
    pub fn batcher_options(&self) -> BatcherOptions {
        let b = &self.batching;
        BatcherOptions {
            batch_size: b.batch_size,
            batch_interval: Duration::from_millis(b.batch_interval_ms),
            max_concurrent_batches: b.max_concurrent_batches,
            max_queue_size: b.max_queue_size,
            critical_event_types: b.critical_event_types.iter().cloned().collect(),
            retry_failed_batches: b.retry_failed_batches,
            max_retry_queue_size: b.max_retry_queue_size,
            max_event_retries: b.max_event_retries,
            semaphore_timeout: Duration::from_secs(b.semaphore_timeout_secs),
        }
    }

    /// Options for the sync driver
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            sync_interval: Duration::from_secs(self.sync.sync_interval_secs),
            max_failed_creation_age_hours: self.sync.max_failed_creation_age_hours,
            max_records_per_pass: self.sync.max_records_per_pass,
        }
    }

    /// Telemetry provider configuration
    pub fn telemetry_config(&self) -> TelemetryConfig {
        TelemetryConfig {
            service_name: self.observability.service_name.clone(),
            ..TelemetryConfig::default()
        }
    }
}

/// Retry and circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Maximum attempts per call, including the first
    pub max_retry_attempts: u32,

    /// Delay before the second attempt in milliseconds
    pub initial_retry_delay_ms: u64,

    /// Upper bound for any delay in milliseconds
    pub max_retry_delay_ms: u64,

    /// Backoff multiplier
    pub backoff_multiplier: f64,

    /// Randomize delays by up to 25%
    pub use_jitter: bool,

    /// Consecutive failures before the circuit opens
    pub circuit_breaker_failure_threshold: u32,

    /// Seconds the circuit stays open
    pub circuit_breaker_recovery_secs: u64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_retry_attempts: 5,
            initial_retry_delay_ms: 1_000,
            max_retry_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            use_jitter: true,
            circuit_breaker_failure_threshold: 5,
            circuit_breaker_recovery_secs: 60,
        }
    }
}

/// Event batching configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchingConfig {
    /// Maximum events per batch
    pub batch_size: usize,

    /// Maximum batch accumulation time in milliseconds
    pub batch_interval_ms: u64,

    /// Batches sent concurrently
    pub max_concurrent_batches: usize,

    /// Capacity of the event queue
    pub max_queue_size: usize,

    /// Event types sent immediately
    pub critical_event_types: Vec<String>,

    /// Re-queue events of failed batches
    pub retry_failed_batches: bool,

    /// Capacity of the retry queue (defaults to `max_queue_size`)
    pub max_retry_queue_size: Option<usize>,

    /// Times an event may be re-queued
    pub max_event_retries: u32,

    /// Maximum wait for a send slot in seconds
    pub semaphore_timeout_secs: u64,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        let defaults = BatcherOptions::default();
        let mut critical_event_types: Vec<String> =
            defaults.critical_event_types.into_iter().collect();
        critical_event_types.sort();

        Self {
            batch_size: defaults.batch_size,
            batch_interval_ms: defaults.batch_interval.as_millis() as u64,
            max_concurrent_batches: defaults.max_concurrent_batches,
            max_queue_size: defaults.max_queue_size,
            critical_event_types,
            retry_failed_batches: defaults.retry_failed_batches,
            max_retry_queue_size: defaults.max_retry_queue_size,
            max_event_retries: defaults.max_event_retries,
            semaphore_timeout_secs: defaults.semaphore_timeout.as_secs(),
        }
    }
}

/// Failed-creation sync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Run the background sync driver
    pub enabled: bool,

    /// Seconds between sync passes
    pub sync_interval_secs: u64,

    /// Failures older than this are not retried
    pub max_failed_creation_age_hours: u32,

    /// Records fetched per pass
    pub max_records_per_pass: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sync_interval_secs: 300, // 5 minutes
            max_failed_creation_age_hours: 24,
            max_records_per_pass: 100,
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level
    pub log_level: String,

    /// Service name reported with metrics
    pub service_name: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            service_name: "ledger-integration".to_string(),
        }
    }
}
