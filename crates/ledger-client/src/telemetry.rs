//! OpenTelemetry Integration
//!
//! This module provides OpenTelemetry metrics for remote ledger calls and
//! event batching.

use opentelemetry::metrics::{Counter, Histogram, Meter, MeterProvider as _, UpDownCounter};
use opentelemetry::KeyValue;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::Resource;
use std::sync::Arc;
use thiserror::Error;

/// Telemetry error types
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Telemetry initialization error: {0}")]
    InitializationError(String),

    #[error("Metrics export error: {0}")]
    ExportError(String),

    #[error(transparent)]
    OpenTelemetryError(#[from] opentelemetry::metrics::MetricsError),
}

pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Status label values shared by call and batch instruments
pub mod status {
    pub const SUCCESS: &str = "success";
    pub const FAILED: &str = "failed";
    pub const CIRCUIT_OPEN: &str = "circuit_open";
    pub const CANCELLED: &str = "cancelled";
}

/// Ledger integration metrics
pub struct LedgerMetrics {
    /// Meter for creating instruments
    meter: Meter,
    /// Remote call outcomes by operation and status
    remote_calls: Counter<u64>,
    /// Retry attempts beyond the first
    remote_call_retries: Counter<u64>,
    /// Circuit breaker openings
    circuit_opened: Counter<u64>,
    /// Remote call duration including retries
    remote_call_duration: Histogram<f64>,
    /// Events admitted to the batch queue by type
    events_queued: Counter<u64>,
    /// Events leaving the batcher by status
    events_sent: Counter<u64>,
    /// Events rejected at admission
    events_rejected: Counter<u64>,
    /// Batches by status
    batches: Counter<u64>,
    /// Entries per batch
    batch_size: Histogram<u64>,
    /// Batch send latency
    batch_latency: Histogram<f64>,
    /// Running background drivers
    active_drivers: UpDownCounter<i64>,
}

impl LedgerMetrics {
    /// Create new ledger metrics
    pub fn new(meter: Meter) -> Result<Self> {
        let remote_calls = meter
            .u64_counter("ledger_remote_calls_total")
            .with_description("Total number of resilient remote ledger calls")
            .with_unit("calls")
            .init();

        let remote_call_retries = meter
            .u64_counter("ledger_remote_call_retries_total")
            .with_description("Total number of retry attempts against the ledger node")
            .with_unit("attempts")
            .init();

        let circuit_opened = meter
            .u64_counter("ledger_circuit_opened_total")
            .with_description("Number of times the ledger circuit breaker opened")
            .init();

        let remote_call_duration = meter
            .f64_histogram("ledger_remote_call_duration_ms")
            .with_description("Time taken by a resilient call including retries")
            .with_unit("ms")
            .init();

        let events_queued = meter
            .u64_counter("ledger_events_queued_total")
            .with_description("Total number of events admitted to the batch queue")
            .with_unit("events")
            .init();

        let events_sent = meter
            .u64_counter("ledger_events_sent_total")
            .with_description("Total number of events leaving the batcher")
            .with_unit("events")
            .init();

        let events_rejected = meter
            .u64_counter("ledger_events_rejected_total")
            .with_description("Total number of events rejected because the queue was full")
            .with_unit("events")
            .init();

        let batches = meter
            .u64_counter("ledger_batches_total")
            .with_description("Total number of batches sent to the ledger node")
            .with_unit("batches")
            .init();

        let batch_size = meter
            .u64_histogram("ledger_batch_size")
            .with_description("Number of events in each batch")
            .with_unit("events")
            .init();

        let batch_latency = meter
            .f64_histogram("ledger_batch_latency_ms")
            .with_description("Time taken to send a batch to the ledger node")
            .with_unit("ms")
            .init();

        let active_drivers = meter
            .i64_up_down_counter("ledger_active_background_drivers")
            .with_description("Number of running background drivers")
            .init();

        Ok(Self {
            meter,
            remote_calls,
            remote_call_retries,
            circuit_opened,
            remote_call_duration,
            events_queued,
            events_sent,
            events_rejected,
            batches,
            batch_size,
            batch_latency,
            active_drivers,
        })
    }

    /// Meter the instruments were created from
    pub fn meter(&self) -> &Meter {
        &self.meter
    }

    /// Record the outcome of a resilient call
    pub fn record_remote_call(&self, operation: &str, status: &str, duration_ms: f64) {
        let attributes = [
            KeyValue::new("operation", operation.to_string()),
            KeyValue::new("status", status.to_string()),
        ];
        self.remote_calls.add(1, &attributes);
        self.remote_call_duration.record(duration_ms, &attributes);
    }

    /// Record a retry attempt
    pub fn record_retry(&self, operation: &str) {
        self.remote_call_retries
            .add(1, &[KeyValue::new("operation", operation.to_string())]);
    }

    /// Record the circuit opening
    pub fn record_circuit_opened(&self) {
        self.circuit_opened.add(1, &[]);
    }

    /// Record an event admitted to the queue
    pub fn record_event_queued(&self, event_type: &str) {
        self.events_queued
            .add(1, &[KeyValue::new("event_type", event_type.to_string())]);
    }

    /// Record events leaving the batcher
    pub fn record_events_sent(&self, count: u64, status: &str) {
        self.events_sent
            .add(count, &[KeyValue::new("status", status.to_string())]);
    }

    /// Record an event rejected at admission
    pub fn record_event_rejected(&self, event_type: &str) {
        self.events_rejected
            .add(1, &[KeyValue::new("event_type", event_type.to_string())]);
    }

    /// Record a batch outcome
    pub fn record_batch(&self, size: u64, latency_ms: f64, status: &str) {
        let attributes = [KeyValue::new("status", status.to_string())];
        self.batches.add(1, &attributes);
        self.batch_size.record(size, &attributes);
        self.batch_latency.record(latency_ms, &attributes);
    }

    /// Increment active drivers
    pub fn increment_active_drivers(&self) {
        self.active_drivers.add(1, &[]);
    }

    /// Decrement active drivers
    pub fn decrement_active_drivers(&self) {
        self.active_drivers.add(-1, &[]);
    }
}

/// Telemetry provider configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name
    pub service_name: String,
    /// Service version
    pub service_version: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "ledger-integration".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Telemetry provider
pub struct TelemetryProvider {
    /// Meter provider
    meter_provider: SdkMeterProvider,
    /// Ledger metrics
    metrics: Arc<LedgerMetrics>,
}

impl TelemetryProvider {
    /// Initialize telemetry provider
    pub fn init(config: TelemetryConfig) -> Result<Self> {
        let resource = Resource::new(vec![
            KeyValue::new("service.name", config.service_name.clone()),
            KeyValue::new("service.version", config.service_version.clone()),
        ]);

        // Metrics are collected in-process; exporting is left to the host's
        // reader configuration.
        let meter_provider = SdkMeterProvider::builder()
            .with_resource(resource)
            .build();

        let meter = meter_provider.meter("ledger_client");
        let metrics = Arc::new(LedgerMetrics::new(meter)?);

        Ok(Self {
            meter_provider,
            metrics,
        })
    }

    /// Get ledger metrics
    pub fn metrics(&self) -> Arc<LedgerMetrics> {
        self.metrics.clone()
    }

    /// Shutdown telemetry
    pub fn shutdown(self) -> Result<()> {
        self.meter_provider
            .shutdown()
            .map_err(|e| TelemetryError::ExportError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telemetry_config_default() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "ledger-integration");
        assert!(!config.service_version.is_empty());
    }

    #[test]
    fn test_telemetry_provider_init() {
        let provider = TelemetryProvider::init(TelemetryConfig::default()).unwrap();
        let metrics = provider.metrics();
        assert!(Arc::strong_count(&metrics) >= 2);
        provider.shutdown().unwrap();
    }

    #[test]
    fn test_record_call_metrics() {
        let provider = TelemetryProvider::init(TelemetryConfig::default()).unwrap();
        let metrics = provider.metrics();

        metrics.record_remote_call("create_account", status::SUCCESS, 12.5);
        metrics.record_remote_call("create_account", status::CIRCUIT_OPEN, 0.0);
        metrics.record_retry("create_account");
        metrics.record_circuit_opened();

        provider.shutdown().unwrap();
    }

    #[test]
    fn test_record_batch_metrics() {
        let provider = TelemetryProvider::init(TelemetryConfig::default()).unwrap();
        let metrics = provider.metrics();

        metrics.record_event_queued("IdentityCreated");
        metrics.record_event_rejected("IdentityCreated");
        metrics.record_events_sent(10, status::SUCCESS);
        metrics.record_batch(10, 42.0, status::SUCCESS);
        metrics.record_batch(3, 5.0, status::FAILED);
        metrics.increment_active_drivers();
        metrics.decrement_active_drivers();

        provider.shutdown().unwrap();
    }
}
