//! Health Check Module
//!
//! Liveness, readiness and detailed health reporting for the ledger
//! integration layer. Component health is derived from the ledger circuit
//! and the batcher queues; readiness results are cached briefly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

use crate::event_batcher::EventBatcher;
use crate::resilient_caller::ResilientCaller;
use crate::retry_queue::BufferLevel;

/// Cache TTL for health check results (5 seconds)
const HEALTH_CACHE_TTL: Duration = Duration::from_secs(5);

/// Health status enumeration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Component is fully operational
    Healthy,
    /// Component is operational but degraded (warnings present)
    Degraded,
    /// Component is unhealthy and may not be functioning correctly
    Unhealthy,
}

impl HealthStatus {
    /// Check if the status is healthy
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    /// Check if the status is degraded or worse
    pub fn is_degraded_or_worse(&self) -> bool {
        matches!(self, HealthStatus::Degraded | HealthStatus::Unhealthy)
    }

    /// Check if the status is unhealthy
    pub fn is_unhealthy(&self) -> bool {
        matches!(self, HealthStatus::Unhealthy)
    }

    /// Combine two health statuses (returns the worse of the two)
    pub fn combine(self, other: HealthStatus) -> HealthStatus {
        match (self, other) {
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }
}

/// Component health information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    /// Component name
    pub component_name: String,
    /// Component status
    pub status: HealthStatus,
    /// Human-readable status message
    pub message: String,
    /// When the component was checked
    pub last_check: DateTime<Utc>,
    /// Additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl ComponentHealth {
    fn with_status(
        component_name: impl Into<String>,
        status: HealthStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            component_name: component_name.into(),
            status,
            message: message.into(),
            last_check: Utc::now(),
            metadata: None,
        }
    }

    /// Create a healthy component
    pub fn healthy(component_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(component_name, HealthStatus::Healthy, message)
    }

    /// Create a degraded component
    pub fn degraded(component_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(component_name, HealthStatus::Degraded, message)
    }

    /// Create an unhealthy component
    pub fn unhealthy(component_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(component_name, HealthStatus::Unhealthy, message)
    }

    /// Attach metadata
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Aggregated health report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// Worst status across components
    pub overall_status: HealthStatus,
    /// Per-component health
    pub components: Vec<ComponentHealth>,
    /// Report time
    pub timestamp: DateTime<Utc>,
    /// Service version
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl HealthReport {
    /// Create a new health report
    pub fn new(components: Vec<ComponentHealth>) -> Self {
        let overall_status = components
            .iter()
            .map(|c| c.status)
            .fold(HealthStatus::Healthy, |acc, status| acc.combine(status));

        Self {
            overall_status,
            components,
            timestamp: Utc::now(),
            version: None,
        }
    }

    /// Set version information
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Ready when no component is unhealthy
    pub fn is_ready(&self) -> bool {
        !self.components.iter().any(|c| c.status.is_unhealthy())
    }

    /// Alive unless the overall status is unhealthy
    pub fn is_alive(&self) -> bool {
        !matches!(self.overall_status, HealthStatus::Unhealthy)
    }

    /// Find a component by name
    pub fn component(&self, name: &str) -> Option<&ComponentHealth> {
        self.components.iter().find(|c| c.component_name == name)
    }
}

struct CachedHealthReport {
    report: HealthReport,
    cached_at: Instant,
}

impl CachedHealthReport {
    fn is_valid(&self) -> bool {
        self.cached_at.elapsed() < HEALTH_CACHE_TTL
    }
}

/// Health checker for the ledger integration layer
pub struct HealthChecker {
    caller: Option<Arc<ResilientCaller>>,
    batcher: Option<EventBatcher>,
    cached_report: Arc<RwLock<Option<CachedHealthReport>>>,
    version: Option<String>,
}

impl HealthChecker {
    /// Create a new health checker
    pub fn new() -> Self {
        Self {
            caller: None,
            batcher: None,
            cached_report: Arc::new(RwLock::new(None)),
            version: None,
        }
    }

    /// Report on the circuit of `caller`
    pub fn with_caller(mut self, caller: Arc<ResilientCaller>) -> Self {
        self.caller = Some(caller);
        self
    }

    /// Report on the queues of `batcher`
    pub fn with_batcher(mut self, batcher: EventBatcher) -> Self {
        self.batcher = Some(batcher);
        self
    }

    /// Set service version
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Lightweight liveness check
    pub fn check_liveness(&self) -> HealthReport {
        let report = HealthReport::new(vec![ComponentHealth::healthy(
            "service",
            "Service is running and responsive",
        )]);
        self.versioned(report)
    }

    /// Full check, cached for a few seconds
    pub async fn check_readiness(&self) -> HealthReport {
        {
            let cache = self.cached_report.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.is_valid() {
                    debug!("Returning cached readiness check");
                    return cached.report.clone();
                }
            }
        }

        let report = self.get_health_status();

        let mut cache = self.cached_report.write().await;
        *cache = Some(CachedHealthReport {
            report: report.clone(),
            cached_at: Instant::now(),
        });

        report
    }

    /// Fresh detailed health status
    pub fn get_health_status(&self) -> HealthReport {
        let mut components = Vec::new();

        if let Some(ref caller) = self.caller {
            components.push(Self::check_ledger_health(caller));
        }

        if let Some(ref batcher) = self.batcher {
            components.push(Self::check_queue_health(batcher));
            components.push(Self::check_retry_queue_health(batcher));
        }

        self.versioned(HealthReport::new(components))
    }

    /// Clear cached readiness results
    pub async fn clear_cache(&self) {
        let mut cache = self.cached_report.write().await;
        *cache = None;
    }

    fn versioned(&self, report: HealthReport) -> HealthReport {
        match self.version {
            Some(ref version) => report.with_version(version.clone()),
            None => report,
        }
    }

    fn check_ledger_health(caller: &ResilientCaller) -> ComponentHealth {
        let status = caller.health_status();
        let metadata = serde_json::json!({
            "circuit_open": status.circuit_open,
            "consecutive_failures": status.consecutive_failures,
            "last_success": status.last_success,
            "last_failure": status.last_failure,
            "last_error": status.last_error,
        });

        let component = if status.circuit_open {
            ComponentHealth::unhealthy(
                "ledger",
                format!(
                    "Ledger circuit breaker open after {} consecutive failures",
                    status.consecutive_failures
                ),
            )
        } else if !status.is_healthy {
            ComponentHealth::degraded(
                "ledger",
                format!(
                    "Ledger calls failing: {} consecutive failures",
                    status.consecutive_failures
                ),
            )
        } else {
            ComponentHealth::healthy("ledger", "Ledger connection is healthy")
        };

        component.with_metadata(metadata)
    }

    fn check_queue_health(batcher: &EventBatcher) -> ComponentHealth {
        let capacity = batcher.options().max_queue_size;
        let depth = batcher.pending_depth();
        let usage = depth as f64 / capacity as f64 * 100.0;
        let stats = batcher.statistics();

        let metadata = serde_json::json!({
            "max_queue_size": capacity,
            "current_usage": depth,
            "usage_percent": usage.round(),
            "events_queued": stats.total_events_queued,
            "events_sent": stats.total_events_sent,
            "events_rejected": stats.total_events_rejected,
            "failed_batches": stats.total_failed_batches,
        });

        let component = match BufferLevel::from_usage(depth, capacity) {
            BufferLevel::Critical | BufferLevel::Full => ComponentHealth::unhealthy(
                "event_queue",
                format!("Event queue critically full: {:.1}% ({}/{})", usage, depth, capacity),
            ),
            BufferLevel::Warning => ComponentHealth::degraded(
                "event_queue",
                format!("Event queue usage high: {:.1}% ({}/{})", usage, depth, capacity),
            ),
            BufferLevel::Normal => ComponentHealth::healthy(
                "event_queue",
                format!("Event queue healthy: {:.1}% ({}/{})", usage, depth, capacity),
            ),
        };

        component.with_metadata(metadata)
    }

    fn check_retry_queue_health(batcher: &EventBatcher) -> ComponentHealth {
        let depth = batcher.retry_queue_depth();
        if depth > 0 {
            ComponentHealth::degraded(
                "retry_queue",
                format!("{} events waiting for retry", depth),
            )
        } else {
            ComponentHealth::healthy("retry_queue", "No events waiting for retry")
        }
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{LedgerError, Result};
    use crate::event_batcher::EventBatcherBuilder;
    use crate::ledger_events::{BatchEventEntry, BatchReceipt, LedgerEventBatch};
    use crate::ledger_node::LedgerEventSink;
    use crate::retry::RetryOptions;
    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    struct FailingSink;

    #[async_trait]
    impl LedgerEventSink for FailingSink {
        async fn submit_batch(
            &self,
            _batch: &LedgerEventBatch,
            _cancel: &CancellationToken,
        ) -> Result<BatchReceipt> {
            Err(LedgerError::Remote("unavailable".into()))
        }
    }

    fn caller(threshold: u32) -> Arc<ResilientCaller> {
        Arc::new(ResilientCaller::new(RetryOptions {
            max_retry_attempts: 1,
            circuit_breaker_failure_threshold: threshold,
            ..Default::default()
        }))
    }

    #[test]
    fn test_health_status_combine() {
        assert_eq!(
            HealthStatus::Healthy.combine(HealthStatus::Healthy),
            HealthStatus::Healthy
        );
        assert_eq!(
            HealthStatus::Healthy.combine(HealthStatus::Degraded),
            HealthStatus::Degraded
        );
        assert_eq!(
            HealthStatus::Degraded.combine(HealthStatus::Unhealthy),
            HealthStatus::Unhealthy
        );
    }

    #[test]
    fn test_health_report_readiness() {
        let report = HealthReport::new(vec![
            ComponentHealth::healthy("a", "OK"),
            ComponentHealth::degraded("b", "Warning"),
        ]);
        assert!(report.is_ready());
        assert!(report.is_alive());

        let report = HealthReport::new(vec![
            ComponentHealth::healthy("a", "OK"),
            ComponentHealth::unhealthy("b", "Error"),
        ]);
        assert!(!report.is_ready());
        assert!(!report.is_alive());
    }

    #[tokio::test]
    async fn test_ledger_health_follows_circuit() {
        let caller = caller(2);
        let checker = HealthChecker::new().with_caller(caller.clone());
        assert_eq!(checker.get_health_status().overall_status, HealthStatus::Healthy);

        let cancel = CancellationToken::new();
        let fail = |_: (), _: CancellationToken| async {
            Err::<(), _>(LedgerError::Remote("down".into()))
        };

        caller.execute(&fail, (), &cancel).await;
        let report = checker.get_health_status();
        assert_eq!(
            report.component("ledger").map(|c| c.status),
            Some(HealthStatus::Degraded)
        );

        caller.execute(&fail, (), &cancel).await;
        let report = checker.get_health_status();
        assert_eq!(
            report.component("ledger").map(|c| c.status),
            Some(HealthStatus::Unhealthy)
        );
        assert!(!report.is_ready());
    }

    #[tokio::test]
    async fn test_queue_thresholds() {
        let batcher = EventBatcherBuilder::new()
            .max_queue_size(20)
            .build(Arc::new(FailingSink))
            .unwrap();
        let checker = HealthChecker::new().with_batcher(batcher.clone());

        for _ in 0..15 {
            batcher.queue_event(BatchEventEntry::new("IdentityCreated", "t", "E", "1"));
        }
        let report = checker.get_health_status();
        assert_eq!(
            report.component("event_queue").map(|c| c.status),
            Some(HealthStatus::Healthy)
        );

        for _ in 0..2 {
            batcher.queue_event(BatchEventEntry::new("IdentityCreated", "t", "E", "1"));
        }
        let report = checker.get_health_status();
        assert_eq!(
            report.component("event_queue").map(|c| c.status),
            Some(HealthStatus::Degraded)
        );

        for _ in 0..3 {
            batcher.queue_event(BatchEventEntry::new("IdentityCreated", "t", "E", "1"));
        }
        let report = checker.get_health_status();
        assert_eq!(
            report.component("event_queue").map(|c| c.status),
            Some(HealthStatus::Unhealthy)
        );
    }

    #[tokio::test]
    async fn test_retry_queue_degrades() {
        let batcher = EventBatcherBuilder::new()
            .retry_options(RetryOptions {
                max_retry_attempts: 1,
                circuit_breaker_failure_threshold: 100,
                ..Default::default()
            })
            .build(Arc::new(FailingSink))
            .unwrap();
        let checker = HealthChecker::new().with_batcher(batcher.clone());

        batcher.queue_event(BatchEventEntry::new("IdentityCreated", "t", "E", "1"));
        assert_eq!(batcher.flush(&CancellationToken::new()).await, 0);

        let report = checker.get_health_status();
        assert_eq!(
            report.component("retry_queue").map(|c| c.status),
            Some(HealthStatus::Degraded)
        );
        assert!(report.is_ready());
    }

    #[tokio::test]
    async fn test_readiness_is_cached() {
        let caller = caller(1);
        let checker = HealthChecker::new()
            .with_caller(caller.clone())
            .with_version("1.0.0");

        let first = checker.check_readiness().await;
        assert!(first.is_ready());
        assert_eq!(first.version.as_deref(), Some("1.0.0"));

        caller
            .execute(
                |_: (), _: CancellationToken| async {
                    Err::<(), _>(LedgerError::Remote("down".into()))
                },
                (),
                &CancellationToken::new(),
            )
            .await;

        assert!(checker.check_readiness().await.is_ready());
        checker.clear_cache().await;
        assert!(!checker.check_readiness().await.is_ready());
    }

    #[test]
    fn test_liveness() {
        let report = HealthChecker::new().check_liveness();
        assert!(report.is_alive());
        assert!(!report.components.is_empty());
    }

    #[test]
    fn test_health_report_serialization() {
        let report = HealthReport::new(vec![ComponentHealth::degraded("retry_queue", "3 waiting")]);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["overall_status"], "degraded");
        assert!(json.get("version").is_none());
    }
}
