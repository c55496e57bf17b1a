//! Ledger Sync Demo
//!
//! Runs the integration layer against a simulated, occasionally failing
//! ledger node:
//! - configuration loaded from an optional YAML file plus `LEDGER_*` variables
//! - background batch and sync drivers
//! - a critical event sent immediately
//! - graceful shutdown with a final flush and a health report
//!
//! ```text
//! cargo run -p ledger-client --example ledger_sync_demo -- [config.yaml]
//! ```

use async_trait::async_trait;
use chrono::Utc;
use ledger_client::{
    event_types, BatchDriver, BatchEventEntry, BatchReceipt, EventBatcherBuilder,
    FailedAccountCreation, FailedCreationStore, HealthChecker, LedgerAccountService,
    LedgerAccounts, LedgerError, LedgerEventBatch, LedgerEventSink, ResilientCaller, Result,
    SyncDriver, TelemetryProvider,
};
use ledger_config::LedgerIntegrationConfig;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Simulated node that fails every third request
#[derive(Default)]
struct FlakyNode {
    requests: AtomicU64,
}

impl FlakyNode {
    fn next_request_fails(&self) -> bool {
        self.requests.fetch_add(1, Ordering::Relaxed) % 3 == 2
    }
}

#[async_trait]
impl LedgerEventSink for FlakyNode {
    async fn submit_batch(
        &self,
        batch: &LedgerEventBatch,
        _cancel: &CancellationToken,
    ) -> Result<BatchReceipt> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if self.next_request_fails() {
            return Err(LedgerError::Remote("node busy".to_string()));
        }
        Ok(BatchReceipt::all(batch))
    }
}

#[async_trait]
impl LedgerAccounts for FlakyNode {
    async fn create_account(
        &self,
        identity_id: &str,
        currency: &str,
        _cancel: &CancellationToken,
    ) -> Result<String> {
        if self.next_request_fails() {
            return Err(LedgerError::Timeout("create_account".to_string()));
        }
        Ok(format!("{}:{}", currency.to_lowercase(), identity_id))
    }
}

/// Failed creations kept in memory
struct DemoStore {
    records: Mutex<Vec<FailedAccountCreation>>,
}

#[async_trait]
impl FailedCreationStore for DemoStore {
    async fn list_failed(&self, limit: usize) -> Result<Vec<FailedAccountCreation>> {
        Ok(self.records.lock().iter().take(limit).cloned().collect())
    }

    async fn record_account_created(&self, identity_id: &str, address: &str) -> Result<()> {
        info!("Store: {} now has account {}", identity_id, address);
        self.records.lock().retain(|r| r.identity_id != identity_id);
        Ok(())
    }

    async fn record_retry_failure(
        &self,
        identity_id: &str,
        retry_count: u32,
        error: &str,
    ) -> Result<()> {
        if let Some(record) = self
            .records
            .lock()
            .iter_mut()
            .find(|r| r.identity_id == identity_id)
        {
            record.retry_count = retry_count;
            record.last_error = Some(error.to_string());
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = LedgerIntegrationConfig::load(std::env::args().nth(1).map(PathBuf::from))?;
    config.validate()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.observability.log_level))
        .init();

    let telemetry = TelemetryProvider::init(config.telemetry_config())?;
    let metrics = telemetry.metrics();

    let node = Arc::new(FlakyNode::default());
    let caller = Arc::new(ResilientCaller::new(config.retry_options()).with_metrics(metrics.clone()));

    let batcher = EventBatcherBuilder::new()
        .options(config.batcher_options())
        .caller(caller.clone())
        .metrics(metrics)
        .build(node.clone())?;

    let store = Arc::new(DemoStore {
        records: Mutex::new(vec![
            FailedAccountCreation::new("identity-7").with_failed_at(Utc::now()),
            FailedAccountCreation::new("identity-9")
                .with_currency("EUR")
                .with_failed_at(Utc::now()),
        ]),
    });
    let service = Arc::new(LedgerAccountService::new(caller.clone(), node, store.clone()));

    let shutdown = CancellationToken::new();
    let batch_driver = BatchDriver::spawn(batcher.clone(), shutdown.child_token());
    let sync_driver = SyncDriver::spawn(service, config.sync_options(), shutdown.child_token());

    for i in 0..250 {
        let entry = BatchEventEntry::new(
            event_types::AUTHENTICATION_SUCCEEDED,
            "ledger-sync-demo",
            "Identity",
            format!("identity-{}", i % 20),
        )
        .with_data("attempt", i);
        batcher.queue_event_async(entry, &shutdown).await;
    }
    batcher.queue_event(BatchEventEntry::new(
        event_types::CREDENTIAL_REVOKED,
        "ledger-sync-demo",
        "Credential",
        "credential-42",
    ));

    tokio::time::sleep(config.batcher_options().batch_interval * 2).await;

    info!("Shutting down");
    batcher.close();
    shutdown.cancel();
    let summary = batch_driver.shutdown().await;
    let passes = sync_driver.shutdown().await;
    let flushed = batcher.flush(&CancellationToken::new()).await;

    let stats = batcher.statistics();
    info!(
        "Driver sent {} events in {} batches, flush sent {}, sync passes: {}",
        summary.events_sent, summary.batches_sent, flushed, passes
    );
    info!(
        "Queued={} sent={} dropped={} depth={} critical_sent={}",
        stats.total_events_queued,
        stats.total_events_sent,
        stats.total_events_dropped,
        stats.current_queue_depth,
        stats.total_critical_sent
    );
    info!("Failed creations left: {}", store.records.lock().len());

    let report = HealthChecker::new()
        .with_caller(caller)
        .with_batcher(batcher)
        .with_version(env!("CARGO_PKG_VERSION"))
        .check_readiness()
        .await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    telemetry.shutdown()?;
    Ok(())
}
