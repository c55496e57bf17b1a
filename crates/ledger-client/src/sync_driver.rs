//! Background Sync Driver
//!
//! Periodically retries account creations that failed earlier, as long as
//! they are recent enough and the ledger circuit is not open.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::account_service::LedgerAccountService;

/// Sync driver configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    /// Time between passes
    pub sync_interval: Duration,
    /// Records that failed longer ago than this are left alone
    pub max_failed_creation_age_hours: u32,
    /// Records requested from the store per pass
    pub max_records_per_pass: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(300),
            max_failed_creation_age_hours: 24,
            max_records_per_pass: 100,
        }
    }
}

impl SyncOptions {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.sync_interval.is_zero() {
            return Err("sync_interval must be greater than 0".to_string());
        }
        if self.max_failed_creation_age_hours == 0 {
            return Err("max_failed_creation_age_hours must be greater than 0".to_string());
        }
        if self.max_records_per_pass == 0 {
            return Err("max_records_per_pass must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Outcome of one sync pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncPassReport {
    /// Records returned by the store
    pub listed: usize,
    /// Records inside the age window
    pub eligible: usize,
    /// Records retried
    pub attempted: usize,
    /// Retries that created the account
    pub recovered: usize,
    /// Retries that failed
    pub failed: usize,
    /// Eligible records not attempted (circuit opened or cancelled)
    pub skipped: usize,
    /// The pass did not run because the circuit was open
    pub circuit_open: bool,
}

/// Run one pass over the failed-creation store
pub async fn run_sync_pass(
    service: &LedgerAccountService,
    options: &SyncOptions,
    cancel: &CancellationToken,
) -> SyncPassReport {
    let mut report = SyncPassReport::default();

    if service.caller().is_circuit_open() {
        info!("Ledger circuit open, skipping sync pass");
        report.circuit_open = true;
        return report;
    }

    let records = match service.store().list_failed(options.max_records_per_pass).await {
        Ok(records) => records,
        Err(e) => {
            warn!("Failed to list failed account creations: {}", e);
            return report;
        }
    };
    report.listed = records.len();

    let cutoff = Utc::now() - chrono::Duration::hours(i64::from(options.max_failed_creation_age_hours));
    let eligible: Vec<_> = records
        .into_iter()
        // Records with unknown age are retried
        .filter(|record| record.failed_at.map_or(true, |failed_at| failed_at >= cutoff))
        .collect();
    report.eligible = eligible.len();

    debug!(
        "Found {} of {} failed account creations eligible for retry",
        report.eligible, report.listed
    );

    for record in &eligible {
        if cancel.is_cancelled() {
            debug!("Sync pass cancelled");
            break;
        }
        if service.caller().is_circuit_open() {
            warn!("Ledger circuit opened during sync pass, stopping");
            break;
        }

        report.attempted += 1;
        let result = service.retry_failed_creation(record, cancel).await;
        if result.success {
            report.recovered += 1;
        } else {
            report.failed += 1;
        }
    }

    report.skipped = report.eligible - report.attempted;
    report
}

/// Handle to a running sync driver
pub struct SyncDriver {
    handle: JoinHandle<u64>,
    cancel: CancellationToken,
}

impl SyncDriver {
    /// Spawn the driver on the current runtime. The first pass runs
    /// immediately, then once per `sync_interval` until `cancel` fires.
    pub fn spawn(
        service: Arc<LedgerAccountService>,
        options: SyncOptions,
        cancel: CancellationToken,
    ) -> Self {
        let handle = tokio::spawn(run(service, options, cancel.clone()));
        Self { handle, cancel }
    }

    /// Token stopping this driver
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the driver task has exited
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop the driver and wait for it. Returns the number of passes run.
    pub async fn shutdown(self) -> u64 {
        self.cancel.cancel();
        match self.handle.await {
            Ok(passes) => passes,
            Err(e) => {
                error!("Sync driver task failed: {}", e);
                0
            }
        }
    }
}

async fn run(
    service: Arc<LedgerAccountService>,
    options: SyncOptions,
    cancel: CancellationToken,
) -> u64 {
    info!(
        "Sync driver started: interval={:?}, max_age={}h",
        options.sync_interval, options.max_failed_creation_age_hours
    );

    let mut ticker = interval(options.sync_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut passes = 0;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let report = run_sync_pass(&service, &options, &cancel).await;
        passes += 1;

        if report.attempted > 0 || report.circuit_open {
            info!(
                "Sync pass complete: eligible={}, recovered={}, failed={}, skipped={}, circuit_open={}",
                report.eligible, report.recovered, report.failed, report.skipped, report.circuit_open
            );
        }
    }

    info!("Sync driver stopped after {} passes", passes);
    passes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = SyncOptions::default();
        assert_eq!(options.sync_interval, Duration::from_secs(300));
        assert_eq!(options.max_failed_creation_age_hours, 24);
        assert_eq!(options.max_records_per_pass, 100);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_options_validation() {
        let mut options = SyncOptions::default();
        options.sync_interval = Duration::ZERO;
        assert!(options.validate().is_err());

        let mut options = SyncOptions::default();
        options.max_failed_creation_age_hours = 0;
        assert!(options.validate().is_err());

        let mut options = SyncOptions::default();
        options.max_records_per_pass = 0;
        assert!(options.validate().is_err());
    }
}
