//! Integration tests for the failed-creation sync driver

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use common::{fast_retry_options, wait_for_condition, InMemoryFailedStore, InMemoryLedger};
use ledger_client::{
    run_sync_pass, FailedAccountCreation, LedgerAccountService, ResilientCaller, RetryOptions,
    SyncDriver, SyncOptions,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn single_attempt(threshold: u32) -> RetryOptions {
    RetryOptions {
        max_retry_attempts: 1,
        circuit_breaker_failure_threshold: threshold,
        ..fast_retry_options()
    }
}

fn service_with(
    ledger: &Arc<InMemoryLedger>,
    store: &Arc<InMemoryFailedStore>,
    options: RetryOptions,
) -> LedgerAccountService {
    LedgerAccountService::new(
        Arc::new(ResilientCaller::new(options)),
        ledger.clone(),
        store.clone(),
    )
}

fn failed_records(n: usize) -> Vec<FailedAccountCreation> {
    (0..n)
        .map(|i| FailedAccountCreation::new(format!("id-{}", i)).with_failed_at(Utc::now()))
        .collect()
}

#[tokio::test]
async fn test_pass_recovers_recent_failures_only() {
    let now = Utc::now();
    let store = Arc::new(InMemoryFailedStore::with_records(vec![
        FailedAccountCreation::new("recent")
            .with_currency("EUR")
            .with_failed_at(now - ChronoDuration::hours(1)),
        FailedAccountCreation::new("unknown-age"),
        FailedAccountCreation::new("stale").with_failed_at(now - ChronoDuration::hours(48)),
    ]));
    let ledger = Arc::new(InMemoryLedger::new());
    let service = service_with(&ledger, &store, fast_retry_options());

    let report = run_sync_pass(&service, &SyncOptions::default(), &CancellationToken::new()).await;

    assert_eq!(report.listed, 3);
    assert_eq!(report.eligible, 2);
    assert_eq!(report.attempted, 2);
    assert_eq!(report.recovered, 2);
    assert_eq!(report.failed, 0);
    assert!(!report.circuit_open);

    assert_eq!(ledger.account_for("recent").as_deref(), Some("acct-eur-recent"));
    assert_eq!(
        ledger.account_for("unknown-age").as_deref(),
        Some("acct-usd-unknown-age")
    );
    assert!(ledger.account_for("stale").is_none());

    let pending: Vec<_> = store.pending().into_iter().map(|r| r.identity_id).collect();
    assert_eq!(pending, vec!["stale".to_string()]);
    assert_eq!(store.created().len(), 2);
}

#[tokio::test]
async fn test_failed_retry_increments_retry_count() {
    let mut record = FailedAccountCreation::new("id-1").with_failed_at(Utc::now());
    record.retry_count = 2;
    let store = Arc::new(InMemoryFailedStore::with_records(vec![record]));
    let ledger = Arc::new(InMemoryLedger::new());
    ledger.fail_next_accounts(1);
    let service = service_with(&ledger, &store, single_attempt(5));

    let report = run_sync_pass(&service, &SyncOptions::default(), &CancellationToken::new()).await;

    assert_eq!(report.attempted, 1);
    assert_eq!(report.failed, 1);

    let record = store.record("id-1").unwrap();
    assert_eq!(record.retry_count, 3);
    assert!(record.last_error.unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_pass_skipped_while_circuit_open() {
    let store = Arc::new(InMemoryFailedStore::with_records(failed_records(3)));
    let ledger = Arc::new(InMemoryLedger::new());
    ledger.fail_next_accounts(1);
    let service = service_with(&ledger, &store, single_attempt(1));

    let cancel = CancellationToken::new();
    service.create_account("other", "USD", &cancel).await;
    assert!(service.caller().is_circuit_open());
    let calls_before = ledger.account_calls();

    let report = run_sync_pass(&service, &SyncOptions::default(), &cancel).await;

    assert!(report.circuit_open);
    assert_eq!(report.attempted, 0);
    assert_eq!(ledger.account_calls(), calls_before);
    assert_eq!(store.pending().len(), 3);
}

#[tokio::test]
async fn test_pass_stops_when_circuit_opens() {
    let store = Arc::new(InMemoryFailedStore::with_records(failed_records(5)));
    let ledger = Arc::new(InMemoryLedger::new());
    ledger.fail_next_accounts(100);
    let service = service_with(&ledger, &store, single_attempt(2));

    let report = run_sync_pass(&service, &SyncOptions::default(), &CancellationToken::new()).await;

    assert_eq!(report.eligible, 5);
    assert_eq!(report.attempted, 2);
    assert_eq!(report.failed, 2);
    assert_eq!(report.skipped, 3);
    assert_eq!(ledger.account_calls(), 2);
}

#[tokio::test]
async fn test_cancelled_pass_attempts_nothing() {
    let store = Arc::new(InMemoryFailedStore::with_records(failed_records(2)));
    let ledger = Arc::new(InMemoryLedger::new());
    let service = service_with(&ledger, &store, fast_retry_options());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = run_sync_pass(&service, &SyncOptions::default(), &cancel).await;

    assert_eq!(report.eligible, 2);
    assert_eq!(report.attempted, 0);
    assert_eq!(report.skipped, 2);
    assert_eq!(ledger.account_calls(), 0);
}

#[tokio::test]
async fn test_pass_respects_record_limit() {
    let store = Arc::new(InMemoryFailedStore::with_records(failed_records(5)));
    let ledger = Arc::new(InMemoryLedger::new());
    let service = service_with(&ledger, &store, fast_retry_options());
    let options = SyncOptions {
        max_records_per_pass: 2,
        ..SyncOptions::default()
    };

    let report = run_sync_pass(&service, &options, &CancellationToken::new()).await;

    assert_eq!(report.listed, 2);
    assert_eq!(report.recovered, 2);
    assert_eq!(store.pending().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_driver_retries_on_each_interval() {
    let store = Arc::new(InMemoryFailedStore::with_records(failed_records(1)));
    let ledger = Arc::new(InMemoryLedger::new());
    ledger.fail_next_accounts(1);
    let service = Arc::new(service_with(&ledger, &store, single_attempt(5)));

    let options = SyncOptions {
        sync_interval: Duration::from_secs(60),
        ..SyncOptions::default()
    };
    let driver = SyncDriver::spawn(service, options, CancellationToken::new());

    // First pass fails, the next one recovers the account
    let recovered = wait_for_condition(
        || store.created().len() == 1,
        Duration::from_secs(300),
        Duration::from_secs(1),
    )
    .await;
    assert!(recovered);
    assert_eq!(ledger.account_calls(), 2);

    let passes = driver.shutdown().await;
    assert!(passes >= 2);
}
