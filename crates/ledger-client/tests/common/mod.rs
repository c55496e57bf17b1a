//! Common test utilities for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use ledger_client::{
    BatchEventEntry, BatchReceipt, FailedAccountCreation, FailedCreationStore, LedgerAccounts,
    LedgerError, LedgerEventBatch, LedgerEventSink, Result, RetryOptions,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// In-memory ledger node with injectable failures
#[derive(Default)]
pub struct InMemoryLedger {
    batches: Mutex<Vec<LedgerEventBatch>>,
    accounts: Mutex<HashMap<String, String>>,
    batch_calls: AtomicUsize,
    account_calls: AtomicUsize,
    failing_batch_calls: AtomicUsize,
    failing_account_calls: AtomicUsize,
    reject_all_batches: AtomicBool,
    partial_ack: Mutex<Option<usize>>,
    batch_delay: Mutex<Option<Duration>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` batch submissions
    pub fn fail_next_batches(&self, n: usize) {
        self.failing_batch_calls.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` account creations
    pub fn fail_next_accounts(&self, n: usize) {
        self.failing_account_calls.store(n, Ordering::SeqCst);
    }

    /// Fail every batch submission until switched off
    pub fn set_reject_all_batches(&self, reject: bool) {
        self.reject_all_batches.store(reject, Ordering::SeqCst);
    }

    /// Acknowledge at most `accepted` entries per batch
    pub fn set_partial_ack(&self, accepted: Option<usize>) {
        *self.partial_ack.lock() = accepted;
    }

    /// Simulated latency of a batch submission
    pub fn set_batch_delay(&self, delay: Option<Duration>) {
        *self.batch_delay.lock() = delay;
    }

    /// Batches the node accepted in full
    pub fn accepted_batches(&self) -> Vec<LedgerEventBatch> {
        self.batches.lock().clone()
    }

    /// Sizes of the accepted batches, in acceptance order
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().iter().map(|b| b.size()).collect()
    }

    /// Entity ids of every accepted entry
    pub fn accepted_entity_ids(&self) -> Vec<String> {
        self.batches
            .lock()
            .iter()
            .flat_map(|b| b.entries.iter().map(|e| e.entity_id.clone()))
            .collect()
    }

    pub fn accepted_event_count(&self) -> usize {
        self.batches.lock().iter().map(|b| b.size()).sum()
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    pub fn account_calls(&self) -> usize {
        self.account_calls.load(Ordering::SeqCst)
    }

    pub fn account_for(&self, identity_id: &str) -> Option<String> {
        self.accounts.lock().get(identity_id).cloned()
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl LedgerEventSink for InMemoryLedger {
    async fn submit_batch(
        &self,
        batch: &LedgerEventBatch,
        _cancel: &CancellationToken,
    ) -> Result<BatchReceipt> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.batch_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.reject_all_batches.load(Ordering::SeqCst)
            || Self::take_failure(&self.failing_batch_calls)
        {
            return Err(LedgerError::Remote("ledger node unavailable".to_string()));
        }

        let partial = *self.partial_ack.lock();
        if let Some(accepted) = partial {
            if accepted < batch.size() {
                return Ok(BatchReceipt { accepted });
            }
        }

        self.batches.lock().push(batch.clone());
        Ok(BatchReceipt::all(batch))
    }
}

#[async_trait]
impl LedgerAccounts for InMemoryLedger {
    async fn create_account(
        &self,
        identity_id: &str,
        currency: &str,
        _cancel: &CancellationToken,
    ) -> Result<String> {
        self.account_calls.fetch_add(1, Ordering::SeqCst);

        if Self::take_failure(&self.failing_account_calls) {
            return Err(LedgerError::Timeout("create_account timed out".to_string()));
        }

        let address = self
            .accounts
            .lock()
            .entry(identity_id.to_string())
            .or_insert_with(|| format!("acct-{}-{}", currency.to_lowercase(), identity_id))
            .clone();
        Ok(address)
    }
}

/// In-memory failed-creation store
#[derive(Default)]
pub struct InMemoryFailedStore {
    records: Mutex<Vec<FailedAccountCreation>>,
    created: Mutex<Vec<(String, String)>>,
}

impl InMemoryFailedStore {
    pub fn with_records(records: Vec<FailedAccountCreation>) -> Self {
        Self {
            records: Mutex::new(records),
            created: Mutex::new(Vec::new()),
        }
    }

    pub fn pending(&self) -> Vec<FailedAccountCreation> {
        self.records.lock().clone()
    }

    pub fn created(&self) -> Vec<(String, String)> {
        self.created.lock().clone()
    }

    pub fn record(&self, identity_id: &str) -> Option<FailedAccountCreation> {
        self.records
            .lock()
            .iter()
            .find(|r| r.identity_id == identity_id)
            .cloned()
    }
}

#[async_trait]
impl FailedCreationStore for InMemoryFailedStore {
    async fn list_failed(&self, limit: usize) -> Result<Vec<FailedAccountCreation>> {
        Ok(self.records.lock().iter().take(limit).cloned().collect())
    }

    async fn record_account_created(&self, identity_id: &str, address: &str) -> Result<()> {
        self.records.lock().retain(|r| r.identity_id != identity_id);
        self.created
            .lock()
            .push((identity_id.to_string(), address.to_string()));
        Ok(())
    }

    async fn record_retry_failure(
        &self,
        identity_id: &str,
        retry_count: u32,
        error: &str,
    ) -> Result<()> {
        let mut records = self.records.lock();
        match records.iter_mut().find(|r| r.identity_id == identity_id) {
            Some(record) => {
                record.retry_count = retry_count;
                record.last_error = Some(error.to_string());
                Ok(())
            }
            None => Err(LedgerError::Store(format!("no failed record for {}", identity_id))),
        }
    }
}

/// Retry options with short, deterministic delays
pub fn fast_retry_options() -> RetryOptions {
    RetryOptions {
        max_retry_attempts: 3,
        initial_retry_delay: Duration::from_millis(10),
        max_retry_delay: Duration::from_millis(100),
        backoff_multiplier: 2.0,
        use_jitter: false,
        circuit_breaker_failure_threshold: 5,
        circuit_breaker_recovery: Duration::from_secs(1),
    }
}

/// A non-critical event about entity `id`
pub fn audit_event(id: usize) -> BatchEventEntry {
    BatchEventEntry::new("IdentityUpdated", "identity-service", "Identity", id.to_string())
}

/// Wait for a condition with timeout
pub async fn wait_for_condition<F>(mut check: F, timeout: Duration, check_interval: Duration) -> bool
where
    F: FnMut() -> bool,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < timeout {
        if check() {
            return true;
        }
        tokio::time::sleep(check_interval).await;
    }
    check()
}
