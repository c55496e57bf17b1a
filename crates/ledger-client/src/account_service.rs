//! Ledger Account Service
//!
//! Creates ledger accounts for identities through the [`ResilientCaller`] and
//! re-runs creations that previously failed, reporting outcomes to the
//! host's [`FailedCreationStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{LedgerError, Result};
use crate::ledger_node::LedgerAccounts;
use crate::resilient_caller::{RemoteCallResult, ResilientCaller};

/// Currency used when a failed record does not carry one
pub const DEFAULT_CURRENCY: &str = "USD";

/// An account creation that failed and awaits a retry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedAccountCreation {
    /// Identity the account belongs to
    pub identity_id: String,
    /// Requested currency, if recorded
    #[serde(default)]
    pub currency: Option<String>,
    /// When the creation failed, if known
    #[serde(default)]
    pub failed_at: Option<DateTime<Utc>>,
    /// Background retries already made
    #[serde(default)]
    pub retry_count: u32,
    /// Last error message
    #[serde(default)]
    pub last_error: Option<String>,
}

impl FailedAccountCreation {
    /// Create a record for an identity
    pub fn new(identity_id: impl Into<String>) -> Self {
        Self {
            identity_id: identity_id.into(),
            currency: None,
            failed_at: None,
            retry_count: 0,
            last_error: None,
        }
    }

    /// Set the currency
    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = Some(currency.into());
        self
    }

    /// Set the failure time
    pub fn with_failed_at(mut self, failed_at: DateTime<Utc>) -> Self {
        self.failed_at = Some(failed_at);
        self
    }

    /// Currency to retry with
    pub fn currency_or_default(&self) -> &str {
        match self.currency.as_deref() {
            Some(currency) if !currency.is_empty() => currency,
            _ => DEFAULT_CURRENCY,
        }
    }
}

/// Persistence hook for failed account creations
#[async_trait]
pub trait FailedCreationStore: Send + Sync {
    /// List up to `limit` failed creations
    async fn list_failed(&self, limit: usize) -> Result<Vec<FailedAccountCreation>>;

    /// The account now exists; clear the failure markers
    async fn record_account_created(&self, identity_id: &str, address: &str) -> Result<()>;

    /// Another retry failed
    async fn record_retry_failure(
        &self,
        identity_id: &str,
        retry_count: u32,
        error: &str,
    ) -> Result<()>;
}

/// Resilient ledger account creation
pub struct LedgerAccountService {
    caller: Arc<ResilientCaller>,
    accounts: Arc<dyn LedgerAccounts>,
    store: Arc<dyn FailedCreationStore>,
}

impl LedgerAccountService {
    /// Create a new service
    pub fn new(
        caller: Arc<ResilientCaller>,
        accounts: Arc<dyn LedgerAccounts>,
        store: Arc<dyn FailedCreationStore>,
    ) -> Self {
        Self {
            caller,
            accounts,
            store,
        }
    }

    /// Caller guarding the ledger node
    pub fn caller(&self) -> &Arc<ResilientCaller> {
        &self.caller
    }

    /// Failed-creation store
    pub fn store(&self) -> &Arc<dyn FailedCreationStore> {
        &self.store
    }

    /// Create the ledger account for an identity. An empty address counts as
    /// a failed attempt.
    pub async fn create_account(
        &self,
        identity_id: &str,
        currency: &str,
        cancel: &CancellationToken,
    ) -> RemoteCallResult<String> {
        let accounts = &self.accounts;

        let result = self
            .caller
            .execute_named(
                "create_account",
                move |(identity_id, currency): (String, String), token: CancellationToken| async move {
                    let address = accounts
                        .create_account(&identity_id, &currency, &token)
                        .await?;
                    if address.is_empty() {
                        return Err(LedgerError::EmptyResult);
                    }
                    Ok(address)
                },
                (identity_id.to_string(), currency.to_string()),
                cancel,
            )
            .await;

        if let Some(address) = &result.value {
            info!(
                "Created ledger account for {} on attempt {}, address: {}",
                identity_id, result.attempts, address
            );
        } else if result.is_circuit_open() {
            debug!("Ledger account creation for {} skipped, circuit open", identity_id);
        } else {
            error!(
                "Failed to create ledger account for {} after {} attempts: {}",
                identity_id,
                result.attempts,
                result.error.as_deref().unwrap_or("unknown error")
            );
        }

        result
    }

    /// Re-run a failed creation and record the outcome in the store
    pub async fn retry_failed_creation(
        &self,
        record: &FailedAccountCreation,
        cancel: &CancellationToken,
    ) -> RemoteCallResult<String> {
        info!("Retrying failed ledger account creation for {}", record.identity_id);

        let result = self
            .create_account(&record.identity_id, record.currency_or_default(), cancel)
            .await;

        match &result.value {
            Some(address) => {
                if let Err(e) = self
                    .store
                    .record_account_created(&record.identity_id, address)
                    .await
                {
                    warn!(
                        "Recovered ledger account for {} but failed to record it: {}",
                        record.identity_id, e
                    );
                } else {
                    info!(
                        "Recovered ledger account for {}, address: {}",
                        record.identity_id, address
                    );
                }
            }
            None => {
                let retry_count = record.retry_count.saturating_add(1);
                let message = result.error.as_deref().unwrap_or("unknown error");
                if let Err(e) = self
                    .store
                    .record_retry_failure(&record.identity_id, retry_count, message)
                    .await
                {
                    warn!(
                        "Failed to record retry failure for {}: {}",
                        record.identity_id, e
                    );
                }
                warn!(
                    "Failed to recover ledger account for {}, retry count: {}",
                    record.identity_id, retry_count
                );
            }
        }

        result
    }
}
