//! Ledger Node Collaborators
//!
//! The transport used to reach the ledger node is provided by the host
//! application. This module defines the seams the integration layer calls
//! through. Implementations must be idempotent: the resilient caller may
//! repeat any call.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::ledger_events::{BatchReceipt, LedgerEventBatch};

/// Account creation on the ledger node
#[async_trait]
pub trait LedgerAccounts: Send + Sync {
    /// Create (or return the existing) ledger account for an identity.
    ///
    /// Returns the account address. An empty address is treated as a failed
    /// attempt by the caller.
    async fn create_account(
        &self,
        identity_id: &str,
        currency: &str,
        cancel: &CancellationToken,
    ) -> Result<String>;
}

/// Batch write of audit events to the ledger node
#[async_trait]
pub trait LedgerEventSink: Send + Sync {
    /// Submit a batch. The receipt reports how many entries were accepted;
    /// anything short of the full batch is a failed batch.
    async fn submit_batch(
        &self,
        batch: &LedgerEventBatch,
        cancel: &CancellationToken,
    ) -> Result<BatchReceipt>;
}
