//! Error types for the ledger integration layer
//!
//! Collaborators (the ledger node, the failed-creation store) report failures
//! through [`LedgerError`]. The resilient caller and the batcher convert every
//! one of them into results and statistics, so these errors never reach the
//! host application through the public operations.

use thiserror::Error;

/// Ledger integration error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Remote node rejected or failed the request
    #[error("remote ledger error: {0}")]
    Remote(String),

    /// Remote call did not complete in time
    #[error("remote ledger call timed out: {0}")]
    Timeout(String),

    /// Remote call completed but produced no usable result
    #[error("remote ledger returned an empty result")]
    EmptyResult,

    /// Only part of a batch was acknowledged
    #[error("batch partially acknowledged: {accepted}/{total} entries accepted")]
    PartialBatch { accepted: usize, total: usize },

    /// Circuit breaker rejected the call without contacting the node
    #[error("circuit breaker open")]
    CircuitOpen,

    /// Operation cancelled by its caller
    #[error("operation cancelled")]
    Cancelled,

    /// Persistence hook failure
    #[error("failed-creation store error: {0}")]
    Store(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, LedgerError>;
