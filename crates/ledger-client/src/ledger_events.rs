//! Ledger Event Types
//!
//! This module defines the audit/identity event records that are queued for
//! batched delivery to the ledger node, and the batch envelope sent to it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Well-known event type tags
pub mod event_types {
    pub const IDENTITY_CREATED: &str = "IdentityCreated";
    pub const IDENTITY_UPDATED: &str = "IdentityUpdated";
    pub const IDENTITY_VERIFIED: &str = "IdentityVerified";
    pub const IDENTITY_REVOKED: &str = "IdentityRevoked";
    pub const CREDENTIAL_ISSUED: &str = "CredentialIssued";
    pub const CREDENTIAL_REVOKED: &str = "CredentialRevoked";
    pub const AUTHENTICATION_SUCCEEDED: &str = "AuthenticationSucceeded";
    pub const AUTHENTICATION_FAILED: &str = "AuthenticationFailed";
    pub const SECURITY_ALERT: &str = "SecurityAlert";
}

/// A single audit event waiting to be written to the ledger
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchEventEntry {
    /// Event ID
    pub event_id: Uuid,
    /// Event type tag
    pub event_type: String,
    /// Emitting service or component
    pub source: String,
    /// Type of the entity the event is about
    pub entity_type: String,
    /// Identifier of the entity the event is about
    pub entity_id: String,
    /// Correlation ID linking related events
    pub correlation_id: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Free-form event payload
    pub data: HashMap<String, serde_json::Value>,
    /// Set by the batcher for configured critical event types
    #[serde(default)]
    pub is_critical: bool,
    /// Number of times this entry has been re-queued after a failed batch
    #[serde(default)]
    pub retry_count: u32,
}

impl BatchEventEntry {
    /// Create new event entry
    pub fn new(
        event_type: impl Into<String>,
        source: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            source: source.into(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            correlation_id: None,
            created_at: Utc::now(),
            data: HashMap::new(),
            is_critical: false,
            retry_count: 0,
        }
    }

    /// Set correlation ID
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Add a payload field
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// Batch of event entries sent to the ledger in one call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerEventBatch {
    /// Batch ID
    pub batch_id: Uuid,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Entries in the batch (no ordering guarantee)
    pub entries: Vec<BatchEventEntry>,
}

impl LedgerEventBatch {
    /// Create new batch
    pub fn new(entries: Vec<BatchEventEntry>) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            created_at: Utc::now(),
            entries,
        }
    }

    /// Get batch size
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    /// Check if batch is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Take the entries back out of the batch
    pub fn into_entries(self) -> Vec<BatchEventEntry> {
        self.entries
    }
}

/// Acknowledgement returned by the ledger node for a batch
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchReceipt {
    /// Number of entries the node accepted
    pub accepted: usize,
}

impl BatchReceipt {
    /// Receipt acknowledging the whole batch
    pub fn all(batch: &LedgerEventBatch) -> Self {
        Self {
            accepted: batch.size(),
        }
    }
}
