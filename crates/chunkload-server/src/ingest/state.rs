//! Per-table ingestion state
//!
//! One [`TableIngestState`] document exists per destination table. It records
//! the newest export generation seen for the table, which chunk (if any) holds
//! the right to truncate the table for that generation, whether that truncate
//! has landed, and which chunks of the generation are already loaded.
//!
//! The document is only ever changed through
//! [`crate::store::with_transaction`], so every method here is a pure
//! function of its inputs and may be re-run by the store's retry loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::error::IngestError;

/// Version of the persisted document layout
pub const STATE_SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
    STATE_SCHEMA_VERSION
}

/// Where a chunk's export timestamp falls relative to the table's latest generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationOrder {
    /// Strictly newer than anything seen: starts a new generation
    Newer,
    /// Same export as the current generation
    Current,
    /// Strictly older: the chunk is stale
    Older,
}

/// Coordination record for one destination table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableIngestState {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    /// Highest export generation seen; `None` until the first chunk arrives
    pub latest_timestamp: Option<DateTime<Utc>>,
    /// Chunk key holding the truncate claim for `latest_timestamp`
    pub claimant_key: Option<String>,
    /// Whether the claimant's truncate-load has completed
    pub first_chunk_loaded: bool,
    /// Chunk keys of `latest_timestamp` that loaded successfully
    #[serde(default)]
    pub processed_keys: BTreeSet<String>,
}

impl Default for TableIngestState {
    fn default() -> Self {
        Self {
            schema_version: STATE_SCHEMA_VERSION,
            latest_timestamp: None,
            claimant_key: None,
            first_chunk_loaded: false,
            processed_keys: BTreeSet::new(),
        }
    }
}

impl TableIngestState {
    /// Fresh state for a generation that has just started
    pub fn for_generation(export_timestamp: DateTime<Utc>) -> Self {
        Self {
            latest_timestamp: Some(export_timestamp),
            ..Self::default()
        }
    }

    /// Decode and validate a stored document
    pub fn from_document(
        table_id: &str,
        document: serde_json::Value,
    ) -> Result<Self, IngestError> {
        let state: Self =
            serde_json::from_value(document).map_err(|e| IngestError::InvalidState {
                table_id: table_id.to_string(),
                reason: e.to_string(),
            })?;
        state.validate(table_id)?;
        Ok(state)
    }

    /// Encode for storage
    pub fn to_document(&self) -> Result<serde_json::Value, IngestError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Check the schema version and the field invariants
    pub fn validate(&self, table_id: &str) -> Result<(), IngestError> {
        let invalid = |reason: String| IngestError::InvalidState {
            table_id: table_id.to_string(),
            reason,
        };

        if self.schema_version != STATE_SCHEMA_VERSION {
            return Err(invalid(format!(
                "unsupported schema version {} (expected {})",
                self.schema_version, STATE_SCHEMA_VERSION
            )));
        }

        if self.latest_timestamp.is_none()
            && (self.claimant_key.is_some()
                || self.first_chunk_loaded
                || !self.processed_keys.is_empty())
        {
            return Err(invalid(
                "claim or processed keys recorded without a generation".to_string(),
            ));
        }

        if self.first_chunk_loaded && self.claimant_key.is_none() {
            return Err(invalid("first chunk marked loaded without a claimant".to_string()));
        }

        Ok(())
    }

    /// Compare an export timestamp with the latest generation
    pub fn order_of(&self, export_timestamp: DateTime<Utc>) -> GenerationOrder {
        match self.latest_timestamp {
            None => GenerationOrder::Newer,
            Some(latest) => match export_timestamp.cmp(&latest) {
                Ordering::Greater => GenerationOrder::Newer,
                Ordering::Equal => GenerationOrder::Current,
                Ordering::Less => GenerationOrder::Older,
            },
        }
    }

    /// A claimant exists whose truncate has not completed
    pub fn first_chunk_is_loading(&self) -> bool {
        self.claimant_key.is_some() && !self.first_chunk_loaded
    }

    pub fn is_claimant(&self, chunk_key: &str) -> bool {
        self.claimant_key.as_deref() == Some(chunk_key)
    }

    pub fn is_processed(&self, chunk_key: &str) -> bool {
        self.processed_keys.contains(chunk_key)
    }
}
