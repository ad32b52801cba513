//! In-memory state store for tests and local runs
//!
//! Records live in a `HashMap` behind an `Arc<RwLock>`, so clones share the
//! same data and the store can be handed to many concurrent tasks. The
//! compare-and-set runs under the write lock, which gives it the same
//! all-or-nothing behaviour as the PostgreSQL store.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{CasResult, StateStore, Versioned};
use crate::error::IngestResult;
use crate::ingest::state::TableIngestState;

#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    records: Arc<RwLock<HashMap<String, Versioned>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a table's document, bypassing the version check
    pub async fn put(&self, table_id: &str, state: TableIngestState) {
        let mut records = self.records.write().await;
        let version = records.get(table_id).map_or(1, |v| v.version + 1);
        records.insert(table_id.to_string(), Versioned { version, state });
    }

    /// Current state of a table, if any
    pub async fn state(&self, table_id: &str) -> Option<TableIngestState> {
        self.records
            .read()
            .await
            .get(table_id)
            .map(|v| v.state.clone())
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, table_id: &str) -> IngestResult<Option<Versioned>> {
        Ok(self.records.read().await.get(table_id).cloned())
    }

    async fn compare_and_set(
        &self,
        table_id: &str,
        expected: Option<i64>,
        new: &TableIngestState,
    ) -> IngestResult<CasResult> {
        new.validate(table_id)?;

        let mut records = self.records.write().await;
        let current = records.get(table_id).map(|v| v.version);
        if current != expected {
            return Ok(CasResult::Conflict);
        }

        let version = expected.map_or(1, |v| v + 1);
        records.insert(
            table_id.to_string(),
            Versioned {
                version,
                state: new.clone(),
            },
        );

        Ok(CasResult::Updated { version })
    }
}
