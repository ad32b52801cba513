//! Bulk loads into the destination warehouse
//!
//! The coordinator never talks to the warehouse itself; it hands a
//! [`LoadRequest`] to a [`TableLoader`] and interprets the outcome. A missing
//! destination table is the one outcome treated as permanent, so it is
//! reported as a value rather than an error.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ingest::coordinator::Disposition;
use crate::storage::ObjectRef;

pub mod postgres;

pub use postgres::PgTableLoader;

/// Fully qualified destination table
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project_id, self.dataset_id, self.table_id)
    }
}

/// Where a table lives; one per deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseTarget {
    pub project_id: String,
    pub dataset_id: String,
}

impl WarehouseTarget {
    pub fn table(&self, table_id: &str) -> TableRef {
        TableRef {
            project_id: self.project_id.clone(),
            dataset_id: self.dataset_id.clone(),
            table_id: table_id.to_string(),
        }
    }
}

/// One chunk to load into one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    pub source: ObjectRef,
    pub destination: TableRef,
    pub disposition: Disposition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded { rows: u64 },
    /// The destination table (or its dataset) does not exist
    TableNotFound,
}

/// Executes a CSV bulk load; any `Err` is treated as transient
#[async_trait]
pub trait TableLoader: fmt::Debug + Send + Sync {
    async fn load(&self, request: &LoadRequest) -> Result<LoadOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_ref_display() {
        let target = WarehouseTarget {
            project_id: "acme".to_string(),
            dataset_id: "raw".to_string(),
        };
        assert_eq!(target.table("user").to_string(), "acme.raw.user");
    }
}
