//! PostgreSQL as the destination warehouse
//!
//! A dataset maps to a schema and a table to a table in it. Chunks are
//! streamed in with `COPY .. FROM STDIN` inside one transaction, preceded by
//! `TRUNCATE` when the chunk holds the generation's truncate claim, so a
//! failed load leaves the table as it was.
//!
//! CSV chunks carry a header row and UTC timestamps; the session time zone
//! is pinned to UTC for the load.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use super::{LoadOutcome, LoadRequest, TableLoader, TableRef};
use crate::ingest::coordinator::Disposition;
use crate::storage::ObjectStore;

/// SQLSTATE for `undefined_table`
const UNDEFINED_TABLE: &str = "42P01";

/// SQLSTATE for `invalid_schema_name`
const INVALID_SCHEMA_NAME: &str = "3F000";

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn qualified_name(table: &TableRef) -> String {
    format!("{}.{}", quote_ident(&table.dataset_id), quote_ident(&table.table_id))
}

fn copy_statement(table: &TableRef) -> String {
    format!(
        "COPY {} FROM STDIN WITH (FORMAT csv, HEADER true)",
        qualified_name(table)
    )
}

fn is_missing_table(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|e| e.code())
        .is_some_and(|code| code == UNDEFINED_TABLE || code == INVALID_SCHEMA_NAME)
}

#[derive(Debug, Clone)]
pub struct PgTableLoader {
    pool: PgPool,
    objects: Arc<dyn ObjectStore>,
}

impl PgTableLoader {
    pub fn new(pool: PgPool, objects: Arc<dyn ObjectStore>) -> Self {
        Self { pool, objects }
    }
}

#[async_trait]
impl TableLoader for PgTableLoader {
    #[instrument(skip(self, request), fields(table = %request.destination, disposition = %request.disposition))]
    async fn load(&self, request: &LoadRequest) -> Result<LoadOutcome> {
        let data = self
            .objects
            .read(&request.source)
            .await
            .with_context(|| format!("Failed to read {}", request.source))?;
        debug!(bytes = data.len(), "Read chunk");

        let mut tx = self.pool.begin().await.context("Failed to start load transaction")?;

        sqlx::query("SET LOCAL TIME ZONE 'UTC'")
            .execute(&mut *tx)
            .await
            .context("Failed to set load time zone")?;

        if request.disposition == Disposition::Truncate {
            let truncate = format!("TRUNCATE TABLE {}", qualified_name(&request.destination));
            match sqlx::query(&truncate).execute(&mut *tx).await {
                Ok(_) => {},
                Err(e) if is_missing_table(&e) => return Ok(LoadOutcome::TableNotFound),
                Err(e) => return Err(e).context("Failed to truncate table"),
            }
        }

        let mut copy = match tx.copy_in_raw(&copy_statement(&request.destination)).await {
            Ok(copy) => copy,
            Err(e) if is_missing_table(&e) => return Ok(LoadOutcome::TableNotFound),
            Err(e) => return Err(e).context("Failed to start COPY"),
        };
        copy.send(data).await.context("Failed to stream chunk")?;
        let rows = copy.finish().await.context("Failed to finish COPY")?;

        tx.commit().await.context("Failed to commit load")?;

        info!(rows, "Loaded chunk");
        Ok(LoadOutcome::Loaded { rows })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(dataset_id: &str, table_id: &str) -> TableRef {
        TableRef {
            project_id: "acme".to_string(),
            dataset_id: dataset_id.to_string(),
            table_id: table_id.to_string(),
        }
    }

    #[test]
    fn test_copy_statement_quotes_identifiers() {
        assert_eq!(
            copy_statement(&table("raw", "user")),
            r#"COPY "raw"."user" FROM STDIN WITH (FORMAT csv, HEADER true)"#
        );
    }

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident(r#"we"ird"#), r#""we""ird""#);
        assert_eq!(
            qualified_name(&table("raw", "a\"; DROP TABLE x; --")),
            r#""raw"."a""; DROP TABLE x; --""#
        );
    }

    #[test]
    fn test_non_database_errors_are_not_missing_tables() {
        assert!(!is_missing_table(&sqlx::Error::RowNotFound));
    }
}
