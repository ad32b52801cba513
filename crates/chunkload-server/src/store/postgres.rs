//! PostgreSQL-backed state store
//!
//! Documents live in `ingest_table_state` (see `migrations/`). The row's
//! `version` column is the compare-and-set token: creation is an
//! `INSERT .. ON CONFLICT DO NOTHING`, updates are `UPDATE .. WHERE version = $n`.
//! A single-row conditional write is atomic under the default isolation
//! level, which is all the optimistic loop in [`super::with_transaction`]
//! needs.

use async_trait::async_trait;
use sqlx::{types::Json, PgPool};
use tracing::instrument;

use super::{CasResult, StateStore, Versioned};
use crate::error::IngestResult;
use crate::ingest::state::TableIngestState;

#[derive(Debug, Clone)]
pub struct PgStateStore {
    pool: PgPool,
}

impl PgStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StateStore for PgStateStore {
    #[instrument(skip(self))]
    async fn get(&self, table_id: &str) -> IngestResult<Option<Versioned>> {
        let row: Option<(i64, serde_json::Value)> = sqlx::query_as(
            r#"
            SELECT version, document
            FROM ingest_table_state
            WHERE table_id = $1
            "#,
        )
        .bind(table_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(version, document)| {
            Ok(Versioned {
                version,
                state: TableIngestState::from_document(table_id, document)?,
            })
        })
        .transpose()
    }

    #[instrument(skip(self, new))]
    async fn compare_and_set(
        &self,
        table_id: &str,
        expected: Option<i64>,
        new: &TableIngestState,
    ) -> IngestResult<CasResult> {
        new.validate(table_id)?;

        let result = match expected {
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO ingest_table_state (table_id, version, document)
                    VALUES ($1, 1, $2)
                    ON CONFLICT (table_id) DO NOTHING
                    "#,
                )
                .bind(table_id)
                .bind(Json(new))
                .execute(&self.pool)
                .await?
            },
            Some(version) => {
                sqlx::query(
                    r#"
                    UPDATE ingest_table_state
                    SET version = version + 1, document = $3, updated_at = NOW()
                    WHERE table_id = $1 AND version = $2
                    "#,
                )
                .bind(table_id)
                .bind(version)
                .bind(Json(new))
                .execute(&self.pool)
                .await?
            },
        };

        if result.rows_affected() == 1 {
            Ok(CasResult::Updated {
                version: expected.map_or(1, |v| v + 1),
            })
        } else {
            Ok(CasResult::Conflict)
        }
    }
}
