//! PostgreSQL state store tests
//!
//! Need a server reachable through `DATABASE_URL`; run with
//! `cargo test -- --ignored`.

use chrono::{TimeZone, Utc};
use sqlx::PgPool;
use std::sync::Arc;

use chunkload_server::ingest::{Decision, Disposition, IngestionCoordinator, TableIngestState};
use chunkload_server::store::{CasResult, PgStateStore, StateStore};
use chunkload_server::IngestError;

mod common;
use common::chunk;

fn generation() -> TableIngestState {
    TableIngestState::for_generation(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap())
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_compare_and_set_versions(pool: PgPool) -> sqlx::Result<()> {
    let store = PgStateStore::new(pool);

    assert!(store.get("user").await.unwrap().is_none());
    assert_eq!(
        store.compare_and_set("user", None, &generation()).await.unwrap(),
        CasResult::Updated { version: 1 }
    );
    assert_eq!(
        store.compare_and_set("user", None, &generation()).await.unwrap(),
        CasResult::Conflict
    );
    assert_eq!(
        store.compare_and_set("user", Some(3), &generation()).await.unwrap(),
        CasResult::Conflict
    );
    assert_eq!(
        store.compare_and_set("user", Some(1), &generation()).await.unwrap(),
        CasResult::Updated { version: 2 }
    );

    let stored = store.get("user").await.unwrap().unwrap();
    assert_eq!(stored.version, 2);
    assert_eq!(stored.state, generation());

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_rejects_unknown_schema_version(pool: PgPool) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO ingest_table_state (table_id, version, document) VALUES ($1, 1, $2)",
    )
    .bind("user")
    .bind(serde_json::json!({
        "schema_version": 99,
        "latest_timestamp": null,
        "claimant_key": null,
        "first_chunk_loaded": false,
        "processed_keys": []
    }))
    .execute(&pool)
    .await?;

    let err = PgStateStore::new(pool).get("user").await.unwrap_err();
    assert!(matches!(err, IngestError::InvalidState { .. }));

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_concurrent_claims_truncate_once(pool: PgPool) -> sqlx::Result<()> {
    let coordinator =
        IngestionCoordinator::new(Arc::new(PgStateStore::new(pool))).with_max_attempts(1_000);

    let mut handles = Vec::new();
    for index in 0..8u64 {
        let coordinator = coordinator.clone();
        handles.push(tokio::spawn(async move {
            let start = index * 1000 + 1;
            let name = format!(
                "user__overwrite/2025-01-01_00:00:00__{:04}_{:04}.csv",
                start,
                start + 999
            );
            coordinator.begin(&chunk(&name)).await
        }));
    }

    let mut truncates = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            Decision::Load(Disposition::Truncate) => truncates += 1,
            Decision::Contended { .. } => {},
            other => panic!("unexpected decision {other:?}"),
        }
    }
    assert_eq!(truncates, 1);

    Ok(())
}
