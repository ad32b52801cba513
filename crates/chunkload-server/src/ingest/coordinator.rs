//! Ingestion coordinator
//!
//! Arbitrates, per destination table, which chunk of an export generation
//! may truncate the table and which chunks must append, skip, or wait.
//! A chunk goes through up to two transactions:
//!
//! 1. [`IngestionCoordinator::begin`] before the load: detects stale and
//!    duplicate chunks, takes the truncate claim, and returns a [`Decision`].
//! 2. [`IngestionCoordinator::complete`] after a successful load: records the
//!    chunk as processed and, for the claimant, marks the truncate as landed.
//!
//! If the load fails, [`IngestionCoordinator::release`] hands the claim back
//! so another delivery can truncate. A delivery of the same chunk that was
//! already loading may still land afterwards; its completion takes the claim
//! back.
//!
//! The transition functions are pure; [`with_transaction`] may run them
//! several times against fresh documents.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::chunk::{ChunkDescriptor, WriteMode};
use super::state::{GenerationOrder, TableIngestState};
use crate::error::{IngestError, IngestResult};
use crate::store::{with_transaction, StateStore, TxStep, DEFAULT_MAX_TRANSACTION_ATTEMPTS};

/// Whether a load replaces or extends the destination table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    Truncate,
    Append,
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Disposition::Truncate => "truncate",
            Disposition::Append => "append",
        })
    }
}

/// Result of [`IngestionCoordinator::begin`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Load the chunk with this disposition
    Load(Disposition),
    /// A newer generation exists; drop the chunk
    Stale,
    /// The chunk already loaded for this generation; drop it
    Duplicate,
    /// Another chunk holds the truncate claim and is still loading
    Contended { claimant: String },
}

/// Decide what a chunk may do against `state`
pub(crate) fn begin_step(state: &TableIngestState, chunk: &ChunkDescriptor) -> TxStep<Decision> {
    let export_timestamp = chunk.export_timestamp();
    let mut next = match state.order_of(export_timestamp) {
        GenerationOrder::Older => return TxStep::Abort(Decision::Stale),
        GenerationOrder::Newer => TableIngestState::for_generation(export_timestamp),
        GenerationOrder::Current => state.clone(),
    };

    let chunk_key = chunk.chunk_key();
    if next.is_processed(&chunk_key) {
        return TxStep::Abort(Decision::Duplicate);
    }

    let disposition = match chunk.write_mode() {
        WriteMode::Append => Disposition::Append,
        WriteMode::Overwrite => match next.claimant_key.clone() {
            None => {
                next.claimant_key = Some(chunk_key);
                Disposition::Truncate
            },
            Some(_) if next.first_chunk_loaded => Disposition::Append,
            Some(claimant) if claimant == chunk_key => Disposition::Truncate,
            Some(claimant) => return TxStep::Abort(Decision::Contended { claimant }),
        },
    };

    TxStep::Commit(next, Decision::Load(disposition))
}

/// What [`complete_step`] did with a finished load
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Completion {
    /// The chunk is recorded as processed
    Recorded,
    /// A newer generation started while the chunk loaded
    GenerationMoved,
    /// The chunk truncated after its claim was released and another chunk
    /// claimed the generation; that chunk's truncate will drop these rows
    Preempted { claimant: String },
}

/// Record a successful load
///
/// An overwrite chunk that finishes before the first chunk landed loaded
/// with a truncate. If its claim was released in the meantime by a failed
/// delivery of the same chunk, the truncate still happened, so the claim is
/// taken back and marked as landed.
pub(crate) fn complete_step(state: &TableIngestState, chunk: &ChunkDescriptor) -> TxStep<Completion> {
    if state.order_of(chunk.export_timestamp()) != GenerationOrder::Current {
        return TxStep::Abort(Completion::GenerationMoved);
    }

    let chunk_key = chunk.chunk_key();
    let mut next = state.clone();
    if chunk.write_mode() == WriteMode::Overwrite && !next.first_chunk_loaded {
        match next.claimant_key.clone() {
            Some(claimant) if claimant != chunk_key => {
                return TxStep::Abort(Completion::Preempted { claimant })
            },
            _ => {
                next.claimant_key = Some(chunk_key.clone());
                next.first_chunk_loaded = true;
            },
        }
    }
    next.processed_keys.insert(chunk_key);

    TxStep::Commit(next, Completion::Recorded)
}

/// Drop an unfinished claim held by `chunk`; `false` if it held none
pub(crate) fn release_step(state: &TableIngestState, chunk: &ChunkDescriptor) -> TxStep<bool> {
    let holds_claim = state.order_of(chunk.export_timestamp()) == GenerationOrder::Current
        && state.first_chunk_is_loading()
        && state.is_claimant(&chunk.chunk_key());

    if !holds_claim {
        return TxStep::Abort(false);
    }

    let mut next = state.clone();
    next.claimant_key = None;
    TxStep::Commit(next, true)
}

/// Runs the coordination transactions against an injected state store
#[derive(Debug, Clone)]
pub struct IngestionCoordinator {
    store: Arc<dyn StateStore>,
    max_attempts: usize,
}

impl IngestionCoordinator {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            max_attempts: DEFAULT_MAX_TRANSACTION_ATTEMPTS,
        }
    }

    /// Bound on optimistic retries per transaction
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[instrument(skip(self, chunk), fields(table_id = chunk.table_id(), chunk_key = %chunk.chunk_key()))]
    pub async fn begin(&self, chunk: &ChunkDescriptor) -> IngestResult<Decision> {
        let decision = with_transaction(&*self.store, chunk.table_id(), self.max_attempts, |state| {
            begin_step(state, chunk)
        })
        .await?;

        debug!(?decision, "Coordinated chunk");
        Ok(decision)
    }

    /// Record a loaded chunk; `false` if the generation moved on meanwhile
    ///
    /// Fails with [`IngestError::Contention`] when another chunk claimed the
    /// truncate while this one loaded, so the chunk is delivered again and
    /// appended once that truncate has landed.
    #[instrument(skip(self, chunk), fields(table_id = chunk.table_id(), chunk_key = %chunk.chunk_key()))]
    pub async fn complete(&self, chunk: &ChunkDescriptor) -> IngestResult<bool> {
        let completion =
            with_transaction(&*self.store, chunk.table_id(), self.max_attempts, |state| {
                complete_step(state, chunk)
            })
            .await?;

        match completion {
            Completion::Recorded => Ok(true),
            Completion::GenerationMoved => {
                info!("Generation changed during load, not recording chunk");
                Ok(false)
            },
            Completion::Preempted { claimant } => {
                warn!(%claimant, "Truncate claim was taken over during load, not recording chunk");
                Err(IngestError::Contention {
                    table_id: chunk.table_id().to_string(),
                    claimant,
                })
            },
        }
    }

    #[instrument(skip(self, chunk), fields(table_id = chunk.table_id(), chunk_key = %chunk.chunk_key()))]
    pub async fn release(&self, chunk: &ChunkDescriptor) -> IngestResult<bool> {
        let released =
            with_transaction(&*self.store, chunk.table_id(), self.max_attempts, |state| {
                release_step(state, chunk)
            })
            .await?;

        if released {
            info!("Released truncate claim");
        }
        Ok(released)
    }

    /// Current coordination record of a table
    pub async fn state(&self, table_id: &str) -> IngestResult<Option<TableIngestState>> {
        Ok(self.store.get(table_id).await?.map(|v| v.state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(name: &str) -> ChunkDescriptor {
        ChunkDescriptor::parse(name).unwrap()
    }

    /// Apply a step the way the store would and return its value
    fn apply<T>(
        state: &mut TableIngestState,
        step: impl FnOnce(&TableIngestState) -> TxStep<T>,
    ) -> T {
        match step(state) {
            TxStep::Commit(next, value) => {
                *state = next;
                value
            },
            TxStep::Abort(value) => value,
        }
    }

    const FIRST: &str = "user__overwrite/2025-01-01_00:00:00__0001_1000.csv";
    const SECOND: &str = "user__overwrite/2025-01-01_00:00:00__1001_2000.csv";
    const NEXT_GEN: &str = "user__overwrite/2025-01-02_00:00:00__0001_1000.csv";

    #[test]
    fn test_first_overwrite_chunk_claims_truncate() {
        let mut state = TableIngestState::default();

        let decision = apply(&mut state, |s| begin_step(s, &chunk(FIRST)));

        assert_eq!(decision, Decision::Load(Disposition::Truncate));
        assert_eq!(state.claimant_key.as_deref(), Some("1_1000"));
        assert!(!state.first_chunk_loaded);
        assert!(state.processed_keys.is_empty());
    }

    #[test]
    fn test_second_overwrite_chunk_waits_for_claimant() {
        let mut state = TableIngestState::default();
        apply(&mut state, |s| begin_step(s, &chunk(FIRST)));
        let before = state.clone();

        let decision = apply(&mut state, |s| begin_step(s, &chunk(SECOND)));

        assert_eq!(
            decision,
            Decision::Contended {
                claimant: "1_1000".to_string()
            }
        );
        assert_eq!(state, before);
    }

    #[test]
    fn test_claimant_retry_truncates_again() {
        let mut state = TableIngestState::default();
        apply(&mut state, |s| begin_step(s, &chunk(FIRST)));

        match begin_step(&state, &chunk(FIRST)) {
            TxStep::Commit(next, decision) => {
                assert_eq!(decision, Decision::Load(Disposition::Truncate));
                assert_eq!(next, state);
            },
            TxStep::Abort(decision) => panic!("unexpected abort: {decision:?}"),
        }
    }

    #[test]
    fn test_chunks_append_after_claimant_loaded() {
        let mut state = TableIngestState::default();
        apply(&mut state, |s| begin_step(s, &chunk(FIRST)));
        assert_eq!(
            apply(&mut state, |s| complete_step(s, &chunk(FIRST))),
            Completion::Recorded
        );
        assert!(state.first_chunk_loaded);

        let decision = apply(&mut state, |s| begin_step(s, &chunk(SECOND)));
        assert_eq!(decision, Decision::Load(Disposition::Append));
    }

    #[test]
    fn test_processed_chunk_is_duplicate() {
        let mut state = TableIngestState::default();
        apply(&mut state, |s| begin_step(s, &chunk(FIRST)));
        apply(&mut state, |s| complete_step(s, &chunk(FIRST)));

        assert_eq!(
            apply(&mut state, |s| begin_step(s, &chunk(FIRST))),
            Decision::Duplicate
        );
    }

    #[test]
    fn test_append_chunks_load_in_any_order_once() {
        let mut state = TableIngestState::default();
        let a = chunk("user__append/2025-01-01_00:00:00__1001_2000.csv");
        let b = chunk("user__append/2025-01-01_00:00:00__0001_1000.csv");

        assert_eq!(
            apply(&mut state, |s| begin_step(s, &a)),
            Decision::Load(Disposition::Append)
        );
        assert_eq!(
            apply(&mut state, |s| begin_step(s, &b)),
            Decision::Load(Disposition::Append)
        );
        apply(&mut state, |s| complete_step(s, &a));

        assert_eq!(apply(&mut state, |s| begin_step(s, &a)), Decision::Duplicate);
        assert_eq!(
            apply(&mut state, |s| begin_step(s, &b)),
            Decision::Load(Disposition::Append)
        );
        assert!(state.claimant_key.is_none());
    }

    #[test]
    fn test_older_generation_is_stale() {
        let mut state = TableIngestState::default();
        apply(&mut state, |s| begin_step(s, &chunk(NEXT_GEN)));
        let before = state.clone();

        assert_eq!(apply(&mut state, |s| begin_step(s, &chunk(FIRST))), Decision::Stale);
        assert_eq!(state, before);
    }

    #[test]
    fn test_newer_generation_resets_unfinished_claim() {
        let mut state = TableIngestState::default();
        apply(&mut state, |s| begin_step(s, &chunk(FIRST)));
        let append = chunk("user__append/2025-01-01_00:00:00__2001_3000.csv");
        apply(&mut state, |s| begin_step(s, &append));
        state.processed_keys.insert("2001_3000".to_string());

        let decision = apply(&mut state, |s| begin_step(s, &chunk(NEXT_GEN)));

        assert_eq!(decision, Decision::Load(Disposition::Truncate));
        assert_eq!(state.latest_timestamp, Some(chunk(NEXT_GEN).export_timestamp()));
        assert_eq!(state.claimant_key.as_deref(), Some("1_1000"));
        assert!(state.processed_keys.is_empty());
    }

    #[test]
    fn test_complete_after_generation_change_records_nothing() {
        let mut state = TableIngestState::default();
        apply(&mut state, |s| begin_step(s, &chunk(FIRST)));
        apply(&mut state, |s| begin_step(s, &chunk(NEXT_GEN)));
        let before = state.clone();

        assert_eq!(
            apply(&mut state, |s| complete_step(s, &chunk(FIRST))),
            Completion::GenerationMoved
        );
        assert_eq!(state, before);
    }

    #[test]
    fn test_release_only_by_unfinished_claimant() {
        let mut state = TableIngestState::default();
        apply(&mut state, |s| begin_step(s, &chunk(FIRST)));

        assert!(!apply(&mut state, |s| release_step(s, &chunk(SECOND))));
        assert!(apply(&mut state, |s| release_step(s, &chunk(FIRST))));
        assert!(state.claimant_key.is_none());

        assert_eq!(
            apply(&mut state, |s| begin_step(s, &chunk(SECOND))),
            Decision::Load(Disposition::Truncate)
        );
        apply(&mut state, |s| complete_step(s, &chunk(SECOND)));
        assert!(!apply(&mut state, |s| release_step(s, &chunk(SECOND))));
        assert_eq!(state.claimant_key.as_deref(), Some("1001_2000"));
    }

    #[test]
    fn test_released_claimant_landing_takes_claim_back() {
        let mut state = TableIngestState::default();
        // Two deliveries of the first chunk are both told to truncate
        assert_eq!(
            apply(&mut state, |s| begin_step(s, &chunk(FIRST))),
            Decision::Load(Disposition::Truncate)
        );
        assert_eq!(
            apply(&mut state, |s| begin_step(s, &chunk(FIRST))),
            Decision::Load(Disposition::Truncate)
        );

        // One fails and releases, the other lands
        assert!(apply(&mut state, |s| release_step(s, &chunk(FIRST))));
        assert_eq!(
            apply(&mut state, |s| complete_step(s, &chunk(FIRST))),
            Completion::Recorded
        );

        assert_eq!(state.claimant_key.as_deref(), Some("1_1000"));
        assert!(state.first_chunk_loaded);
        assert!(state.is_processed("1_1000"));
        assert_eq!(
            apply(&mut state, |s| begin_step(s, &chunk(SECOND))),
            Decision::Load(Disposition::Append)
        );
    }

    #[test]
    fn test_released_claimant_landing_after_new_claim_is_preempted() {
        let mut state = TableIngestState::default();
        apply(&mut state, |s| begin_step(s, &chunk(FIRST)));
        apply(&mut state, |s| begin_step(s, &chunk(FIRST)));
        apply(&mut state, |s| release_step(s, &chunk(FIRST)));
        assert_eq!(
            apply(&mut state, |s| begin_step(s, &chunk(SECOND))),
            Decision::Load(Disposition::Truncate)
        );
        let before = state.clone();

        assert_eq!(
            apply(&mut state, |s| complete_step(s, &chunk(FIRST))),
            Completion::Preempted {
                claimant: "1001_2000".to_string()
            }
        );
        assert_eq!(state, before);

        // Once the new claimant lands the first chunk appends
        apply(&mut state, |s| complete_step(s, &chunk(SECOND)));
        assert_eq!(
            apply(&mut state, |s| begin_step(s, &chunk(FIRST))),
            Decision::Load(Disposition::Append)
        );
    }

    mod exclusivity {
        use super::*;
        use chrono::{DateTime, Utc};
        use proptest::prelude::*;
        use std::collections::{HashMap, HashSet};

        const NAMES: [&str; 6] = [
            "user__overwrite/2025-01-01_00:00:00__0001_1000.csv",
            "user__overwrite/2025-01-01_00:00:00__1001_2000.csv",
            "user__overwrite/2025-01-01_00:00:00__2001_3000.csv",
            "user__overwrite/2025-01-02_00:00:00__0001_1000.csv",
            "user__overwrite/2025-01-02_00:00:00__1001_2000.csv",
            "user__overwrite/2025-01-02_00:00:00__2001_3000.csv",
        ];

        proptest! {
            /// Whatever the interleaving of deliveries, redeliveries,
            /// completions and failures, a generation never has two
            /// claimants and never truncates after a truncating load of it
            /// was recorded.
            #[test]
            fn truncate_is_exclusive_per_generation(
                ops in prop::collection::vec((0usize..6, 0u8..3), 1..120)
            ) {
                let mut state = TableIngestState::default();
                // One entry per delivery; the same chunk may be loading twice
                let mut in_flight: Vec<(usize, Disposition)> = Vec::new();
                let mut holders: HashMap<DateTime<Utc>, String> = HashMap::new();
                let mut landed: HashSet<DateTime<Utc>> = HashSet::new();

                for (index, op) in ops {
                    let chunk = chunk(NAMES[index]);
                    let ts = chunk.export_timestamp();
                    let key = chunk.chunk_key();
                    let delivery = in_flight.iter().position(|(i, _)| *i == index);

                    match (op, delivery) {
                        (0, _) => match apply(&mut state, |s| begin_step(s, &chunk)) {
                            Decision::Load(Disposition::Truncate) => {
                                prop_assert!(!landed.contains(&ts));
                                if let Some(holder) = holders.get(&ts) {
                                    prop_assert_eq!(holder, &key);
                                }
                                holders.insert(ts, key);
                                in_flight.push((index, Disposition::Truncate));
                            },
                            Decision::Load(Disposition::Append) => {
                                prop_assert!(landed.contains(&ts));
                                in_flight.push((index, Disposition::Append));
                            },
                            _ => {},
                        },
                        (1, Some(position)) => {
                            let (_, disposition) = in_flight.remove(position);
                            let completion = apply(&mut state, |s| complete_step(s, &chunk));
                            if completion == Completion::Recorded
                                && disposition == Disposition::Truncate
                            {
                                prop_assert!(state.first_chunk_loaded);
                                landed.insert(ts);
                            }
                        },
                        (2, Some(position)) => {
                            in_flight.remove(position);
                            if apply(&mut state, |s| release_step(s, &chunk)) {
                                holders.remove(&ts);
                            }
                        },
                        _ => {},
                    }

                    prop_assert!(state.validate("user").is_ok());
                }
            }
        }
    }
}
