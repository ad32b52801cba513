//! Transactional storage of [`TableIngestState`] documents
//!
//! Stores expose two primitives, a versioned read and a compare-and-set, and
//! [`with_transaction`] builds an optimistic read-modify-write on top of them:
//! read the current document, run the caller's step against it, and commit
//! only if nobody else committed in between. A lost race re-runs the step
//! against the fresh document, so steps must be pure.
//!
//! Conflicts are **not errors**. [`CasResult::Conflict`] is the expected
//! outcome of concurrent writers and is handled by the retry loop.

use async_trait::async_trait;
use std::fmt::Debug;
use tracing::{debug, warn};

use crate::error::{IngestError, IngestResult};
use crate::ingest::state::TableIngestState;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStateStore;
pub use postgres::PgStateStore;

/// Default bound on optimistic retries before a transaction gives up
pub const DEFAULT_MAX_TRANSACTION_ATTEMPTS: usize = 25;

/// A state document together with the version it was read at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    pub version: i64,
    pub state: TableIngestState,
}

/// Outcome of a compare-and-set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasResult {
    /// The document was written and now has `version`
    Updated { version: i64 },
    /// The stored version did not match the expected one
    Conflict,
}

/// What a transaction step wants done with the document it was shown
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStep<T> {
    /// Persist the new state and return the value
    Commit(TableIngestState, T),
    /// Leave the document untouched and return the value
    Abort(T),
}

/// Versioned document storage keyed by table id
#[async_trait]
pub trait StateStore: Debug + Send + Sync {
    /// Read the current document, `None` if the table has never been seen
    async fn get(&self, table_id: &str) -> IngestResult<Option<Versioned>>;

    /// Write `new` only if the stored version equals `expected`
    ///
    /// `expected = None` means the document must not exist yet.
    async fn compare_and_set(
        &self,
        table_id: &str,
        expected: Option<i64>,
        new: &TableIngestState,
    ) -> IngestResult<CasResult>;
}

/// Run `step` as a serializable read-modify-write of one table's state
///
/// An absent document is presented to `step` as [`TableIngestState::default`].
/// A commit whose new state equals the pre-image is skipped.
pub async fn with_transaction<S, T, F>(
    store: &S,
    table_id: &str,
    max_attempts: usize,
    mut step: F,
) -> IngestResult<T>
where
    S: StateStore + ?Sized,
    F: FnMut(&TableIngestState) -> TxStep<T> + Send,
    T: Send,
{
    let attempts = max_attempts.max(1);

    for attempt in 1..=attempts {
        let current = store.get(table_id).await?;
        let expected = current.as_ref().map(|v| v.version);
        let pre_image = current.map(|v| v.state).unwrap_or_default();

        let (new_state, value) = match step(&pre_image) {
            TxStep::Abort(value) => return Ok(value),
            TxStep::Commit(new_state, value) => (new_state, value),
        };

        if new_state == pre_image && expected.is_some() {
            return Ok(value);
        }

        match store.compare_and_set(table_id, expected, &new_state).await? {
            CasResult::Updated { version } => {
                debug!(table_id, version, attempt, "Committed ingest state");
                return Ok(value);
            },
            CasResult::Conflict => {
                debug!(table_id, attempt, "Ingest state changed underneath us, retrying");
            },
        }
    }

    warn!(table_id, attempts, "Giving up on ingest state transaction");
    Err(IngestError::TransactionExhausted {
        table_id: table_id.to_string(),
        attempts,
    })
}
