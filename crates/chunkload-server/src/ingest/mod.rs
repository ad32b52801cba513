//! Chunk ingestion
//!
//! - [`chunk`]: object names to [`ChunkDescriptor`]s
//! - [`state`]: the per-table coordination record
//! - [`coordinator`]: truncate claims, staleness and idempotency
//! - [`policy`] and [`ingestor`]: what each delivery ends up doing

pub mod chunk;
pub mod coordinator;
pub mod event;
pub mod ingestor;
pub mod policy;
pub mod state;

pub use chunk::{ChunkDescriptor, MalformedName, WriteMode};
pub use coordinator::{Decision, Disposition, IngestionCoordinator};
pub use event::{DeliveryEvent, EventData};
pub use ingestor::ChunkIngestor;
pub use policy::{DeliveryPolicy, Outcome, DEFAULT_MAX_EVENT_AGE_SECS};
pub use state::TableIngestState;
