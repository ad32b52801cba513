//! Chunkload Server Library
//!
//! Loads chunked CSV exports into warehouse tables as their objects are
//! staged. Deliveries are at-least-once and unordered; correctness comes from
//! one transactional coordination record per table.
//!
//! # Overview
//!
//! - **Parsing**: object names become typed [`ingest::ChunkDescriptor`]s
//! - **Coordination**: [`ingest::IngestionCoordinator`] truncates each table
//!   at most once per export generation and never loads a chunk twice
//! - **Policy**: [`ingest::ChunkIngestor`] turns every delivery into a
//!   terminal outcome or a retryable error
//! - **Adapters**: [`store`], [`storage`] and [`warehouse`] each pair a
//!   trait with a production backend and an in-memory one
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use chunkload_server::{
//!     ingest::{ChunkIngestor, DeliveryPolicy, IngestionCoordinator},
//!     storage::MemoryObjectStore,
//!     store::MemoryStateStore,
//!     warehouse::{PgTableLoader, WarehouseTarget},
//! };
//!
//! # async fn run(pool: sqlx::PgPool) {
//! let objects = Arc::new(MemoryObjectStore::new());
//! let ingestor = ChunkIngestor::new(
//!     IngestionCoordinator::new(Arc::new(MemoryStateStore::new())),
//!     objects.clone(),
//!     Arc::new(PgTableLoader::new(pool, objects)),
//!     WarehouseTarget { project_id: "local".into(), dataset_id: "raw".into() },
//!     DeliveryPolicy::default(),
//! );
//! # }
//! ```

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod middleware;
pub mod storage;
pub mod store;
pub mod warehouse;

// Re-export commonly used types
pub use error::{AppError, IngestError, IngestResult};
