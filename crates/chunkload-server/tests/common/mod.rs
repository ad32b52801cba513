//! Shared fixtures for chunkload integration tests
//!
//! - [`FakeLoader`]: a scripted [`TableLoader`] that records every request
//!   and can hold loads open until released
//! - [`FlakyStateStore`]: a state store whose writes start failing after a
//!   set number of commits
//! - [`Harness`]: an ingestor wired to in-memory stores and a fake loader

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

use chunkload_server::ingest::{
    ChunkDescriptor, ChunkIngestor, DeliveryEvent, DeliveryPolicy, EventData,
    IngestionCoordinator, TableIngestState,
};
use chunkload_server::storage::{MemoryObjectStore, ObjectRef};
use chunkload_server::store::{CasResult, MemoryStateStore, StateStore, Versioned};
use chunkload_server::{IngestError, IngestResult};
use chunkload_server::warehouse::{LoadOutcome, LoadRequest, TableLoader, WarehouseTarget};

pub const BUCKET: &str = "exports";

/// What the next call to [`FakeLoader::load`] does
#[derive(Debug, Clone)]
pub enum Scripted {
    Loaded,
    TableNotFound,
    Fail(String),
}

#[derive(Debug, Default)]
pub struct FakeLoader {
    script: Mutex<VecDeque<Scripted>>,
    calls: Mutex<Vec<LoadRequest>>,
    gate: Option<Arc<Semaphore>>,
}

impl FakeLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads block until [`FakeLoader::open_gate`] hands out permits
    pub fn gated() -> Self {
        Self {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::default()
        }
    }

    pub fn open_gate(&self, loads: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(loads);
        }
    }

    /// Queue outcomes; once the queue is empty every load succeeds
    pub fn script(&self, outcomes: impl IntoIterator<Item = Scripted>) {
        self.script.lock().unwrap().extend(outcomes);
    }

    pub fn calls(&self) -> Vec<LoadRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Wait until at least `count` loads have started
    pub async fn wait_for_calls(&self, count: usize) {
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while self.call_count() < count {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("loads did not start in time");
    }
}

#[async_trait]
impl TableLoader for FakeLoader {
    async fn load(&self, request: &LoadRequest) -> anyhow::Result<LoadOutcome> {
        self.calls.lock().unwrap().push(request.clone());

        if let Some(gate) = &self.gate {
            gate.acquire().await?.forget();
        }

        let next = self.script.lock().unwrap().pop_front();
        match next.unwrap_or(Scripted::Loaded) {
            Scripted::Loaded => {
                let rows = ChunkDescriptor::parse(&request.source.name)
                    .map(|chunk| chunk.row_count())
                    .unwrap_or(0);
                Ok(LoadOutcome::Loaded { rows })
            },
            Scripted::TableNotFound => Ok(LoadOutcome::TableNotFound),
            Scripted::Fail(message) => Err(anyhow::anyhow!(message)),
        }
    }
}

/// Delegates to a [`MemoryStateStore`] until its write allowance runs out
#[derive(Debug)]
pub struct FlakyStateStore {
    inner: MemoryStateStore,
    writes_left: AtomicUsize,
}

impl FlakyStateStore {
    pub fn failing_after(inner: MemoryStateStore, writes: usize) -> Self {
        Self {
            inner,
            writes_left: AtomicUsize::new(writes),
        }
    }
}

#[async_trait]
impl StateStore for FlakyStateStore {
    async fn get(&self, table_id: &str) -> IngestResult<Option<Versioned>> {
        self.inner.get(table_id).await
    }

    async fn compare_and_set(
        &self,
        table_id: &str,
        expected: Option<i64>,
        new: &TableIngestState,
    ) -> IngestResult<CasResult> {
        self.writes_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .map_err(|_| IngestError::Database(sqlx::Error::PoolTimedOut))?;
        self.inner.compare_and_set(table_id, expected, new).await
    }
}

/// An ingestor over in-memory stores
pub struct Harness {
    pub states: MemoryStateStore,
    pub objects: MemoryObjectStore,
    pub loader: Arc<FakeLoader>,
    pub ingestor: ChunkIngestor,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_loader(FakeLoader::new())
    }

    pub fn with_loader(loader: FakeLoader) -> Self {
        let states = MemoryStateStore::new();
        Self::build(states.clone(), Arc::new(states), loader)
    }

    /// State writes fail once `writes` transactions have committed
    pub fn with_failing_state_writes(loader: FakeLoader, writes: usize) -> Self {
        let states = MemoryStateStore::new();
        let store = FlakyStateStore::failing_after(states.clone(), writes);
        Self::build(states, Arc::new(store), loader)
    }

    fn build(states: MemoryStateStore, store: Arc<dyn StateStore>, loader: FakeLoader) -> Self {
        let objects = MemoryObjectStore::new();
        let loader = Arc::new(loader);

        let ingestor = ChunkIngestor::new(
            IngestionCoordinator::new(store),
            Arc::new(objects.clone()),
            loader.clone(),
            target(),
            DeliveryPolicy::default(),
        );

        Self {
            states,
            objects,
            loader,
            ingestor,
        }
    }

    /// Stage an object and return the event announcing it
    pub async fn stage(&self, name: &str) -> DeliveryEvent {
        self.objects.put(&object(name), "id,name\n1,ada\n").await;
        event(name, now())
    }
}

pub fn target() -> WarehouseTarget {
    WarehouseTarget {
        project_id: "acme".to_string(),
        dataset_id: "raw".to_string(),
    }
}

pub fn object(name: &str) -> ObjectRef {
    ObjectRef::new(BUCKET, name)
}

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

pub fn minutes_ago(minutes: i64) -> DateTime<Utc> {
    Utc::now() - ChronoDuration::minutes(minutes)
}

pub fn event(name: &str, time: DateTime<Utc>) -> DeliveryEvent {
    DeliveryEvent::new(
        format!("evt-{name}"),
        time,
        EventData {
            bucket: BUCKET.to_string(),
            name: name.to_string(),
        },
    )
}

pub fn chunk(name: &str) -> ChunkDescriptor {
    ChunkDescriptor::parse(name).unwrap()
}
