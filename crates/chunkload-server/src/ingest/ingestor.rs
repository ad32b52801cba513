//! Handling of a single delivery
//!
//! [`ChunkIngestor::handle`] takes one delivery from event to terminal
//! outcome:
//!
//! 1. Parse the object name; a malformed object is deleted.
//! 2. Drop events older than the policy allows, marking the object failed.
//! 3. Skip objects already marked failed.
//! 4. Ask the coordinator for a decision: stale and duplicate chunks are
//!    deleted, contention is returned as a retryable error.
//! 5. Load; on success record the chunk and delete the object, on a missing
//!    table mark the object failed, on any other error release the claim
//!    and propagate.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument};

use super::chunk::ChunkDescriptor;
use super::coordinator::{Decision, Disposition, IngestionCoordinator};
use super::event::DeliveryEvent;
use super::policy::{DeliveryPolicy, Outcome};
use crate::error::{IngestError, IngestResult};
use crate::storage::{ObjectRef, ObjectStore, ProcessedStatus};
use crate::warehouse::{LoadOutcome, LoadRequest, TableLoader, WarehouseTarget};

#[derive(Debug, Clone)]
pub struct ChunkIngestor {
    coordinator: IngestionCoordinator,
    objects: Arc<dyn ObjectStore>,
    loader: Arc<dyn TableLoader>,
    target: WarehouseTarget,
    policy: DeliveryPolicy,
}

impl ChunkIngestor {
    pub fn new(
        coordinator: IngestionCoordinator,
        objects: Arc<dyn ObjectStore>,
        loader: Arc<dyn TableLoader>,
        target: WarehouseTarget,
        policy: DeliveryPolicy,
    ) -> Self {
        Self {
            coordinator,
            objects,
            loader,
            target,
            policy,
        }
    }

    pub fn coordinator(&self) -> &IngestionCoordinator {
        &self.coordinator
    }

    /// Resolve one delivery; an `Err` asks the platform to redeliver
    pub async fn handle(&self, event: &DeliveryEvent, now: DateTime<Utc>) -> IngestResult<Outcome> {
        let span = info_span!(
            "delivery",
            event_id = %event.id,
            bucket = %event.data.bucket,
            object = %event.data.name,
        );

        async {
            let result = self.process(event, now).await;
            match &result {
                Ok(outcome) => info!(?outcome, "Delivery resolved"),
                Err(e) if e.is_contention() => info!(error = %e, "Delivery deferred"),
                Err(e) => error!(error = %e, "Delivery failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn process(&self, event: &DeliveryEvent, now: DateTime<Utc>) -> IngestResult<Outcome> {
        let object = event.object();

        let chunk = match ChunkDescriptor::parse(&object.name) {
            Ok(chunk) => chunk,
            Err(reason) => {
                warn!(%reason, "Object name does not follow the naming convention, deleting");
                self.delete(&object).await?;
                return Ok(Outcome::DroppedMalformed {
                    reason: reason.to_string(),
                });
            },
        };

        let status = self
            .objects
            .processed_status(&object)
            .await
            .map_err(IngestError::storage)?;

        if self.policy.event_is_too_old(event.time, now) {
            info!(event_time = %event.time, "Event is too old, dropping to stop further retries");
            if status != Some(ProcessedStatus::Failed) {
                self.mark_failed(&object).await?;
            }
            return Ok(Outcome::Expired);
        }

        if status == Some(ProcessedStatus::Failed) {
            info!("Object is marked failed, skipping");
            return Ok(Outcome::SkippedFailed);
        }

        match self.coordinator.begin(&chunk).await? {
            Decision::Load(disposition) => self.load(&chunk, &object, disposition).await,
            Decision::Stale => {
                info!("Chunk is from a previous export, deleting");
                self.delete(&object).await?;
                Ok(Outcome::DroppedStale)
            },
            Decision::Duplicate => {
                info!("Chunk was already loaded, deleting");
                self.delete(&object).await?;
                Ok(Outcome::DroppedDuplicate)
            },
            Decision::Contended { claimant } => Err(IngestError::Contention {
                table_id: chunk.table_id().to_string(),
                claimant,
            }),
        }
    }

    async fn load(
        &self,
        chunk: &ChunkDescriptor,
        object: &ObjectRef,
        disposition: Disposition,
    ) -> IngestResult<Outcome> {
        let request = LoadRequest {
            source: object.clone(),
            destination: self.target.table(chunk.table_id()),
            disposition,
        };

        match self.loader.load(&request).await {
            Ok(LoadOutcome::Loaded { rows }) => {
                self.coordinator.complete(chunk).await?;
                self.delete(object).await?;
                Ok(Outcome::Loaded { disposition, rows })
            },
            Ok(LoadOutcome::TableNotFound) => {
                warn!(table = %request.destination, "Destination table does not exist, marking object failed");
                self.release_claim(chunk).await;
                self.mark_failed(object).await?;
                Ok(Outcome::TableNotFound {
                    table: request.destination.to_string(),
                })
            },
            Err(e) => {
                self.release_claim(chunk).await;
                Err(IngestError::warehouse(e))
            },
        }
    }

    /// Hand back the truncate claim after a load that did not land
    ///
    /// A failed release is only logged; the claim then stays with this chunk
    /// and its redelivery truncates.
    async fn release_claim(&self, chunk: &ChunkDescriptor) {
        if let Err(e) = self.coordinator.release(chunk).await {
            error!(error = %e, "Failed to release truncate claim");
        }
    }

    async fn delete(&self, object: &ObjectRef) -> IngestResult<()> {
        self.objects.delete(object).await.map_err(IngestError::storage)
    }

    async fn mark_failed(&self, object: &ObjectRef) -> IngestResult<()> {
        self.objects
            .set_processed_status(object, ProcessedStatus::Failed)
            .await
            .map_err(IngestError::storage)
    }
}
