//! In-memory object store for tests and local runs

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{parse_status, ObjectRef, ObjectStore, ProcessedStatus, PROCESSED_STATUS_KEY};

#[derive(Debug, Clone, Default)]
struct StoredObject {
    data: Vec<u8>,
    metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryObjectStore {
    objects: Arc<RwLock<HashMap<ObjectRef, StoredObject>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage an object, replacing any previous contents and metadata
    pub async fn put(&self, object: &ObjectRef, data: impl Into<Vec<u8>>) {
        self.objects.write().await.insert(
            object.clone(),
            StoredObject {
                data: data.into(),
                metadata: HashMap::new(),
            },
        );
    }

    pub async fn contains(&self, object: &ObjectRef) -> bool {
        self.objects.read().await.contains_key(object)
    }

    pub async fn metadata(&self, object: &ObjectRef) -> Option<HashMap<String, String>> {
        self.objects
            .read()
            .await
            .get(object)
            .map(|stored| stored.metadata.clone())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn processed_status(&self, object: &ObjectRef) -> Result<Option<ProcessedStatus>> {
        let objects = self.objects.read().await;
        let raw = objects
            .get(object)
            .and_then(|stored| stored.metadata.get(PROCESSED_STATUS_KEY))
            .map(String::as_str);
        Ok(parse_status(object, raw))
    }

    async fn set_processed_status(
        &self,
        object: &ObjectRef,
        status: ProcessedStatus,
    ) -> Result<()> {
        if let Some(stored) = self.objects.write().await.get_mut(object) {
            stored
                .metadata
                .insert(PROCESSED_STATUS_KEY.to_string(), status.as_str().to_string());
        }
        Ok(())
    }

    async fn read(&self, object: &ObjectRef) -> Result<Vec<u8>> {
        self.objects
            .read()
            .await
            .get(object)
            .map(|stored| stored.data.clone())
            .ok_or_else(|| anyhow!("no such object: {object}"))
    }

    async fn delete(&self, object: &ObjectRef) -> Result<()> {
        self.objects.write().await.remove(object);
        Ok(())
    }
}
