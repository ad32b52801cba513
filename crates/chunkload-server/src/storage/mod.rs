//! Staging object store
//!
//! Chunks are staged as objects in a bucket by the export job. Ingestion only
//! needs a handful of operations on them: read the CSV, delete it once it is
//! loaded or dropped, and read or write the `processed_status` metadata that
//! parks permanently failed chunks for manual inspection.

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    types::MetadataDirective,
    Client,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, instrument, warn};

pub mod config;
pub mod memory;

pub use config::StorageConfig;
pub use memory::MemoryObjectStore;

/// User metadata key holding an object's [`ProcessedStatus`]
pub const PROCESSED_STATUS_KEY: &str = "processed_status";

/// A staged object, addressed by bucket and name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub bucket: String,
    pub name: String,
}

impl ObjectRef {
    pub fn new(bucket: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            name: name.into(),
        }
    }

    pub fn uri(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.name)
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri())
    }
}

/// Out-of-band marker stored on an object; absent means "not yet decided"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessedStatus {
    /// Will not be retried; left in place for an operator
    Failed,
}

impl ProcessedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessedStatus::Failed => "failed",
        }
    }
}

impl FromStr for ProcessedStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "failed" => Ok(ProcessedStatus::Failed),
            other => Err(anyhow::anyhow!("unknown processed status: {other}")),
        }
    }
}

/// Operations ingestion performs on staged objects
#[async_trait]
pub trait ObjectStore: fmt::Debug + Send + Sync {
    /// Status marker of an object; `None` when unset or the object is gone
    async fn processed_status(&self, object: &ObjectRef) -> Result<Option<ProcessedStatus>>;

    /// Set the status marker, keeping the object's other metadata
    async fn set_processed_status(&self, object: &ObjectRef, status: ProcessedStatus)
        -> Result<()>;

    /// Full contents of an object
    async fn read(&self, object: &ObjectRef) -> Result<Vec<u8>>;

    /// Delete an object; deleting a missing object succeeds
    async fn delete(&self, object: &ObjectRef) -> Result<()>;
}

fn parse_status(object: &ObjectRef, raw: Option<&str>) -> Option<ProcessedStatus> {
    let raw = raw?;
    match raw.parse() {
        Ok(status) => Some(status),
        Err(e) => {
            warn!(object = %object, error = %e, "Ignoring unrecognised processed status");
            None
        },
    }
}

/// [`ObjectStore`] backed by S3 or an S3-compatible service
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
}

impl fmt::Debug for S3ObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3ObjectStore").finish_non_exhaustive()
    }
}

impl S3ObjectStore {
    pub fn new(config: StorageConfig) -> Self {
        debug!("Initializing object store with config: {:?}", config);

        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "chunkload-storage",
        );

        let mut s3_config_builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(s3_config_builder.build());
        info!(region = %config.region, endpoint = ?config.endpoint, "Object store client initialized");

        Self { client }
    }

    /// `bucket/key` with the key URL-encoded segment by segment
    fn copy_source(object: &ObjectRef) -> String {
        let key = object
            .name
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        format!("{}/{}", object.bucket, key)
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self), fields(object = %object))]
    async fn processed_status(&self, object: &ObjectRef) -> Result<Option<ProcessedStatus>> {
        let response = match self
            .client
            .head_object()
            .bucket(&object.bucket)
            .key(&object.name)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if e.as_service_error().is_some_and(|e| e.is_not_found()) => {
                debug!("Object no longer exists");
                return Ok(None);
            },
            Err(e) => {
                return Err(e).context(format!("Failed to get metadata from S3: {object}"))
            },
        };

        let raw = response
            .metadata()
            .and_then(|metadata| metadata.get(PROCESSED_STATUS_KEY))
            .map(String::as_str);
        Ok(parse_status(object, raw))
    }

    #[instrument(skip(self), fields(object = %object))]
    async fn set_processed_status(
        &self,
        object: &ObjectRef,
        status: ProcessedStatus,
    ) -> Result<()> {
        let head = match self
            .client
            .head_object()
            .bucket(&object.bucket)
            .key(&object.name)
            .send()
            .await
        {
            Ok(head) => head,
            Err(e) if e.as_service_error().is_some_and(|e| e.is_not_found()) => {
                warn!("Object no longer exists, nothing to mark");
                return Ok(());
            },
            Err(e) => {
                return Err(e).context(format!("Failed to get metadata from S3: {object}"))
            },
        };

        let mut metadata = head.metadata().cloned().unwrap_or_default();
        if metadata.get(PROCESSED_STATUS_KEY).map(String::as_str) == Some(status.as_str()) {
            return Ok(());
        }
        metadata.insert(PROCESSED_STATUS_KEY.to_string(), status.as_str().to_string());

        // S3 metadata is immutable; rewrite it with an in-place copy
        self.client
            .copy_object()
            .bucket(&object.bucket)
            .key(&object.name)
            .copy_source(Self::copy_source(object))
            .metadata_directive(MetadataDirective::Replace)
            .set_metadata(Some(metadata))
            .set_content_type(head.content_type().map(str::to_string))
            .send()
            .await
            .context(format!("Failed to update metadata on S3: {object}"))?;

        info!(status = status.as_str(), "Updated processed status");
        Ok(())
    }

    #[instrument(skip(self), fields(object = %object))]
    async fn read(&self, object: &ObjectRef) -> Result<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(&object.bucket)
            .key(&object.name)
            .send()
            .await
            .context(format!("Failed to download from S3: {object}"))?;

        let data = response
            .body
            .collect()
            .await
            .context("Failed to read S3 response body")?
            .into_bytes()
            .to_vec();

        debug!(bytes = data.len(), "Downloaded object");
        Ok(data)
    }

    #[instrument(skip(self), fields(object = %object))]
    async fn delete(&self, object: &ObjectRef) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&object.bucket)
            .key(&object.name)
            .send()
            .await
            .context(format!("Failed to delete from S3: {object}"))?;

        info!("Deleted staged object");
        Ok(())
    }
}
