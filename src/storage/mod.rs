// ABOUTME: Staging of unloaded data into Google Cloud Storage
// ABOUTME: Defines the staging client contract and builds S3/GCS object stores

pub mod transfer;

pub use transfer::ObjectStoreStaging;

use crate::config::{DestinationConfig, GcsConfig, S3Config};
use crate::redshift::{UnloadFormat, UnloadResult};
use anyhow::{Context, Result};
use async_trait::async_trait;
use object_store::aws::AmazonS3Builder;
use object_store::gcp::GoogleCloudStorageBuilder;
use std::sync::Arc;

/// Where staged data landed in Cloud Storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedLocation {
    pub bucket: String,
    /// Key prefix shared by every staged object
    pub prefix: String,
    pub objects: usize,
    pub bytes: u64,
    /// Layout of the staged files, carried over from the unload
    pub format: UnloadFormat,
}

impl StagedLocation {
    /// Wildcard URI BigQuery loads from
    pub fn source_uri(&self) -> String {
        format!("gs://{}/{}*", self.bucket, self.prefix)
    }
}

/// Moves unloaded files into the bucket BigQuery reads from
#[async_trait]
pub trait StagingClient: Send + Sync {
    async fn transfer_to_cloud_storage(&self, unloaded: UnloadResult) -> Result<StagedLocation>;
}

/// Builds a [`StagingClient`] for one migration run
pub trait StagingProvider: Send + Sync {
    fn create(&self, destination: &DestinationConfig) -> Result<Box<dyn StagingClient>>;
}

/// Stages through the real S3 and Cloud Storage services
#[derive(Debug, Clone)]
pub struct CloudStagingProvider {
    s3: S3Config,
    gcs: GcsConfig,
}

impl CloudStagingProvider {
    pub fn new(s3: S3Config, gcs: GcsConfig) -> Self {
        Self { s3, gcs }
    }
}

impl StagingProvider for CloudStagingProvider {
    fn create(&self, destination: &DestinationConfig) -> Result<Box<dyn StagingClient>> {
        let mut s3 = AmazonS3Builder::new()
            .with_region(&self.s3.region)
            .with_bucket_name(&self.s3.bucket)
            .with_access_key_id(&self.s3.access_key_id)
            .with_secret_access_key(&self.s3.secret_access_key);
        if let Some(token) = &self.s3.session_token {
            s3 = s3.with_token(token);
        }
        if let Some(endpoint) = &self.s3.endpoint {
            s3 = s3.with_endpoint(endpoint);
        }
        let source = s3
            .build()
            .with_context(|| format!("Failed to build S3 client for bucket {}", self.s3.bucket))?;

        let bucket = self.gcs.bucket_for(&destination.project_id);
        let mut gcs = GoogleCloudStorageBuilder::from_env().with_bucket_name(&bucket);
        if let Some(path) = &self.gcs.service_account_path {
            gcs = gcs.with_service_account_path(path);
        }
        let target = gcs
            .build()
            .with_context(|| format!("Failed to build Cloud Storage client for bucket {}", bucket))?;

        tracing::debug!("Staging s3://{} → gs://{}", self.s3.bucket, bucket);
        Ok(Box::new(ObjectStoreStaging::new(
            Arc::new(source),
            Arc::new(target),
            bucket,
        )))
    }
}
