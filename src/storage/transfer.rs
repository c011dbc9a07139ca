// ABOUTME: Object-store backed copy of unloaded part files into the staging bucket
// ABOUTME: Lists the unload prefix on the source store and copies each object across

use super::{StagedLocation, StagingClient};
use crate::migration::format_bytes;
use crate::redshift::UnloadResult;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use object_store::buffered::BufWriter;
use object_store::path::Path;
use object_store::{ObjectMeta, ObjectStore};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

/// Copies running at once within a single transfer
const COPY_CONCURRENCY: usize = 4;

/// Copies objects from one store (S3) to another (Cloud Storage), keeping keys
pub struct ObjectStoreStaging {
    source: Arc<dyn ObjectStore>,
    target: Arc<dyn ObjectStore>,
    target_bucket: String,
}

impl ObjectStoreStaging {
    pub fn new(
        source: Arc<dyn ObjectStore>,
        target: Arc<dyn ObjectStore>,
        target_bucket: impl Into<String>,
    ) -> Self {
        Self {
            source,
            target,
            target_bucket: target_bucket.into(),
        }
    }

    /// Objects on the source store whose key starts with `prefix`
    async fn list_unloaded(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        // Listing is by path segment, so list the parent and match the file-name prefix
        let parent = prefix.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
        let parent = (!parent.is_empty()).then(|| Path::from(parent));

        let mut objects: Vec<ObjectMeta> = self
            .source
            .list(parent.as_ref())
            .try_filter(|meta| futures::future::ready(meta.location.as_ref().starts_with(prefix)))
            .try_collect()
            .await
            .with_context(|| format!("Failed to list unloaded files under {}", prefix))?;

        objects.sort_by(|a, b| a.location.cmp(&b.location));
        Ok(objects)
    }

    /// Stream one object across; large objects go up as multipart uploads
    async fn copy_object(&self, meta: ObjectMeta) -> Result<u64> {
        let location = meta.location;
        tracing::debug!("Copying {} to gs://{}", location, self.target_bucket);

        let mut chunks = self
            .source
            .get(&location)
            .await
            .with_context(|| format!("Failed to read {}", location))?
            .into_stream();
        let mut writer = BufWriter::new(Arc::clone(&self.target), location.clone());

        let mut size = 0u64;
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.with_context(|| format!("Failed to download {}", location))?;
            size += chunk.len() as u64;
            writer
                .write_all(&chunk)
                .await
                .with_context(|| format!("Failed to write gs://{}/{}", self.target_bucket, location))?;
        }
        writer
            .shutdown()
            .await
            .with_context(|| format!("Failed to finish gs://{}/{}", self.target_bucket, location))?;

        Ok(size)
    }
}

#[async_trait]
impl StagingClient for ObjectStoreStaging {
    async fn transfer_to_cloud_storage(&self, unloaded: UnloadResult) -> Result<StagedLocation> {
        let objects = self.list_unloaded(&unloaded.prefix).await?;
        if objects.is_empty() {
            bail!("No unloaded files found under {}", unloaded.url());
        }

        tracing::info!(
            "Copying {} file(s) from {} to gs://{}",
            objects.len(),
            unloaded.url(),
            self.target_bucket
        );

        let count = objects.len();
        let sizes: Vec<u64> = stream::iter(objects)
            .map(|meta| self.copy_object(meta))
            .buffer_unordered(COPY_CONCURRENCY)
            .try_collect()
            .await?;
        let bytes = sizes.iter().sum();

        tracing::debug!("Copied {} file(s), {}", count, format_bytes(bytes));
        Ok(StagedLocation {
            bucket: self.target_bucket.clone(),
            prefix: unloaded.prefix,
            objects: count,
            bytes,
            format: unloaded.format,
        })
    }
}
