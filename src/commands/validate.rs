// ABOUTME: Pre-flight validation command for migration readiness
// ABOUTME: Checks config, Redshift connectivity, BigQuery credentials and staging setup

use crate::bigquery::{BigQueryClient, DestinationWarehouse};
use crate::config::{self, DestinationConfig};
use crate::redshift;
use crate::storage::{CloudStagingProvider, StagingProvider};
use anyhow::{bail, Context, Result};
use std::path::Path;

/// Check that everything a `shift` run needs is reachable
///
/// Nothing is unloaded or written; the command only connects and looks.
pub async fn validate(config_path: &Path, destination: &DestinationConfig) -> Result<()> {
    tracing::info!("Starting validation...");

    // Step 1: Parse config
    tracing::info!("Step 1/4: Reading {}...", config_path.display());
    let config = config::load_config(config_path)?;
    let mapping = config.type_mapping()?;
    tracing::info!(
        "✓ Config is valid ({} Redshift type mapping(s))",
        mapping.len()
    );

    // Step 2: Connect to Redshift
    tracing::info!("Step 2/4: Connecting to Redshift...");
    let pg_config = config.redshift.connection_config()?;
    let client = redshift::connect(&pg_config)
        .await
        .context("Failed to connect to Redshift")?;
    client
        .simple_query("SELECT 1")
        .await
        .context("Redshift connection is not usable")?;
    tracing::info!("✓ Connected to Redshift");

    // Step 3: Check BigQuery credentials and dataset
    tracing::info!("Step 3/4: Checking BigQuery dataset...");
    let mut bigquery = BigQueryClient::new()
        .await
        .context("Failed to resolve BigQuery credentials")?;
    if let Some(endpoint) = &config.bigquery.endpoint {
        bigquery = bigquery.with_endpoint(endpoint);
    }
    let exists = bigquery
        .dataset_exists(&destination.project_id, &destination.dataset)
        .await
        .context("Failed to check BigQuery dataset")?;
    if !exists {
        bail!(
            "Dataset {}:{} doesn't exist. Create it with: bq mk --dataset {}:{}",
            destination.project_id,
            destination.dataset,
            destination.project_id,
            destination.dataset
        );
    }
    tracing::info!(
        "✓ Dataset {}:{} exists",
        destination.project_id,
        destination.dataset
    );

    // Step 4: Build staging stores
    tracing::info!("Step 4/4: Checking staging buckets...");
    CloudStagingProvider::new(config.s3.clone(), config.gcs.clone())
        .create(destination)
        .context("Failed to set up staging")?;
    tracing::info!(
        "✓ Staging s3://{} → gs://{}",
        config.s3.bucket,
        config.gcs.bucket_for(&destination.project_id)
    );

    tracing::info!("✅ Validation complete - ready for migration");
    Ok(())
}
