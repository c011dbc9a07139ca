// ABOUTME: Orchestrates a single-table Redshift to BigQuery migration
// ABOUTME: Drives the source, staging and destination collaborators in a fixed order

use crate::bigquery::{DestinationWarehouse, LoadHandle, LoadSpec, TableReference};
use crate::config::DestinationConfig;
use crate::error::{MigrationError, Stage};
use crate::migration::report::{format_bytes, format_duration};
use crate::redshift::{SourceTable, SourceWarehouse};
use crate::schema::SchemaTranslator;
use crate::storage::{StagedLocation, StagingProvider};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Behaviour switches for a run, always supplied by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShiftOptions {
    /// Replace the destination table instead of appending to it
    pub overwrite: bool,
    /// Block until the load job finishes
    pub wait_for_load: bool,
}

/// Progress marker reported to a [`Shifter`] observer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Staging client built and dataset confirmed
    Init,
    Unloaded,
    Staged,
    SchemaExtracted,
    Translated,
    /// Load job accepted by BigQuery
    Submitted,
    Done,
    Failed(Stage),
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Init => f.write_str("init"),
            Phase::Unloaded => f.write_str("unloaded"),
            Phase::Staged => f.write_str("staged"),
            Phase::SchemaExtracted => f.write_str("schema extracted"),
            Phase::Translated => f.write_str("translated"),
            Phase::Submitted => f.write_str("submitted"),
            Phase::Done => f.write_str("done"),
            Phase::Failed(stage) => write!(f, "failed during {}", stage),
        }
    }
}

/// How far the load got when [`Shifter::run`] returned
#[derive(Debug)]
pub enum LoadState {
    /// The load job finished successfully
    Completed { job_id: String },
    /// The job was submitted and is still running; the handle reports its outcome
    Submitted(LoadHandle),
}

/// Successful result of a migration run
#[derive(Debug)]
pub struct ShiftOutcome {
    pub table: TableReference,
    pub staged: StagedLocation,
    pub columns: usize,
    pub load: LoadState,
}

type Observer = Box<dyn Fn(Phase) + Send + Sync>;

/// Moves one Redshift table into BigQuery
///
/// The pipeline runs strictly in sequence:
///
/// 1. build a staging client for the destination
/// 2. confirm the destination dataset exists
/// 3. unload the table to S3
/// 4. copy the unloaded files into Cloud Storage
/// 5. read and translate the table schema
/// 6. submit the load job, then optionally wait for it
///
/// The first failure ends the run. Nothing is retried or cleaned up, so a
/// failure after step 4 leaves the staged files in Cloud Storage.
pub struct Shifter {
    source: Arc<dyn SourceWarehouse>,
    destination: Arc<dyn DestinationWarehouse>,
    staging: Arc<dyn StagingProvider>,
    translator: SchemaTranslator,
    options: ShiftOptions,
    observer: Option<Observer>,
}

impl Shifter {
    pub fn new(
        source: Arc<dyn SourceWarehouse>,
        destination: Arc<dyn DestinationWarehouse>,
        staging: Arc<dyn StagingProvider>,
        translator: SchemaTranslator,
        options: ShiftOptions,
    ) -> Self {
        Self {
            source,
            destination,
            staging,
            translator,
            options,
            observer: None,
        }
    }

    /// Register a callback invoked as the run moves between phases
    pub fn with_observer(mut self, observer: impl Fn(Phase) + Send + Sync + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Migrate `table` into the dataset named by `destination`
    ///
    /// # Errors
    ///
    /// Returns the [`MigrationError`] variant matching the stage that failed.
    pub async fn run(
        &self,
        table: &SourceTable,
        destination: &DestinationConfig,
    ) -> Result<ShiftOutcome, MigrationError> {
        let started = Instant::now();
        tracing::info!(
            "Migrating {} to {}:{}",
            table,
            destination.project_id,
            destination.dataset
        );

        match self.shift(table, destination).await {
            Ok(outcome) => {
                self.notify(Phase::Done);
                tracing::info!(
                    "✅ Migration of {} finished in {}",
                    table,
                    format_duration(started.elapsed())
                );
                Ok(outcome)
            }
            Err(err) => {
                self.notify(Phase::Failed(err.stage()));
                tracing::error!("Migration of {} failed: {}", table, err);
                Err(err)
            }
        }
    }

    async fn shift(
        &self,
        table: &SourceTable,
        destination: &DestinationConfig,
    ) -> Result<ShiftOutcome, MigrationError> {
        let staging = self
            .staging
            .create(destination)
            .map_err(MigrationError::StagingInit)?;

        let exists = self
            .destination
            .dataset_exists(&destination.project_id, &destination.dataset)
            .await
            .map_err(MigrationError::DatasetCheck)?;
        if !exists {
            return Err(MigrationError::DatasetNotFound {
                project: destination.project_id.clone(),
                dataset: destination.dataset.clone(),
            });
        }
        self.notify(Phase::Init);

        tracing::info!("Step 1/3: Unloading {} to S3...", table);
        let unloaded = self
            .source
            .unload(table)
            .await
            .map_err(MigrationError::Unload)?;
        tracing::info!("✓ Unloaded to {}", unloaded.url());
        self.notify(Phase::Unloaded);

        tracing::info!("Step 2/3: Transferring to Cloud Storage...");
        let staged = staging
            .transfer_to_cloud_storage(unloaded)
            .await
            .map_err(MigrationError::StagingTransfer)?;
        tracing::info!(
            "✓ Staged {} object(s), {} at {}",
            staged.objects,
            format_bytes(staged.bytes),
            staged.source_uri()
        );
        self.notify(Phase::Staged);

        let result = self.load(table, destination, &staged).await;
        if let Err(err) = &result {
            if err.leaves_staged_data() {
                tracing::warn!(
                    "Staged data was left at {}; remove it once it is no longer needed",
                    staged.source_uri()
                );
            }
        }
        let (reference, columns, load) = result?;

        Ok(ShiftOutcome {
            table: reference,
            staged,
            columns,
            load,
        })
    }

    async fn load(
        &self,
        table: &SourceTable,
        destination: &DestinationConfig,
        staged: &StagedLocation,
    ) -> Result<(TableReference, usize, LoadState), MigrationError> {
        let source_schema = self
            .source
            .extract_schema(table)
            .await
            .map_err(MigrationError::SchemaExtraction)?;
        self.notify(Phase::SchemaExtracted);

        let schema = self.translator.translate(&source_schema)?;
        let columns = schema.len();
        self.notify(Phase::Translated);

        let reference = TableReference::new(
            &destination.project_id,
            &destination.dataset,
            destination.table.as_deref().unwrap_or(&table.name),
        );

        tracing::info!(
            "Step 3/3: Loading {} column(s) into {}...",
            columns,
            reference
        );
        let spec = LoadSpec {
            table: reference.clone(),
            staged: staged.clone(),
            overwrite: self.options.overwrite,
            schema,
        };
        let handle = self
            .destination
            .load_table(spec)
            .await
            .map_err(MigrationError::LoadSubmission)?;
        tracing::info!("✓ Submitted load job {}", handle.job_id());
        self.notify(Phase::Submitted);

        if !self.options.wait_for_load {
            tracing::info!("Not waiting for load job {} to finish", handle.job_id());
            return Ok((reference, columns, LoadState::Submitted(handle)));
        }

        let job_id = handle.job_id().to_string();
        handle.wait().await.map_err(MigrationError::LoadExecution)?;
        tracing::info!("✓ Load job {} completed", job_id);

        Ok((reference, columns, LoadState::Completed { job_id }))
    }

    fn notify(&self, phase: Phase) {
        tracing::debug!("Migration phase: {}", phase);
        if let Some(observer) = &self.observer {
            observer(phase);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::SchemaExtracted.to_string(), "schema extracted");
        assert_eq!(
            Phase::Failed(Stage::LoadExecution).to_string(),
            "failed during load execution"
        );
    }
}
