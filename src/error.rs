// ABOUTME: Unified failure channel for a single table migration
// ABOUTME: Each variant names the pipeline stage that failed and carries its cause

use crate::schema::TranslationError;
use std::fmt;
use thiserror::Error;

/// Pipeline stage a [`MigrationError`] originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    StagingInit,
    DatasetCheck,
    DatasetNotFound,
    Unload,
    StagingTransfer,
    SchemaExtraction,
    SchemaTranslation,
    LoadSubmission,
    LoadExecution,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::StagingInit => "staging init",
            Stage::DatasetCheck => "dataset check",
            Stage::DatasetNotFound => "dataset not found",
            Stage::Unload => "unload",
            Stage::StagingTransfer => "staging transfer",
            Stage::SchemaExtraction => "schema extraction",
            Stage::SchemaTranslation => "schema translation",
            Stage::LoadSubmission => "load submission",
            Stage::LoadExecution => "load execution",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure of a migration run
///
/// Every variant aborts the remaining pipeline. Nothing is retried or rolled
/// back, so a failure after [`Stage::StagingTransfer`] leaves staged objects
/// behind.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("error creating staging client: {0:#}")]
    StagingInit(#[source] anyhow::Error),

    #[error("error checking dataset: {0:#}")]
    DatasetCheck(#[source] anyhow::Error),

    #[error("dataset doesn't exist: {project}:{dataset}")]
    DatasetNotFound { project: String, dataset: String },

    #[error("error unloading: {0:#}")]
    Unload(#[source] anyhow::Error),

    #[error("error transferring to cloud storage: {0:#}")]
    StagingTransfer(#[source] anyhow::Error),

    #[error("error extracting source schema: {0:#}")]
    SchemaExtraction(#[source] anyhow::Error),

    #[error("error translating redshift schema to bigquery: {0}")]
    SchemaTranslation(#[from] TranslationError),

    #[error("error submitting load job: {0:#}")]
    LoadSubmission(#[source] anyhow::Error),

    #[error("error loading data into table: {0:#}")]
    LoadExecution(#[source] anyhow::Error),
}

impl MigrationError {
    pub fn stage(&self) -> Stage {
        match self {
            MigrationError::StagingInit(_) => Stage::StagingInit,
            MigrationError::DatasetCheck(_) => Stage::DatasetCheck,
            MigrationError::DatasetNotFound { .. } => Stage::DatasetNotFound,
            MigrationError::Unload(_) => Stage::Unload,
            MigrationError::StagingTransfer(_) => Stage::StagingTransfer,
            MigrationError::SchemaExtraction(_) => Stage::SchemaExtraction,
            MigrationError::SchemaTranslation(_) => Stage::SchemaTranslation,
            MigrationError::LoadSubmission(_) => Stage::LoadSubmission,
            MigrationError::LoadExecution(_) => Stage::LoadExecution,
        }
    }

    /// Whether data may already sit in the staging bucket
    pub fn leaves_staged_data(&self) -> bool {
        matches!(
            self.stage(),
            Stage::SchemaExtraction
                | Stage::SchemaTranslation
                | Stage::LoadSubmission
                | Stage::LoadExecution
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_names_stage_and_cause() {
        let err = MigrationError::Unload(anyhow::anyhow!("permission denied for relation users"));
        assert_eq!(err.stage(), Stage::Unload);
        assert_eq!(
            err.to_string(),
            "error unloading: permission denied for relation users"
        );
    }

    #[test]
    fn test_context_chain_is_kept_in_message() {
        let cause = anyhow::anyhow!("connection reset").context("GET dataset failed");
        let err = MigrationError::DatasetCheck(cause);
        assert_eq!(
            err.to_string(),
            "error checking dataset: GET dataset failed: connection reset"
        );
    }

    #[test]
    fn test_translation_error_converts() {
        let err: MigrationError = TranslationError {
            column: "shape".to_string(),
            source_type: "geometry".to_string(),
        }
        .into();

        assert_eq!(err.stage(), Stage::SchemaTranslation);
        assert!(err.to_string().contains("'shape'"));
        assert!(err.leaves_staged_data());
    }

    #[test]
    fn test_dataset_not_found_leaves_nothing_staged() {
        let err = MigrationError::DatasetNotFound {
            project: "acme".to_string(),
            dataset: "analytics".to_string(),
        };
        assert_eq!(err.to_string(), "dataset doesn't exist: acme:analytics");
        assert!(!err.leaves_staged_data());
    }
}
