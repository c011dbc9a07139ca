// ABOUTME: Destination warehouse side of a migration
// ABOUTME: Table references, load specifications and the BigQuery REST client

pub mod auth;
pub mod client;
pub mod handle;

pub use auth::Credentials;
pub use client::BigQueryClient;
pub use handle::{LoadCompletion, LoadHandle, LoadPoll};

use crate::schema::DestinationSchema;
use crate::storage::StagedLocation;
use anyhow::Result;
use async_trait::async_trait;
use std::fmt;

/// Fully qualified BigQuery table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableReference {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
}

impl TableReference {
    pub fn new(
        project_id: impl Into<String>,
        dataset_id: impl Into<String>,
        table_id: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            dataset_id: dataset_id.into(),
            table_id: table_id.into(),
        }
    }
}

impl fmt::Display for TableReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}.{}", self.project_id, self.dataset_id, self.table_id)
    }
}

/// Everything needed to submit one load job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadSpec {
    pub table: TableReference,
    pub staged: StagedLocation,
    /// Replace the table's contents instead of appending
    pub overwrite: bool,
    pub schema: DestinationSchema,
}

/// Operations the migration needs from the destination warehouse
#[async_trait]
pub trait DestinationWarehouse: Send + Sync {
    async fn dataset_exists(&self, project_id: &str, dataset: &str) -> Result<bool>;

    /// Submit a load job; the returned handle resolves when the job finishes
    async fn load_table(&self, spec: LoadSpec) -> Result<LoadHandle>;
}
