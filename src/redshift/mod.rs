// ABOUTME: Source warehouse side of a migration
// ABOUTME: Table naming, unload results and the Redshift client

pub mod client;
pub mod connection;

pub use client::RedshiftClient;
pub use connection::{connect, connect_with_retry};

use crate::schema::SourceSchema;
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::fmt;

/// A Redshift table, `schema.table` or a bare table in `public`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceTable {
    pub schema: String,
    pub name: String,
}

impl SourceTable {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Parse `table` or `schema.table`
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let (schema, name) = match input.split_once('.') {
            Some((schema, name)) => (schema, name),
            None => ("public", input),
        };

        if schema.is_empty() || name.is_empty() || name.contains('.') {
            bail!(
                "Invalid table name '{}'. Expected 'table' or 'schema.table'",
                crate::utils::sanitize_identifier(input)
            );
        }

        Ok(Self::new(schema, name))
    }
}

impl fmt::Display for SourceTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Layout of the files an UNLOAD wrote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnloadFormat {
    pub delimiter: char,
    pub gzip: bool,
    /// Text written for NULL values
    pub null_marker: String,
}

impl Default for UnloadFormat {
    fn default() -> Self {
        Self {
            delimiter: ',',
            gzip: true,
            null_marker: String::new(),
        }
    }
}

/// Where an UNLOAD put a table's data in S3
///
/// Not `Clone`: it is handed to the staging client exactly once.
#[derive(Debug, PartialEq, Eq)]
pub struct UnloadResult {
    pub bucket: String,
    /// Key prefix shared by every unloaded part file
    pub prefix: String,
    pub format: UnloadFormat,
}

impl UnloadResult {
    pub fn url(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.prefix)
    }
}

/// Operations the migration needs from the source warehouse
#[async_trait]
pub trait SourceWarehouse: Send + Sync {
    /// Export the table's rows to S3
    async fn unload(&self, table: &SourceTable) -> Result<UnloadResult>;

    /// Read the table's columns in declaration order
    async fn extract_schema(&self, table: &SourceTable) -> Result<SourceSchema>;
}
