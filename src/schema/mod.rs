// ABOUTME: Column metadata for both warehouses and the translation between them
// ABOUTME: Source schemas come from Redshift, destination schemas feed BigQuery loads

pub mod translate;

pub use translate::{SchemaTranslator, TranslationError, TypeMapping};

use std::fmt;

/// A single Redshift column as reported by the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceColumn {
    pub name: String,
    /// Native type name, e.g. `character varying(256)`
    pub data_type: String,
    pub nullable: bool,
}

impl SourceColumn {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable,
        }
    }
}

/// Ordered column list of a Redshift table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceSchema {
    columns: Vec<SourceColumn>,
}

impl SourceSchema {
    pub fn new(columns: Vec<SourceColumn>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[SourceColumn] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// BigQuery standard SQL column types that Redshift columns can land in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BigQueryType {
    Int64,
    Float64,
    Numeric,
    Bignumeric,
    Bool,
    String,
    Bytes,
    Date,
    Datetime,
    Time,
    Timestamp,
    Geography,
    Json,
}

impl BigQueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BigQueryType::Int64 => "INT64",
            BigQueryType::Float64 => "FLOAT64",
            BigQueryType::Numeric => "NUMERIC",
            BigQueryType::Bignumeric => "BIGNUMERIC",
            BigQueryType::Bool => "BOOL",
            BigQueryType::String => "STRING",
            BigQueryType::Bytes => "BYTES",
            BigQueryType::Date => "DATE",
            BigQueryType::Datetime => "DATETIME",
            BigQueryType::Time => "TIME",
            BigQueryType::Timestamp => "TIMESTAMP",
            BigQueryType::Geography => "GEOGRAPHY",
            BigQueryType::Json => "JSON",
        }
    }
}

impl fmt::Display for BigQueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BigQueryType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ty = match s.trim().to_ascii_uppercase().as_str() {
            "INT64" | "INTEGER" => BigQueryType::Int64,
            "FLOAT64" | "FLOAT" => BigQueryType::Float64,
            "NUMERIC" => BigQueryType::Numeric,
            "BIGNUMERIC" => BigQueryType::Bignumeric,
            "BOOL" | "BOOLEAN" => BigQueryType::Bool,
            "STRING" => BigQueryType::String,
            "BYTES" => BigQueryType::Bytes,
            "DATE" => BigQueryType::Date,
            "DATETIME" => BigQueryType::Datetime,
            "TIME" => BigQueryType::Time,
            "TIMESTAMP" => BigQueryType::Timestamp,
            "GEOGRAPHY" => BigQueryType::Geography,
            "JSON" => BigQueryType::Json,
            other => anyhow::bail!("Unknown BigQuery type '{}'", other),
        };
        Ok(ty)
    }
}

/// A single BigQuery column produced by translation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationColumn {
    pub name: String,
    pub data_type: BigQueryType,
    pub nullable: bool,
}

impl DestinationColumn {
    pub fn new(name: impl Into<String>, data_type: BigQueryType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
        }
    }
}

/// Ordered column list for a BigQuery load, positionally aligned with its source schema
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DestinationSchema {
    columns: Vec<DestinationColumn>,
}

impl DestinationSchema {
    pub(crate) fn new(columns: Vec<DestinationColumn>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[DestinationColumn] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}
