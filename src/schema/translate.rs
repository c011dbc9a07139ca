// ABOUTME: Redshift to BigQuery column type translation
// ABOUTME: Positional, name- and nullability-preserving mapping over an immutable type table

use super::{BigQueryType, DestinationColumn, DestinationSchema, SourceSchema};
use std::collections::HashMap;
use thiserror::Error;

/// Raised when a source column has a type with no BigQuery equivalent
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("column '{column}' has unsupported type '{source_type}'")]
pub struct TranslationError {
    pub column: String,
    pub source_type: String,
}

/// Immutable lookup from normalized Redshift type names to BigQuery types
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeMapping {
    types: HashMap<String, BigQueryType>,
}

impl TypeMapping {
    /// Build a mapping from `(redshift type, bigquery type)` pairs
    ///
    /// Keys are normalized the same way column types are at lookup time, so
    /// `"VARCHAR(64)"` and `"varchar"` name the same entry.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, BigQueryType)>,
        S: AsRef<str>,
    {
        let types = pairs
            .into_iter()
            .map(|(name, ty)| (normalize_type(name.as_ref()), ty))
            .collect();
        Self { types }
    }

    /// The mapping used for Redshift tables unless overridden
    pub fn redshift_to_bigquery() -> Self {
        use BigQueryType::*;

        Self::from_pairs([
            ("smallint", Int64),
            ("int2", Int64),
            ("integer", Int64),
            ("int", Int64),
            ("int4", Int64),
            ("bigint", Int64),
            ("int8", Int64),
            ("real", Float64),
            ("float4", Float64),
            ("double precision", Float64),
            ("float8", Float64),
            ("float", Float64),
            ("numeric", Numeric),
            ("decimal", Numeric),
            ("boolean", Bool),
            ("bool", Bool),
            ("char", String),
            ("character", String),
            ("nchar", String),
            ("bpchar", String),
            ("varchar", String),
            ("character varying", String),
            ("nvarchar", String),
            ("text", String),
            ("date", Date),
            ("timestamp", Timestamp),
            ("timestamp without time zone", Timestamp),
            ("timestamptz", Timestamp),
            ("timestamp with time zone", Timestamp),
            ("time", Time),
            ("time without time zone", Time),
            ("timetz", Time),
            ("time with time zone", Time),
        ])
    }

    /// Return a new mapping with `overrides` layered on top of this one
    pub fn with_overrides<I, S>(&self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (S, BigQueryType)>,
        S: AsRef<str>,
    {
        let mut types = self.types.clone();
        for (name, ty) in overrides {
            types.insert(normalize_type(name.as_ref()), ty);
        }
        Self { types }
    }

    pub fn lookup(&self, source_type: &str) -> Option<BigQueryType> {
        self.types.get(&normalize_type(source_type)).copied()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl Default for TypeMapping {
    fn default() -> Self {
        Self::redshift_to_bigquery()
    }
}

/// Lowercase, drop `(precision, scale)` parameters and collapse whitespace
fn normalize_type(source_type: &str) -> String {
    let base = match source_type.find('(') {
        Some(idx) => {
            // `timestamp(6) with time zone` keeps the suffix after the parameters
            let rest = source_type[idx..]
                .find(')')
                .map(|end| &source_type[idx + end + 1..])
                .unwrap_or("");
            format!("{} {}", &source_type[..idx], rest)
        }
        None => source_type.to_string(),
    };

    base.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase()
}

/// Maps a Redshift schema onto BigQuery column definitions
#[derive(Debug, Clone, Default)]
pub struct SchemaTranslator {
    mapping: TypeMapping,
}

impl SchemaTranslator {
    pub fn new(mapping: TypeMapping) -> Self {
        Self { mapping }
    }

    /// Translate every column, keeping name, nullability and position
    ///
    /// # Errors
    ///
    /// Fails on the first column whose type is not in the mapping. No partial
    /// schema is returned in that case.
    pub fn translate(&self, source: &SourceSchema) -> Result<DestinationSchema, TranslationError> {
        let columns = source
            .columns()
            .iter()
            .map(|column| {
                let data_type =
                    self.mapping
                        .lookup(&column.data_type)
                        .ok_or_else(|| TranslationError {
                            column: column.name.clone(),
                            source_type: column.data_type.clone(),
                        })?;
                Ok(DestinationColumn::new(
                    column.name.clone(),
                    data_type,
                    column.nullable,
                ))
            })
            .collect::<Result<Vec<_>, TranslationError>>()?;

        Ok(DestinationSchema::new(columns))
    }
}
