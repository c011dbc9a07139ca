// ABOUTME: Redshift implementation of the source warehouse operations
// ABOUTME: Issues UNLOAD to S3 and reads column metadata from information_schema

use super::{connection, SourceTable, SourceWarehouse, UnloadFormat, UnloadResult};
use crate::config::{RedshiftConfig, S3Config};
use crate::schema::{SourceColumn, SourceSchema};
use crate::utils::{escape_literal, quote_identifier};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio_postgres::Client;

/// Upper bound Redshift uses when splitting unloaded part files
const MAX_PART_FILE_SIZE_MB: u32 = 256;

pub struct RedshiftClient {
    client: Client,
    s3: S3Config,
    where_clause: Option<String>,
}

impl RedshiftClient {
    /// Connect to the cluster described by `config`; unloads go to `s3`
    pub async fn connect(config: &RedshiftConfig, s3: S3Config) -> Result<Self> {
        let pg_config = config.connection_config()?;
        tracing::info!("Connecting to Redshift...");
        let client = connection::connect_with_retry(&pg_config).await?;
        tracing::info!("✓ Connected to Redshift");
        Ok(Self::from_client(client, s3))
    }

    pub fn from_client(client: Client, s3: S3Config) -> Self {
        Self {
            client,
            s3,
            where_clause: None,
        }
    }

    /// Only unload rows matching `predicate` (an SQL boolean expression)
    pub fn with_where_clause(mut self, predicate: impl Into<String>) -> Self {
        self.where_clause = Some(predicate.into());
        self
    }
}

/// Key prefix for one run's part files: `<base>/<schema.table>/<run id>/part_`
///
/// Slashes around `base` are dropped and an empty `base` adds no segment, so
/// keys never start with `/`.
fn unload_prefix(base: &str, table: &SourceTable, run_id: &str) -> String {
    let base = base.trim_matches('/');
    if base.is_empty() {
        format!("{}/{}/part_", table, run_id)
    } else {
        format!("{}/{}/{}/part_", base, table, run_id)
    }
}

/// `<unix seconds>-<6 random chars>`, unique per run
fn new_run_id() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    format!("{}-{}", secs, suffix.to_ascii_lowercase())
}

/// Build the UNLOAD statement for `table`
///
/// The inner SELECT is a string literal, so it is escaped as a whole.
pub fn unload_statement(
    table: &SourceTable,
    where_clause: Option<&str>,
    destination: &str,
    credentials: &str,
    format: &UnloadFormat,
) -> String {
    let mut select = format!(
        "SELECT * FROM {}.{}",
        quote_identifier(&table.schema),
        quote_identifier(&table.name)
    );
    if let Some(predicate) = where_clause {
        select.push_str(" WHERE ");
        select.push_str(predicate);
    }

    let mut statement = format!(
        "UNLOAD ('{}') TO '{}' CREDENTIALS '{}' FORMAT AS CSV DELIMITER AS '{}' NULL AS '{}'",
        escape_literal(&select),
        escape_literal(destination),
        escape_literal(credentials),
        escape_literal(&format.delimiter.to_string()),
        escape_literal(&format.null_marker),
    );
    if format.gzip {
        statement.push_str(" GZIP");
    }
    statement.push_str(&format!(
        " ALLOWOVERWRITE MAXFILESIZE {} MB",
        MAX_PART_FILE_SIZE_MB
    ));
    statement
}

#[async_trait]
impl SourceWarehouse for RedshiftClient {
    async fn unload(&self, table: &SourceTable) -> Result<UnloadResult> {
        let run_id = new_run_id();
        let prefix = unload_prefix(&self.s3.prefix, table, &run_id);
        let format = UnloadFormat::default();
        let destination = format!("s3://{}/{}", self.s3.bucket, prefix);

        tracing::debug!("Unloading {} to {}", table, destination);
        let statement = unload_statement(
            table,
            self.where_clause.as_deref(),
            &destination,
            &self.s3.unload_credentials(),
            &format,
        );

        self.client
            .batch_execute(&statement)
            .await
            .with_context(|| format!("UNLOAD of {} failed", table))?;

        Ok(UnloadResult {
            bucket: self.s3.bucket.clone(),
            prefix,
            format,
        })
    }

    async fn extract_schema(&self, table: &SourceTable) -> Result<SourceSchema> {
        let rows = self
            .client
            .query(
                "SELECT column_name::text, data_type::text, is_nullable::text
                 FROM information_schema.columns
                 WHERE table_schema = $1 AND table_name = $2
                 ORDER BY ordinal_position",
                &[&table.schema, &table.name],
            )
            .await
            .with_context(|| format!("Failed to read columns of {}", table))?;

        if rows.is_empty() {
            bail!("Table {} not found or has no visible columns", table);
        }

        let columns = rows
            .iter()
            .map(|row| {
                let is_nullable: String = row.get(2);
                SourceColumn::new(
                    row.get::<_, String>(0),
                    row.get::<_, String>(1),
                    is_nullable.eq_ignore_ascii_case("YES"),
                )
            })
            .collect();

        Ok(SourceSchema::new(columns))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unload_statement_shape() {
        let table = SourceTable::new("public", "users");
        let sql = unload_statement(
            &table,
            None,
            "s3://acme-unload/bqshift/public.users/1-abc/part_",
            "aws_access_key_id=AK;aws_secret_access_key=SK",
            &UnloadFormat::default(),
        );

        assert_eq!(
            sql,
            "UNLOAD ('SELECT * FROM \"public\".\"users\"') \
             TO 's3://acme-unload/bqshift/public.users/1-abc/part_' \
             CREDENTIALS 'aws_access_key_id=AK;aws_secret_access_key=SK' \
             FORMAT AS CSV DELIMITER AS ',' NULL AS '' GZIP ALLOWOVERWRITE MAXFILESIZE 256 MB"
        );
    }

    #[test]
    fn test_unload_statement_escapes_where_clause() {
        let table = SourceTable::new("sales", "orders");
        let sql = unload_statement(
            &table,
            Some("status = 'open'"),
            "s3://b/p",
            "creds",
            &UnloadFormat::default(),
        );

        assert!(sql.starts_with(
            "UNLOAD ('SELECT * FROM \"sales\".\"orders\" WHERE status = ''open''')"
        ));
    }

    #[test]
    fn test_unload_statement_without_gzip() {
        let format = UnloadFormat {
            gzip: false,
            ..UnloadFormat::default()
        };
        let sql = unload_statement(
            &SourceTable::new("public", "t"),
            None,
            "s3://b/p",
            "c",
            &format,
        );
        assert!(!sql.contains("GZIP"));
    }

    #[test]
    fn test_unload_prefix_layout() {
        let table = SourceTable::new("public", "users");
        assert_eq!(
            unload_prefix("bqshift", &table, "1-abc"),
            "bqshift/public.users/1-abc/part_"
        );
        assert_eq!(
            unload_prefix("/exports/bqshift/", &table, "1-abc"),
            "exports/bqshift/public.users/1-abc/part_"
        );
    }

    #[test]
    fn test_unload_prefix_without_base_has_no_leading_slash() {
        let table = SourceTable::new("public", "users");
        assert_eq!(unload_prefix("", &table, "1-abc"), "public.users/1-abc/part_");
        assert_eq!(unload_prefix("/", &table, "1-abc"), "public.users/1-abc/part_");
    }

    #[test]
    fn test_run_ids_are_distinct() {
        let a = new_run_id();
        let b = new_run_id();
        assert_ne!(a, b);
        assert!(a.contains('-'));
    }

    #[tokio::test]
    #[ignore]
    async fn test_extract_schema_from_live_cluster() {
        let url = std::env::var("TEST_REDSHIFT_URL").unwrap();
        let table = std::env::var("TEST_REDSHIFT_TABLE").unwrap();
        let client = connection::connect(&url.parse().unwrap()).await.unwrap();
        let s3 = S3Config {
            bucket: "unused".to_string(),
            prefix: "bqshift".to_string(),
            region: "us-east-1".to_string(),
            access_key_id: String::new(),
            secret_access_key: String::new(),
            session_token: None,
            endpoint: None,
        };

        let redshift = RedshiftClient::from_client(client, s3);
        let schema = redshift
            .extract_schema(&SourceTable::parse(&table).unwrap())
            .await
            .unwrap();

        assert!(!schema.is_empty());
        for column in schema.columns() {
            println!("  - {} {} (nullable: {})", column.name, column.data_type, column.nullable);
        }
    }
}
