// ABOUTME: Redshift connection utilities over the PostgreSQL wire protocol
// ABOUTME: Handles TLS setup, error classification and connection retries

use crate::utils;
use anyhow::{Context, Result};
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use std::time::Duration;
use tokio_postgres::{Client, Config};

/// Connect to a Redshift cluster with TLS
pub async fn connect(config: &Config) -> Result<Client> {
    let tls_connector = TlsConnector::builder()
        .danger_accept_invalid_certs(false)
        .build()
        .context("Failed to build TLS connector")?;
    let tls = MakeTlsConnector::new(tls_connector);

    let (client, connection) = config
        .connect(tls)
        .await
        .map_err(|e| describe_connect_error(&e.to_string()))?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!("Redshift connection error: {}", e);
        }
    });

    Ok(client)
}

fn describe_connect_error(error_msg: &str) -> anyhow::Error {
    if error_msg.contains("password authentication failed") {
        anyhow::anyhow!(
            "Authentication failed: Invalid username or password.\n\
             Please verify the [redshift] credentials."
        )
    } else if error_msg.contains("database") && error_msg.contains("does not exist") {
        anyhow::anyhow!(
            "Database does not exist: {}\n\
             Check the database name in the [redshift] section.",
            error_msg
        )
    } else if error_msg.contains("Connection refused") || error_msg.contains("could not connect")
    {
        anyhow::anyhow!(
            "Connection refused: Unable to reach the Redshift cluster.\n\
             Please check:\n\
             - The host and port are correct (Redshift listens on 5439 by default)\n\
             - The cluster is publicly accessible or reachable from this network\n\
             - The cluster security group allows inbound connections\n\
             Error: {}",
            error_msg
        )
    } else if error_msg.contains("timeout") || error_msg.contains("timed out") {
        anyhow::anyhow!(
            "Connection timeout: Redshift did not respond in time.\n\
             Error: {}",
            error_msg
        )
    } else if error_msg.contains("SSL") || error_msg.contains("TLS") {
        anyhow::anyhow!(
            "TLS/SSL error: Failed to establish secure connection.\n\
             Error: {}",
            error_msg
        )
    } else {
        anyhow::anyhow!("Failed to connect to Redshift: {}", error_msg)
    }
}

/// Connect with automatic retry for transient failures
pub async fn connect_with_retry(config: &Config) -> Result<Client> {
    utils::retry_with_backoff(
        || connect(config),
        3,
        Duration::from_secs(1),
    )
    .await
    .context("Failed to connect to Redshift after retries")
}
