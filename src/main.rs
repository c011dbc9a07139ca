// ABOUTME: CLI entry point for bqshift
// ABOUTME: Parses commands and routes to appropriate handlers

use bqshift::commands;
use bqshift::config::DestinationConfig;
use bqshift::ShiftOptions;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "bqshift")]
#[command(about = "Move a Redshift table into BigQuery via S3 and Cloud Storage", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct DestinationArgs {
    /// BigQuery project that owns the destination dataset
    #[arg(long)]
    project: String,
    /// Existing BigQuery dataset to load into
    #[arg(long)]
    dataset: String,
    /// Path to the TOML credentials file
    #[arg(long, env = "BQSHIFT_CONFIG")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Migrate one Redshift table into BigQuery
    Shift {
        /// Source table as `table` or `schema.table`
        table: String,
        #[command(flatten)]
        destination: DestinationArgs,
        /// Destination table name (defaults to the source table name)
        #[arg(long)]
        destination_table: Option<String>,
        /// Replace the destination table's rows instead of appending
        #[arg(long)]
        overwrite: bool,
        /// Return once the load job is submitted instead of waiting for it
        #[arg(long)]
        no_wait: bool,
        /// Only unload rows matching this SQL predicate
        #[arg(long = "where")]
        where_clause: Option<String>,
        /// Skip confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },
    /// Check Redshift, BigQuery and staging are ready for a migration
    Validate {
        #[command(flatten)]
        destination: DestinationArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging - default to INFO level if RUST_LOG not set
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Shift {
            table,
            destination,
            destination_table,
            overwrite,
            no_wait,
            where_clause,
            yes,
        } => {
            let mut target = DestinationConfig::new(destination.project, destination.dataset);
            if let Some(name) = destination_table {
                target = target.with_table(name);
            }
            // Waiting is the default; --no-wait opts out
            let options = ShiftOptions {
                overwrite,
                wait_for_load: !no_wait,
            };
            commands::shift(
                &destination.config,
                &table,
                target,
                options,
                where_clause.as_deref(),
                yes,
            )
            .await
        }
        Commands::Validate { destination } => {
            let target = DestinationConfig::new(destination.project, destination.dataset);
            commands::validate(&destination.config, &target).await
        }
    }
}
