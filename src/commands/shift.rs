// ABOUTME: Shift command: migrates one Redshift table into BigQuery
// ABOUTME: Wires the real Redshift, staging and BigQuery clients into the Shifter

use crate::bigquery::BigQueryClient;
use crate::config::{self, Configuration, DestinationConfig};
use crate::migration::{format_bytes, LoadState, Phase, ShiftOptions, ShiftOutcome, Shifter};
use crate::redshift::{RedshiftClient, SourceTable};
use crate::schema::SchemaTranslator;
use crate::storage::CloudStagingProvider;
use anyhow::{bail, Context, Result};
use dialoguer::{theme::ColorfulTheme, Confirm};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Migrate a single Redshift table into BigQuery
///
/// Reads credentials from `config_path`, then unloads `table` to S3, copies
/// the files to Cloud Storage and loads them into the destination dataset.
///
/// # Arguments
///
/// * `config_path` - TOML credentials file
/// * `table` - Source table as `table` or `schema.table`
/// * `destination` - BigQuery project, dataset and optional table name
/// * `options` - Overwrite and wait behaviour
/// * `where_clause` - Optional predicate restricting the unloaded rows
/// * `skip_confirmation` - Don't prompt before overwriting the destination
///
/// # Errors
///
/// Returns an error if the configuration is invalid, the user declines the
/// overwrite prompt, or any migration stage fails.
///
/// # Examples
///
/// ```no_run
/// # use anyhow::Result;
/// # use bqshift::commands::shift;
/// # use bqshift::config::DestinationConfig;
/// # use bqshift::ShiftOptions;
/// # use std::path::Path;
/// # async fn example() -> Result<()> {
/// let options = ShiftOptions { overwrite: false, wait_for_load: true };
/// shift(
///     Path::new("bqshift.toml"),
///     "public.users",
///     DestinationConfig::new("acme-prod", "analytics"),
///     options,
///     None,
///     true,
/// )
/// .await?;
/// # Ok(())
/// # }
/// ```
pub async fn shift(
    config_path: &Path,
    table: &str,
    destination: DestinationConfig,
    options: ShiftOptions,
    where_clause: Option<&str>,
    skip_confirmation: bool,
) -> Result<()> {
    let table = SourceTable::parse(table)?;
    let config = config::load_config(config_path)?;

    if options.overwrite && !skip_confirmation && !confirm_overwrite(&table, &destination)? {
        bail!("Migration cancelled by user");
    }

    let shifter = build_shifter(&config, where_clause, options).await?;

    let spinner = ProgressBar::new_spinner();
    let shifter = if options.wait_for_load {
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg} [{elapsed}]")
                .context("Invalid spinner template")?,
        );
        let observed = spinner.clone();
        shifter.with_observer(move |phase| match phase {
            Phase::Submitted => {
                observed.set_message("Waiting for BigQuery load job...");
                observed.enable_steady_tick(Duration::from_millis(120));
            }
            Phase::Done | Phase::Failed(_) => observed.finish_and_clear(),
            _ => {}
        })
    } else {
        shifter
    };

    let outcome = shifter.run(&table, &destination).await?;
    spinner.finish_and_clear();
    print_summary(&outcome);
    Ok(())
}

async fn build_shifter(
    config: &Configuration,
    where_clause: Option<&str>,
    options: ShiftOptions,
) -> Result<Shifter> {
    let mut source = RedshiftClient::connect(&config.redshift, config.s3.clone())
        .await
        .context("Failed to connect to Redshift")?;
    if let Some(predicate) = where_clause {
        source = source.with_where_clause(predicate);
    }

    let mut bigquery = BigQueryClient::new()
        .await
        .context("Failed to resolve BigQuery credentials")?
        .with_poll_interval(config.bigquery.poll_interval());
    if let Some(endpoint) = &config.bigquery.endpoint {
        bigquery = bigquery.with_endpoint(endpoint);
    }

    let staging = CloudStagingProvider::new(config.s3.clone(), config.gcs.clone());
    let translator = SchemaTranslator::new(config.type_mapping()?);

    Ok(Shifter::new(
        Arc::new(source),
        Arc::new(bigquery),
        Arc::new(staging),
        translator,
        options,
    ))
}

fn confirm_overwrite(table: &SourceTable, destination: &DestinationConfig) -> Result<bool> {
    let target = destination.table.as_deref().unwrap_or(&table.name);
    Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!(
            "Replace all rows in {}:{}.{} with {}?",
            destination.project_id, destination.dataset, target, table
        ))
        .default(false)
        .interact()
        .context("Failed to get confirmation")
}

fn print_summary(outcome: &ShiftOutcome) {
    println!();
    println!("Destination: {}", outcome.table);
    println!("Columns:     {}", outcome.columns);
    println!(
        "Staged:      {} ({} object(s), {})",
        outcome.staged.source_uri(),
        outcome.staged.objects,
        format_bytes(outcome.staged.bytes)
    );
    match &outcome.load {
        LoadState::Completed { job_id } => println!("Load job:    {} (done)", job_id),
        LoadState::Submitted(handle) => {
            println!("Load job:    {} (running)", handle.job_id());
            println!();
            println!(
                "Track it with: bq show -j {} --project_id={}",
                handle.job_id(),
                outcome.table.project_id
            );
        }
    }
    println!();
}
