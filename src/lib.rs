// ABOUTME: Library module for bqshift
// ABOUTME: Exports the migration pipeline and its warehouse/storage collaborators

pub mod bigquery;
pub mod commands;
pub mod config;
pub mod error;
pub mod migration;
pub mod redshift;
pub mod schema;
pub mod storage;
pub mod utils;

pub use error::{MigrationError, Stage};
pub use migration::{LoadState, Phase, ShiftOptions, ShiftOutcome, Shifter};
