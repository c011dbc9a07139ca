// ABOUTME: Migration pipeline module
// ABOUTME: Sequences unload, staging, schema translation and load for one table

pub mod report;
pub mod shifter;

pub use report::{format_bytes, format_duration};
pub use shifter::{LoadState, Phase, ShiftOptions, ShiftOutcome, Shifter};
