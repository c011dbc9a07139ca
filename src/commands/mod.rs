// ABOUTME: Command implementations for the bqshift CLI
// ABOUTME: Exports the shift and validate commands

pub mod shift;
pub mod validate;

pub use shift::shift;
pub use validate::validate;
