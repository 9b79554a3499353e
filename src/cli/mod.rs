//! Command-line interface definitions.
//!
//! Provides CLI structure and output formatting:
//! - `Cli`, `Commands`: argument definitions via clap
//! - `Display`: formatted terminal output with colors

mod commands;
mod display;

pub use commands::{Cli, Commands, OutputFormat, StatusArg};
pub use display::Display;
