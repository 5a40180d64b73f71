//! Command-line interface for impl-forge.
//!
//! Provides the `generate` and `check` commands.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, RunReport};
