//! CLI module for datagap
//!
//! Provides command-line interface for:
//! - check-config: Validate a configuration file
//! - gaps: Print the persisted gap table
//! - route: Run routing passes over a state file
//! - repair: Repair overlapping gaps in a state file

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{check_config, gaps, repair, route, run, run_command};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{write_error, write_response};
