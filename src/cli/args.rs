//! CLI argument definitions using clap
//!
//! Commands:
//! - datagap check-config --config <path>
//! - datagap gaps --state <path>
//! - datagap route --config <path> --state <path> [--context <path>] [--passes <n>]
//! - datagap repair --config <path> --state <path>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// datagap - gap detection for change routing
#[derive(Parser, Debug)]
#[command(name = "datagap")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Minimum log severity (trace, info, warn, error, fatal)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Validate a configuration file and print the effective values
    CheckConfig {
        /// Path to configuration file
        #[arg(long, default_value = "./datagap.json")]
        config: PathBuf,
    },

    /// Print the persisted gap table of a state file
    Gaps {
        /// Path to state file
        #[arg(long)]
        state: PathBuf,
    },

    /// Run routing passes over a state file and persist the result
    Route {
        /// Path to configuration file
        #[arg(long, default_value = "./datagap.json")]
        config: PathBuf,

        /// Path to state file
        #[arg(long)]
        state: PathBuf,

        /// Shared context file for cluster flags
        #[arg(long)]
        context: Option<PathBuf>,

        /// Number of passes to run
        #[arg(long, default_value_t = 1)]
        passes: u32,
    },

    /// Repair overlapping and stray gaps in a state file
    Repair {
        /// Path to configuration file
        #[arg(long, default_value = "./datagap.json")]
        config: PathBuf,

        /// Path to state file
        #[arg(long)]
        state: PathBuf,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
