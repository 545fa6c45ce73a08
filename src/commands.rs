//! CLI command definitions
//!
//! Defines the clap commands for the scenario CLI.

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run a scenario script against its target
    Run {
        /// Path to the script (.yaml, .yml or .json)
        script: PathBuf,

        /// Only run the scenario with this name
        #[arg(long, short)]
        scenario: Option<String>,

        /// Number of concurrent runs, spread round-robin over the scenarios
        #[arg(long, short = 'n', default_value = "1")]
        runs: usize,

        /// Override the script's target host
        #[arg(long)]
        target: Option<String>,

        /// Override the script's TCP port
        #[arg(long, short)]
        port: Option<u16>,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Load and compile a script without connecting
    Check {
        /// Path to the script (.yaml, .yml or .json)
        script: PathBuf,
    },

    /// Show the settings file location and effective settings
    Config,
}
