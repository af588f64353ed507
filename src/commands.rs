//! CLI command definitions
//!
//! Defines the clap commands for the olmtest CLI.

use clap::{Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Execute test scenarios defined in YAML files
    Run {
        /// Paths to YAML test scenario files
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Verbose output
        #[arg(long, short)]
        verbose: bool,

        /// Keep going after a failed scenario
        #[arg(long)]
        keep_going: bool,
    },

    /// Poll a single condition until it holds or times out
    Check {
        /// How to compare the query output with the expectation
        #[arg(long, value_enum, default_value = "compare")]
        comparator: ComparatorArg,

        /// Expected value; alternatives are joined with +2+
        #[arg(long, default_value = "")]
        expected: String,

        /// Namespace appended to the query
        #[arg(long, short)]
        namespace: Option<String>,

        /// Run the query with the user kubeconfig
        #[arg(long)]
        as_user: bool,

        /// Timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Arguments for `oc get`
        #[arg(last = true, required = true)]
        query: Vec<String>,
    },

    /// Print the effective configuration
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ComparatorArg {
    Compare,
    NotCompare,
    Contain,
    NotContain,
    Present,
    NotPresent,
}
