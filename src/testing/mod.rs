//! Scenario runner
//!
//! Reads YAML test scenarios and executes their steps against the cluster
//! through the same descriptors and checks the library exposes, so a
//! scenario exercises exactly what a Rust test would.

mod config;
mod runner;

pub use config::*;
pub use runner::{load_scenario, run_scenario, run_with_client, TestResult};
