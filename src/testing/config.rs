//! Test scenario configuration types
//!
//! Defines the data structures for deserializing YAML test scenarios.
//! Any string in a step may use `${NAMESPACE}`, which expands to the test
//! case's namespace.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::check::{Check, Comparator, Query};
use crate::cluster::Scope;
use crate::resources::ResourceSpec;

/// Placeholder for the test case's namespace
pub const NAMESPACE_VAR: &str = "${NAMESPACE}";

/// A complete test scenario loaded from a YAML file
#[derive(Deserialize, Debug)]
pub struct TestScenario {
    /// Name of the test scenario; also keys the tracker list
    pub name: String,
    /// Optional description of what the test verifies
    pub description: Option<String>,
    /// Namespace to run in; a fresh `olm-e2e-xxxxx` name when absent
    pub namespace: Option<String>,
    /// Create the namespace as a project before the first step
    #[serde(default = "default_true")]
    pub create_namespace: bool,
    /// Template directory, relative to the scenario file
    pub templates: Option<PathBuf>,
    /// Optional setup steps to run before the test
    pub setup: Option<Vec<SetupStep>>,
    /// The sequence of test steps to execute
    pub steps: Vec<TestStep>,
}

fn default_true() -> bool {
    true
}

/// A setup step that runs before the test
#[derive(Deserialize, Debug)]
pub struct SetupStep {
    /// Shell command to execute
    pub shell: String,
}

/// A single test step in the execution flow
#[derive(Deserialize, Debug)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TestStep {
    /// Create a resource and wait for its readiness signal
    Create { resource: ResourceSpec },
    /// Create a resource without waiting
    CreateWithoutCheck { resource: ResourceSpec },
    /// Delete a resource created by an earlier step
    Delete { name: String },
    /// Poll until a single check holds
    Check(CheckSpec),
    /// Poll a set of checks concurrently
    CheckList { checks: Vec<CheckSpec> },
    /// Approve the InstallPlan a subscription currently references
    Approve { subscription: String },
    /// Approve the plan installing `csv` and wait for it to reach `phase`
    ApproveSpecificIp {
        subscription: String,
        csv: String,
        #[serde(default = "default_ip_phase")]
        phase: String,
    },
    /// Wait until a subscription reports `csv` as installed
    ExpectCsv { subscription: String, csv: String },
    /// Merge-patch an object
    Patch {
        kind: String,
        name: String,
        namespace: Option<String>,
        #[serde(default)]
        scope: Scope,
        patch: serde_json::Value,
    },
    /// Run a shell command; `NAMESPACE` is exported to it
    Shell {
        command: String,
        #[serde(default)]
        expect_failure: bool,
    },
}

fn default_ip_phase() -> String {
    "Complete".to_string()
}

impl TestStep {
    /// Short label for progress output
    pub fn label(&self) -> String {
        match self {
            TestStep::Create { resource } | TestStep::CreateWithoutCheck { resource } => {
                format!("create {}", resource.descriptor().reference())
            }
            TestStep::Delete { name } => format!("delete {}", name),
            TestStep::Check(check) => format!("check {}", check.query.join(" ")),
            TestStep::CheckList { checks } => format!("check {} conditions", checks.len()),
            TestStep::Approve { subscription } => format!("approve {}", subscription),
            TestStep::ApproveSpecificIp { subscription, csv, .. } => {
                format!("approve {} for {}", subscription, csv)
            }
            TestStep::ExpectCsv { subscription, csv } => format!("expect {} on {}", csv, subscription),
            TestStep::Patch { kind, name, .. } => format!("patch {}/{}", kind, name),
            TestStep::Shell { command, .. } => format!("$ {}", command),
        }
    }
}

/// A polling assertion as written in a scenario
#[derive(Deserialize, Debug, Clone)]
pub struct CheckSpec {
    pub comparator: Comparator,
    /// Alternatives joined by `+2+`
    #[serde(default)]
    pub expected: String,
    /// `get` arguments, e.g. `[csv, etcd.v1, -o=jsonpath={.status.phase}]`
    pub query: Vec<String>,
    #[serde(default)]
    pub scope: Scope,
    /// Append `-n <test namespace>` to the query
    #[serde(default)]
    pub with_namespace: bool,
    pub interval_secs: Option<u64>,
    pub timeout_secs: Option<u64>,
}

impl CheckSpec {
    /// Build the check, expanding `${NAMESPACE}`
    pub fn to_check(&self, namespace: &str) -> Check {
        let query = Query::new(self.query.iter().map(|a| expand(a, namespace)));
        let mut check = Check::new(self.comparator, expand(&self.expected, namespace), query);
        check.scope = self.scope;
        if self.with_namespace {
            check = check.with_namespace();
        }
        if let Some(secs) = self.interval_secs {
            check = check.interval(Duration::from_secs(secs));
        }
        if let Some(secs) = self.timeout_secs {
            check = check.timeout(Duration::from_secs(secs));
        }
        check
    }
}

/// Replace `${NAMESPACE}` in `text`
pub fn expand(text: &str, namespace: &str) -> String {
    text.replace(NAMESPACE_VAR, namespace)
}
