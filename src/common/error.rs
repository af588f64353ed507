//! Error types for the OLM harness
//!
//! Messages carry the last observed cluster state wherever there is one, so a
//! failed run can be diagnosed without re-running it.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the harness
#[derive(Error, Debug)]
pub enum Error {
    // === Cluster CLI Errors ===
    #[error("'{command}' exited with {code:?}: {stderr}")]
    Cli {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Failed to spawn cluster CLI '{binary}': {source}")]
    CliSpawn {
        binary: String,
        #[source]
        source: io::Error,
    },

    #[error("Cluster CLI not found. Set [cli] binary in the config file or OLMTEST_OC")]
    CliNotFound,

    // === Manifest Errors ===
    #[error("Failed to render template '{template}': {message}")]
    TemplateRender { template: String, message: String },

    #[error("Failed to apply manifest rendered from '{template}': {message}")]
    Apply { template: String, message: String },

    #[error("{kind} '{name}' not found")]
    NotFound { kind: String, name: String },

    // === Wait Errors ===
    #[error("{what} did not happen within {secs} seconds (last observed: {last})")]
    Timeout { what: String, secs: u64, last: String },

    // === Assertion Errors ===
    #[error("Check failed: {description}; last observed: '{last}'")]
    CheckFailed { description: String, last: String },

    #[error("{} of the listed checks failed:\n  {}", .0.len(), .0.join("\n  "))]
    CheckListFailed(Vec<String>),

    #[error("InstallPlan '{name}' in '{namespace}' reached phase Failed: {message}")]
    InstallPlanFailed {
        name: String,
        namespace: String,
        message: String,
    },

    #[error("CSV '{name}' in '{namespace}' reached phase {phase}: {message}")]
    CsvFailed {
        name: String,
        namespace: String,
        phase: String,
        message: String,
    },

    #[error("Test assertion failed: {0}")]
    TestAssertion(String),

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a template render error
    pub fn template_render(template: &str, message: impl Into<String>) -> Self {
        Self::TemplateRender {
            template: template.to_string(),
            message: message.into(),
        }
    }

    /// Create a timeout error carrying the last observed value
    pub fn timeout(what: impl Into<String>, secs: u64, last: impl Into<String>) -> Self {
        Self::Timeout {
            what: what.into(),
            secs,
            last: last.into(),
        }
    }

    /// Create a check failure
    pub fn check_failed(description: impl Into<String>, last: impl Into<String>) -> Self {
        Self::CheckFailed {
            description: description.into(),
            last: last.into(),
        }
    }

    /// Whether this error means the object does not exist on the cluster
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Cli { stderr, .. } => is_not_found_output(stderr),
            _ => false,
        }
    }
}

/// Recognise the CLI's "object is gone" messages
pub fn is_not_found_output(text: &str) -> bool {
    text.contains("NotFound")
        || text.contains("not found")
        || text.contains("No resources found")
}
