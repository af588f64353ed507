//! Configuration file handling

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use super::paths::config_path;
use super::{Error, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Cluster CLI settings
    #[serde(default)]
    pub cli: CliConfig,

    /// Poll intervals and timeouts
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Template lookup
    #[serde(default)]
    pub templates: TemplateConfig,
}

/// How to reach the cluster
#[derive(Debug, Deserialize, Default, Clone)]
pub struct CliConfig {
    /// Path to the `oc` binary; searched in PATH when unset
    pub binary: Option<PathBuf>,

    /// Kubeconfig used for admin invocations
    pub admin_kubeconfig: Option<PathBuf>,

    /// Kubeconfig used for user invocations (falls back to the admin one)
    pub user_kubeconfig: Option<PathBuf>,

    /// Upper bound in seconds for one CLI call (120 when unset)
    pub command_timeout_secs: Option<u64>,
}

/// Timeout settings in seconds
#[derive(Debug, Deserialize, Clone)]
pub struct Timeouts {
    /// Interval between polls of a check
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,

    /// How long an expect-style check polls before failing
    #[serde(default = "default_check_timeout")]
    pub check_timeout_secs: u64,

    /// How long a present/notPresent check polls before failing
    #[serde(default = "default_present_timeout")]
    pub present_timeout_secs: u64,

    /// How long readiness gates (catalog READY, CSV Succeeded) wait
    #[serde(default = "default_readiness_timeout")]
    pub readiness_timeout_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval(),
            check_timeout_secs: default_check_timeout(),
            present_timeout_secs: default_present_timeout(),
            readiness_timeout_secs: default_readiness_timeout(),
        }
    }
}

fn default_check_interval() -> u64 {
    3
}
fn default_check_timeout() -> u64 {
    150
}
fn default_present_timeout() -> u64 {
    70
}
fn default_readiness_timeout() -> u64 {
    360
}

impl Timeouts {
    /// Poll settings derived from these timeouts
    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            interval: Duration::from_secs(self.check_interval_secs),
            check_timeout: Duration::from_secs(self.check_timeout_secs),
            present_timeout: Duration::from_secs(self.present_timeout_secs),
            readiness_timeout: Duration::from_secs(self.readiness_timeout_secs),
        }
    }
}

/// Poll intervals and timeouts as durations, carried by every test case
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub check_timeout: Duration,
    pub present_timeout: Duration,
    pub readiness_timeout: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Timeouts::default().poll_settings()
    }
}

/// Where templates are looked up
#[derive(Debug, Deserialize, Default, Clone)]
pub struct TemplateConfig {
    /// Base directory for relative template paths
    pub dir: Option<PathBuf>,
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        let mut config = match config_path() {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(&path).map_err(|e| Error::FileRead {
                    path: path.display().to_string(),
                    error: e.to_string(),
                })?;
                Self::parse(&content)?
            }
            _ => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::ConfigParse(e.to_string()))
    }

    /// Environment overrides: `OLMTEST_OC` for the binary, `KUBECONFIG` for
    /// the admin kubeconfig when none is configured
    fn apply_env(&mut self) {
        if let Ok(binary) = std::env::var("OLMTEST_OC") {
            self.cli.binary = Some(PathBuf::from(binary));
        }
        if self.cli.admin_kubeconfig.is_none() {
            if let Ok(kubeconfig) = std::env::var("KUBECONFIG") {
                self.cli.admin_kubeconfig = Some(PathBuf::from(kubeconfig));
            }
        }
    }

    /// Resolve the `oc` binary
    ///
    /// Falls back to searching PATH if not explicitly configured
    pub fn cli_binary(&self) -> Result<PathBuf> {
        if let Some(path) = &self.cli.binary {
            return Ok(path.clone());
        }
        which::which("oc").map_err(|_| Error::CliNotFound)
    }
}
