//! Process-backed cluster client
//!
//! Spawns the `oc` binary once per invocation, selecting the kubeconfig by
//! scope. Every call is bounded: a process that outlives its timeout is
//! killed.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::common::config::Config;
use crate::common::{truncate_output, Error, Result};

use super::{CliOutput, ClusterClient, Invocation, Scope};

/// Runs invocations through the `oc` binary
#[derive(Debug, Clone)]
pub struct OcClient {
    binary: PathBuf,
    admin_kubeconfig: Option<PathBuf>,
    user_kubeconfig: Option<PathBuf>,
    env: Vec<(String, String)>,
    timeout: Duration,
    /// Set once the user-scope fallback has been reported
    warned_user_fallback: Arc<AtomicBool>,
}

/// Upper bound for one CLI call when the config does not set one
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

impl OcClient {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            admin_kubeconfig: None,
            user_kubeconfig: None,
            env: Vec::new(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
            warned_user_fallback: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Build a client from the loaded configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut client = Self::new(config.cli_binary()?);
        client.admin_kubeconfig = config.cli.admin_kubeconfig.clone();
        client.user_kubeconfig = config.cli.user_kubeconfig.clone();
        if let Some(secs) = config.cli.command_timeout_secs {
            client.timeout = Duration::from_secs(secs);
        }
        Ok(client)
    }

    pub fn with_admin_kubeconfig(mut self, path: impl Into<PathBuf>) -> Self {
        self.admin_kubeconfig = Some(path.into());
        self
    }

    pub fn with_user_kubeconfig(mut self, path: impl Into<PathBuf>) -> Self {
        self.user_kubeconfig = Some(path.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Extra environment for the spawned process
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn kubeconfig(&self, scope: Scope) -> Option<&Path> {
        match scope {
            Scope::Admin => self.admin_kubeconfig.as_deref(),
            Scope::User => match self.user_kubeconfig.as_deref() {
                Some(path) => Some(path),
                None => {
                    if !self.warned_user_fallback.swap(true, Ordering::Relaxed) {
                        tracing::warn!(
                            "no user kubeconfig configured; user-scoped calls run with admin credentials"
                        );
                    }
                    self.admin_kubeconfig.as_deref()
                }
            },
        }
    }
}

#[async_trait]
impl ClusterClient for OcClient {
    async fn run(&self, invocation: &Invocation) -> Result<CliOutput> {
        let mut cmd = Command::new(&self.binary);
        if let Some(kubeconfig) = self.kubeconfig(invocation.scope) {
            cmd.arg(format!("--kubeconfig={}", kubeconfig.display()));
        }
        cmd.arg(&invocation.verb)
            .args(invocation.full_args())
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(scope = ?invocation.scope, "{}", invocation.command_line());

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                tracing::warn!("{} did not exit within {:?}, killed", invocation.command_line(), self.timeout);
                Error::timeout(
                    format!("'{}' exiting", invocation.command_line()),
                    self.timeout.as_secs(),
                    "no output",
                )
            })?
            .map_err(|e| Error::CliSpawn {
                binary: self.binary.display().to_string(),
                source: e,
            })?;

        let out = CliOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            code: output.status.code(),
        };

        if !out.success() {
            tracing::debug!(
                code = ?out.code,
                "{} failed: {}",
                invocation.verb,
                truncate_output(&out.stderr, 300)
            );
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_scope_falls_back_to_admin_kubeconfig() {
        let client = OcClient::new("oc").with_admin_kubeconfig("/tmp/admin.kubeconfig");
        assert!(!client.warned_user_fallback.load(Ordering::Relaxed));
        assert_eq!(client.kubeconfig(Scope::Admin), Some(Path::new("/tmp/admin.kubeconfig")));
        assert!(!client.warned_user_fallback.load(Ordering::Relaxed));
        assert_eq!(
            client.kubeconfig(Scope::User),
            Some(Path::new("/tmp/admin.kubeconfig"))
        );
        assert!(client.warned_user_fallback.load(Ordering::Relaxed));

        let client = client.with_user_kubeconfig("/tmp/user.kubeconfig");
        assert_eq!(
            client.kubeconfig(Scope::User),
            Some(Path::new("/tmp/user.kubeconfig"))
        );
        assert_eq!(
            client.kubeconfig(Scope::Admin),
            Some(Path::new("/tmp/admin.kubeconfig"))
        );
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let client = OcClient::new("/nonexistent/oc-binary");
        let err = client.run(&Invocation::new("version")).await.unwrap_err();
        assert!(matches!(err, Error::CliSpawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runs_real_process() {
        // `echo` stands in for oc: it prints the verb and args it was given
        let client = OcClient::new("echo");
        let out = client
            .run(&Invocation::new("get").args(["csv"]).namespace("ns1"))
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "get csv -n ns1");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hung_process_is_killed_at_timeout() {
        // `sleep 30` stands in for an oc call that never returns
        let client = OcClient::new("sleep").with_timeout(Duration::from_millis(200));
        let start = std::time::Instant::now();
        let err = client.run(&Invocation::new("30")).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }), "{err}");
        assert!(start.elapsed() < Duration::from_secs(10));
    }
}
