//! Cluster CLI abstraction
//!
//! Every descriptor and check funnels through [`ClusterClient`]; nothing in
//! the harness talks to the API server directly. An [`Invocation`] reads like
//! the CLI line it becomes:
//!
//! ```ignore
//! let phase = Invocation::new("get")
//!     .args(["csv", "etcdoperator.v0.9.4", "-o=jsonpath={.status.phase}"])
//!     .namespace("olm-e2e-x1y2z")
//!     .output(client)
//!     .await?;
//! ```

mod oc;
mod template;

pub use oc::OcClient;
pub use template::Template;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::common::{Error, Result};

/// Which credentials an invocation runs with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Cluster-admin kubeconfig
    #[default]
    Admin,
    /// Regular user kubeconfig
    User,
}

/// Raw result of running the CLI once
#[derive(Debug, Clone, Default)]
pub struct CliOutput {
    pub stdout: String,
    pub stderr: String,
    pub code: Option<i32>,
}

impl CliOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Stdout and stderr together, the way a terminal would show them
    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (false, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            _ => format!("{}{}", self.stdout, self.stderr),
        }
    }
}

/// Executes cluster CLI invocations
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Run the invocation once; a non-zero exit is not an error at this level
    async fn run(&self, invocation: &Invocation) -> Result<CliOutput>;
}

/// One CLI call: `verb args... [-n namespace]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub verb: String,
    pub args: Vec<String>,
    pub scope: Scope,
    pub namespace: Option<String>,
}

impl Invocation {
    pub fn new(verb: impl Into<String>) -> Self {
        Self {
            verb: verb.into(),
            args: Vec::new(),
            scope: Scope::Admin,
            namespace: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn as_admin(self) -> Self {
        self.scope(Scope::Admin)
    }

    pub fn as_user(self) -> Self {
        self.scope(Scope::User)
    }

    /// Append `-n <namespace>` when the invocation runs
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Arguments after the verb, including the namespace flag
    pub fn full_args(&self) -> Vec<String> {
        let mut args = self.args.clone();
        if let Some(ns) = &self.namespace {
            args.push("-n".to_string());
            args.push(ns.clone());
        }
        args
    }

    /// Human-readable command line for logs and error messages
    pub fn command_line(&self) -> String {
        let mut line = format!("oc {}", self.verb);
        for arg in self.full_args() {
            line.push(' ');
            line.push_str(&arg);
        }
        line
    }

    /// Run and return the raw output regardless of exit status
    pub async fn raw(&self, client: &dyn ClusterClient) -> Result<CliOutput> {
        client.run(self).await
    }

    /// Run and return stdout; a non-zero exit becomes [`Error::Cli`]
    pub async fn output(&self, client: &dyn ClusterClient) -> Result<String> {
        let out = client.run(self).await?;
        if out.success() {
            Ok(out.stdout)
        } else {
            Err(Error::Cli {
                command: self.command_line(),
                code: out.code,
                stderr: out.combined().trim().to_string(),
            })
        }
    }

    /// Run for side effects only
    pub async fn execute(&self, client: &dyn ClusterClient) -> Result<()> {
        self.output(client).await.map(|_| ())
    }
}

/// `get <kind> <name> -o json`, deserialized into `T`
pub async fn get_json<T: DeserializeOwned>(
    client: &dyn ClusterClient,
    scope: Scope,
    kind: &str,
    name: &str,
    namespace: Option<&str>,
) -> Result<T> {
    let mut inv = Invocation::new("get")
        .args([kind, name, "-o", "json"])
        .scope(scope);
    if let Some(ns) = namespace {
        inv = inv.namespace(ns);
    }
    let stdout = inv.output(client).await.map_err(|e| {
        if e.is_not_found() {
            Error::NotFound {
                kind: kind.to_string(),
                name: name.to_string(),
            }
        } else {
            e
        }
    })?;
    Ok(serde_json::from_str(&stdout)?)
}

/// Kubernetes list envelope
#[derive(Debug, Deserialize)]
pub struct List<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

/// `get <kind> -n <namespace> -o json`, deserialized into a list of `T`
pub async fn list_json<T: DeserializeOwned>(
    client: &dyn ClusterClient,
    scope: Scope,
    kind: &str,
    namespace: &str,
) -> Result<Vec<T>> {
    let stdout = Invocation::new("get")
        .args([kind, "-o", "json"])
        .scope(scope)
        .namespace(namespace)
        .output(client)
        .await?;
    if stdout.trim().is_empty() {
        return Ok(Vec::new());
    }
    let list: List<T> = serde_json::from_str(&stdout)?;
    Ok(list.items)
}

/// Merge-patch an object
pub async fn merge_patch(
    client: &dyn ClusterClient,
    scope: Scope,
    kind: &str,
    name: &str,
    namespace: Option<&str>,
    patch: &serde_json::Value,
) -> Result<()> {
    let mut inv = Invocation::new("patch")
        .args([kind, name, "--type", "merge", "-p"])
        .arg(patch.to_string())
        .scope(scope);
    if let Some(ns) = namespace {
        inv = inv.namespace(ns);
    }
    inv.execute(client).await
}

#[cfg(test)]
pub(crate) mod fake {
    //! Scripted in-memory client for unit tests

    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// One scripted reply: matches when every needle occurs in the command line
    struct Reply {
        needles: Vec<String>,
        outputs: VecDeque<CliOutput>,
    }

    /// Replies are consumed in order; the last one for a pattern repeats
    #[derive(Default)]
    pub struct FakeCluster {
        replies: Mutex<Vec<Reply>>,
        calls: Mutex<Vec<String>>,
    }

    pub fn ok(stdout: &str) -> CliOutput {
        CliOutput {
            stdout: stdout.to_string(),
            stderr: String::new(),
            code: Some(0),
        }
    }

    pub fn fail(stderr: &str) -> CliOutput {
        CliOutput {
            stdout: String::new(),
            stderr: stderr.to_string(),
            code: Some(1),
        }
    }

    impl FakeCluster {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn on(&self, needles: &[&str], outputs: Vec<CliOutput>) -> &Self {
            self.replies.lock().unwrap().push(Reply {
                needles: needles.iter().map(|s| s.to_string()).collect(),
                outputs: outputs.into(),
            });
            self
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub fn calls_matching(&self, needle: &str) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter(|c| c.contains(needle))
                .collect()
        }
    }

    #[async_trait]
    impl ClusterClient for FakeCluster {
        async fn run(&self, invocation: &Invocation) -> Result<CliOutput> {
            let line = invocation.command_line();
            self.calls.lock().unwrap().push(line.clone());
            let mut replies = self.replies.lock().unwrap();
            for reply in replies.iter_mut() {
                if reply.needles.iter().all(|n| line.contains(n.as_str())) {
                    let out = if reply.outputs.len() > 1 {
                        reply.outputs.pop_front()
                    } else {
                        reply.outputs.front().cloned()
                    };
                    return Ok(out.unwrap_or_else(|| ok("")));
                }
            }
            Ok(ok(""))
        }
    }

    /// A client whose calls never return, like `oc` against a stalled API server
    pub struct HungCluster;

    #[async_trait]
    impl ClusterClient for HungCluster {
        async fn run(&self, _invocation: &Invocation) -> Result<CliOutput> {
            std::future::pending().await
        }
    }
}
