//! Template rendering and application
//!
//! Templates are OpenShift `Template` objects. `oc process` substitutes the
//! parameters; the rendered list is written to a temporary file and applied
//! with `oc apply -f`. Render and apply failures are hard errors: retrying a
//! malformed request cannot succeed.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::common::{truncate_output, Error, Result};

use super::{ClusterClient, Invocation, Scope};

/// A template path plus named parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    path: PathBuf,
    params: Vec<(String, String)>,
}

impl Template {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            params: Vec::new(),
        }
    }

    /// Add `KEY=VALUE`; a later value for the same key replaces the earlier one
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.params.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.params.push((key, value)),
        }
        self
    }

    /// Add a parameter only when a value is present
    pub fn param_opt(self, key: impl Into<String>, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(v) => self.param(key, v),
            None => self,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    fn process_invocation(&self) -> Invocation {
        let mut inv = Invocation::new("process")
            .arg("--ignore-unknown-parameters=true")
            .arg("-f")
            .arg(self.path.display().to_string());
        for (key, value) in &self.params {
            inv = inv.arg("-p").arg(format!("{}={}", key, value));
        }
        inv
    }

    /// Render the template into a manifest file
    pub async fn render(
        &self,
        client: &dyn ClusterClient,
        scope: Scope,
    ) -> Result<tempfile::NamedTempFile> {
        let template = self.path.display().to_string();
        let manifest = self
            .process_invocation()
            .scope(scope)
            .output(client)
            .await
            .map_err(|e| Error::template_render(&template, e.to_string()))?;

        if manifest.trim().is_empty() {
            return Err(Error::template_render(&template, "rendered manifest is empty"));
        }

        let mut file = tempfile::Builder::new()
            .prefix("olmtest-")
            .suffix(".json")
            .tempfile()?;
        file.write_all(manifest.as_bytes())?;
        file.flush()?;

        tracing::debug!(
            template = %template,
            manifest = %file.path().display(),
            "rendered {}",
            truncate_output(&manifest, 200)
        );

        Ok(file)
    }

    /// Render and `oc apply -f` the result
    pub async fn apply(&self, client: &dyn ClusterClient, scope: Scope) -> Result<()> {
        self.submit("apply", client, scope).await
    }

    /// Render and `oc create -f` the result; fails if the object exists
    pub async fn create(&self, client: &dyn ClusterClient, scope: Scope) -> Result<()> {
        self.submit("create", client, scope).await
    }

    async fn submit(&self, verb: &str, client: &dyn ClusterClient, scope: Scope) -> Result<()> {
        let manifest = self.render(client, scope).await?;
        Invocation::new(verb)
            .arg("-f")
            .arg(manifest.path().display().to_string())
            .scope(scope)
            .execute(client)
            .await
            .map_err(|e| Error::Apply {
                template: self.path.display().to_string(),
                message: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::{fail, ok, FakeCluster};

    #[test]
    fn test_param_overrides_existing_key() {
        let t = Template::new("sub.yaml")
            .param("NAME", "a")
            .param("NAMESPACE", "ns")
            .param("NAME", "b")
            .param_opt("SECRET", None::<String>);
        assert_eq!(
            t.params(),
            &[
                ("NAME".to_string(), "b".to_string()),
                ("NAMESPACE".to_string(), "ns".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_apply_processes_then_applies() {
        let fake = FakeCluster::new();
        fake.on(&["process"], vec![ok(r#"{"kind":"List","items":[]}"#)]);
        fake.on(&["apply -f"], vec![ok("subscription created")]);

        Template::new("/data/sub.yaml")
            .param("NAME", "etcd")
            .apply(&fake, Scope::Admin)
            .await
            .unwrap();

        let calls = fake.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(
            calls[0],
            "oc process --ignore-unknown-parameters=true -f /data/sub.yaml -p NAME=etcd"
        );
        assert!(calls[1].starts_with("oc apply -f "));
    }

    #[tokio::test]
    async fn test_render_failure_is_not_applied() {
        let fake = FakeCluster::new();
        fake.on(&["process"], vec![fail("error: unable to process template")]);

        let err = Template::new("/data/broken.yaml")
            .apply(&fake, Scope::Admin)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TemplateRender { .. }));
        assert!(fake.calls_matching("apply").is_empty());
    }

    #[tokio::test]
    async fn test_apply_failure_is_propagated() {
        let fake = FakeCluster::new();
        fake.on(&["process"], vec![ok(r#"{"kind":"List","items":[]}"#)]);
        fake.on(&["create -f"], vec![fail("AlreadyExists")]);

        let err = Template::new("/data/cm.yaml")
            .create(&fake, Scope::User)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Apply { .. }));
    }
}
