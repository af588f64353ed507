//! Per-test context
//!
//! A [`TestCase`] is threaded through every descriptor and check call. It
//! carries the test's identity, the cluster client, the shared tracker, and
//! the poll settings, and it owns the cleanup of whatever the test created.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;

use futures_util::FutureExt;

use crate::cluster::{ClusterClient, Template};
use crate::common::config::{Config, PollSettings};
use crate::common::{names, Result};
use crate::tracker::{CleanupReport, LifecycleTracker, TrackedResource};

/// One running test case
#[derive(Clone)]
pub struct TestCase {
    name: String,
    namespace: String,
    client: Arc<dyn ClusterClient>,
    tracker: LifecycleTracker,
    settings: PollSettings,
    template_dir: Option<PathBuf>,
}

impl std::fmt::Debug for TestCase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestCase")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("settings", &self.settings)
            .finish()
    }
}

impl TestCase {
    /// Open a test case and its tracker list
    ///
    /// The default namespace is a fresh `olm-e2e-xxxxx` name; use
    /// [`TestCase::with_namespace`] to pin one.
    pub fn new(name: &str, client: Arc<dyn ClusterClient>, tracker: LifecycleTracker) -> Self {
        tracker.add_ir(name);
        Self {
            name: name.to_string(),
            namespace: names::unique_name("olm-e2e"),
            client,
            tracker,
            settings: PollSettings::default(),
            template_dir: None,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_settings(mut self, settings: PollSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_template_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.template_dir = Some(dir.into());
        self
    }

    /// Apply the timeouts and template directory from a loaded config
    pub fn configured(self, config: &Config) -> Self {
        let settings = config.timeouts.poll_settings();
        let tc = self.with_settings(settings);
        match &config.templates.dir {
            Some(dir) => tc.with_template_dir(dir.clone()),
            None => tc,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Namespace used by `with_namespace` checks and namespace-less descriptors
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn client(&self) -> &dyn ClusterClient {
        self.client.as_ref()
    }

    pub fn tracker(&self) -> &LifecycleTracker {
        &self.tracker
    }

    pub fn settings(&self) -> &PollSettings {
        &self.settings
    }

    /// Template for `path`, resolved against the template directory
    pub fn template(&self, path: &str) -> Template {
        let path = PathBuf::from(path);
        match &self.template_dir {
            Some(dir) if path.is_relative() => Template::new(dir.join(path)),
            _ => Template::new(path),
        }
    }

    /// Register a created object for cleanup
    pub fn track(&self, resource: TrackedResource) {
        self.tracker.register(&self.name, resource);
    }

    /// Forget an object deleted by its own descriptor
    pub fn untrack(&self, resource: &TrackedResource) {
        self.tracker.unregister(&self.name, resource);
    }

    /// Objects currently registered for this test, oldest first
    pub fn tracked(&self) -> Vec<TrackedResource> {
        self.tracker.resources(&self.name)
    }

    /// Delete everything this test created and close its tracker list
    pub async fn finish(self) -> CleanupReport {
        let report = self.tracker.cleanup(&self.name, self.client.as_ref()).await;
        self.tracker.rm_ir(&self.name);
        report
    }

    /// Run `body` and clean up afterwards on every exit path
    ///
    /// Cleanup runs after success, after an error, and after a panic; the
    /// panic is resumed once the cluster is clean.
    pub async fn run<F, Fut, T>(self, body: F) -> Result<T>
    where
        F: FnOnce(TestCase) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let name = self.name.clone();
        tracing::info!(test = %name, namespace = %self.namespace, "test case started");

        let outcome = AssertUnwindSafe(body(self.clone())).catch_unwind().await;
        let report = self.finish().await;
        if !report.is_clean() {
            tracing::warn!(test = %name, "cleanup left {} objects behind", report.failed.len());
        }

        match outcome {
            Ok(result) => {
                match &result {
                    Ok(_) => tracing::info!(test = %name, "test case passed"),
                    Err(e) => tracing::info!(test = %name, error = %e, "test case failed"),
                }
                result
            }
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}
