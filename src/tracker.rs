//! Resource lifecycle tracking
//!
//! Every object a descriptor creates is registered under the test case that
//! created it. Cleanup deletes the registered objects newest-first and keeps
//! going past individual failures: one stuck object must not leave the rest
//! of the test's objects behind.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

use crate::cluster::{ClusterClient, Invocation, Scope};
use crate::common::Result;

/// A cluster object owned by one test case
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackedResource {
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
    pub scope: Scope,
}

impl TrackedResource {
    /// A namespaced object
    pub fn namespaced(kind: &str, name: &str, namespace: &str) -> Self {
        Self {
            kind: kind.to_string(),
            name: name.to_string(),
            namespace: Some(namespace.to_string()),
            scope: Scope::Admin,
        }
    }

    /// A cluster-scoped object
    pub fn cluster(kind: &str, name: &str) -> Self {
        Self {
            kind: kind.to_string(),
            name: name.to_string(),
            namespace: None,
            scope: Scope::Admin,
        }
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// `delete <kind> <name> --ignore-not-found [-n ns]`
    pub fn delete_invocation(&self) -> Invocation {
        let inv = Invocation::new("delete")
            .args([self.kind.as_str(), self.name.as_str(), "--ignore-not-found"])
            .scope(self.scope);
        match &self.namespace {
            Some(ns) => inv.namespace(ns),
            None => inv,
        }
    }

    /// Delete the object; "not found" counts as success
    pub async fn delete(&self, client: &dyn ClusterClient) -> Result<()> {
        match self.delete_invocation().execute(client).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }
}

impl std::fmt::Display for TrackedResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{} in {}", self.kind, self.name, ns),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

/// What a cleanup pass did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub deleted: usize,
    pub failed: Vec<String>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Per-test-case ordered registries of created objects
///
/// Cloning shares the registry, so a handle can travel with each test case.
#[derive(Debug, Clone, Default)]
pub struct LifecycleTracker {
    lists: Arc<Mutex<HashMap<String, Vec<TrackedResource>>>>,
}

impl LifecycleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<TrackedResource>>> {
        // A panicking test must not poison cleanup for everyone else
        self.lists.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start an empty list for `test`; no-op if one exists
    pub fn add_ir(&self, test: &str) {
        self.lock().entry(test.to_string()).or_default();
    }

    /// Drop the list for `test`
    pub fn rm_ir(&self, test: &str) {
        self.lock().remove(test);
    }

    pub fn contains(&self, test: &str) -> bool {
        self.lock().contains_key(test)
    }

    /// Snapshot of the resources registered for `test`, oldest first
    pub fn resources(&self, test: &str) -> Vec<TrackedResource> {
        self.lock().get(test).cloned().unwrap_or_default()
    }

    /// Record a created object under `test`
    ///
    /// Registering the same object twice under one test is a no-op; an
    /// object already owned by another test stays with that test.
    pub fn register(&self, test: &str, resource: TrackedResource) {
        let mut lists = self.lock();
        if let Some((owner, _)) = lists
            .iter()
            .find(|(name, list)| name.as_str() != test && list.contains(&resource))
        {
            tracing::warn!(
                "{} is already tracked by test '{}', not registering it under '{}'",
                resource,
                owner,
                test
            );
            return;
        }
        let list = lists.entry(test.to_string()).or_default();
        if !list.contains(&resource) {
            tracing::debug!(test, "tracking {}", resource);
            list.push(resource);
        }
    }

    /// Forget an object that its descriptor deleted itself
    pub fn unregister(&self, test: &str, resource: &TrackedResource) {
        if let Some(list) = self.lock().get_mut(test) {
            list.retain(|r| r != resource);
        }
    }

    /// Delete every object registered for `test`, newest first
    ///
    /// The list is emptied up front, so a second cleanup does nothing.
    pub async fn cleanup(&self, test: &str, client: &dyn ClusterClient) -> CleanupReport {
        let resources = match self.lock().get_mut(test) {
            Some(list) => std::mem::take(list),
            None => Vec::new(),
        };

        let mut report = CleanupReport::default();
        for resource in resources.iter().rev() {
            match resource.delete(client).await {
                Ok(()) => {
                    tracing::debug!(test, "deleted {}", resource);
                    report.deleted += 1;
                }
                Err(e) => {
                    tracing::warn!(test, "failed to delete {}: {}", resource, e);
                    report.failed.push(format!("{}: {}", resource, e));
                }
            }
        }

        tracing::info!(
            test,
            deleted = report.deleted,
            failed = report.failed.len(),
            "cleanup finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::{fail, FakeCluster};

    #[test]
    fn test_add_ir_is_idempotent() {
        let tracker = LifecycleTracker::new();
        tracker.add_ir("case-1");
        tracker.register("case-1", TrackedResource::cluster("crd", "foos.example.com"));
        tracker.add_ir("case-1");
        assert_eq!(tracker.resources("case-1").len(), 1);

        tracker.rm_ir("case-1");
        assert!(!tracker.contains("case-1"));
    }

    #[test]
    fn test_resource_belongs_to_one_test() {
        let tracker = LifecycleTracker::new();
        let cm = TrackedResource::namespaced("configmap", "cm1", "ns1");
        tracker.register("a", cm.clone());
        tracker.register("a", cm.clone());
        tracker.register("b", cm.clone());

        assert_eq!(tracker.resources("a"), vec![cm]);
        assert!(tracker.resources("b").is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_runs_in_reverse_order() {
        let fake = FakeCluster::new();
        let tracker = LifecycleTracker::new();
        tracker.add_ir("t");
        tracker.register("t", TrackedResource::namespaced("catalogsource", "cs", "ns"));
        tracker.register("t", TrackedResource::namespaced("operatorgroup", "og", "ns"));
        tracker.register("t", TrackedResource::namespaced("subscription", "sub", "ns"));

        let report = tracker.cleanup("t", &fake).await;

        assert_eq!(report.deleted, 3);
        assert_eq!(
            fake.calls(),
            vec![
                "oc delete subscription sub --ignore-not-found -n ns",
                "oc delete operatorgroup og --ignore-not-found -n ns",
                "oc delete catalogsource cs --ignore-not-found -n ns",
            ]
        );
        assert!(tracker.resources("t").is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_continues_past_failures_and_ignores_not_found() {
        let fake = FakeCluster::new();
        fake.on(&["delete csv"], vec![fail("error: the server is currently unable to handle the request")]);
        fake.on(&["delete project"], vec![fail("Error from server (NotFound): projects \"p\" not found")]);

        let tracker = LifecycleTracker::new();
        tracker.add_ir("t");
        tracker.register("t", TrackedResource::cluster("project", "p"));
        tracker.register("t", TrackedResource::namespaced("csv", "etcd.v1", "p"));
        tracker.register("t", TrackedResource::namespaced("configmap", "cm", "p"));

        let report = tracker.cleanup("t", &fake).await;

        assert_eq!(fake.calls().len(), 3);
        assert_eq!(report.deleted, 2);
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].starts_with("csv/etcd.v1 in p"));

        // Nothing left to delete the second time
        let again = tracker.cleanup("t", &fake).await;
        assert_eq!(again, CleanupReport::default());
        assert_eq!(fake.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_unregistered_resource_is_not_deleted_twice() {
        let fake = FakeCluster::new();
        let tracker = LifecycleTracker::new();
        let sub = TrackedResource::namespaced("subscription", "sub", "ns");
        tracker.register("t", sub.clone());
        tracker.unregister("t", &sub);

        let report = tracker.cleanup("t", &fake).await;
        assert_eq!(report.deleted, 0);
        assert!(fake.calls().is_empty());
    }
}
