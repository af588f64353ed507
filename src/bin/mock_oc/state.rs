//! File-backed object store shared by every mock-oc invocation
//!
//! Concurrent invocations (a check list polls in parallel) serialize on a
//! lock file next to the state file; writes go through a rename so a reader
//! never sees half a document.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kinds that live outside any namespace
const CLUSTER_SCOPED: &[&str] = &["project", "crd", "clusterrole", "clusterrolebinding"];

/// Map CLI spellings and manifest `kind`s onto one resource name
pub fn canonical_kind(kind: &str) -> String {
    let lower = kind.to_ascii_lowercase();
    let base = lower.split('.').next().unwrap_or(lower.as_str());
    let canonical = match base {
        "sub" | "subs" | "subscription" | "subscriptions" => "subscription",
        "csv" | "csvs" | "clusterserviceversion" | "clusterserviceversions" => "csv",
        "ip" | "installplan" | "installplans" => "installplan",
        "catsrc" | "catalogsource" | "catalogsources" => "catalogsource",
        "og" | "operatorgroup" | "operatorgroups" => "operatorgroup",
        "cm" | "configmap" | "configmaps" => "configmap",
        "crd" | "crds" | "customresourcedefinition" | "customresourcedefinitions" => "crd",
        "project" | "projects" | "namespace" | "namespaces" | "ns" => "project",
        "sa" | "serviceaccount" | "serviceaccounts" => "serviceaccount",
        "role" | "roles" => "role",
        "rolebinding" | "rolebindings" => "rolebinding",
        other => return other.strip_suffix('s').unwrap_or(other).to_string(),
    };
    canonical.to_string()
}

pub fn is_cluster_scoped(kind: &str) -> bool {
    CLUSTER_SCOPED.contains(&kind)
}

/// `kind/namespace/name`, with an empty namespace for cluster-scoped kinds
pub fn object_key(kind: &str, namespace: &str, name: &str) -> String {
    if is_cluster_scoped(kind) {
        format!("{}//{}", kind, name)
    } else {
        format!("{}/{}/{}", kind, namespace, name)
    }
}

/// Split a key back into kind, namespace and name
pub fn split_key(key: &str) -> (&str, &str, &str) {
    let mut parts = key.splitn(3, '/');
    let kind = parts.next().unwrap_or("");
    let namespace = parts.next().unwrap_or("");
    let name = parts.next().unwrap_or("");
    (kind, namespace, name)
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct State {
    #[serde(default)]
    pub objects: BTreeMap<String, Value>,
}

impl State {
    pub fn get(&self, kind: &str, namespace: &str, name: &str) -> Option<&Value> {
        self.objects.get(&object_key(kind, namespace, name))
    }

    pub fn insert(&mut self, kind: &str, namespace: &str, name: &str, object: Value) {
        self.objects.insert(object_key(kind, namespace, name), object);
    }

    pub fn remove(&mut self, kind: &str, namespace: &str, name: &str) -> Option<Value> {
        self.objects.remove(&object_key(kind, namespace, name))
    }

    /// Objects of `kind`, restricted to `namespace` unless it is `None`
    pub fn list(&self, kind: &str, namespace: Option<&str>) -> Vec<(String, &Value)> {
        self.objects
            .iter()
            .filter(|(key, _)| {
                let (k, ns, _) = split_key(key);
                k == kind && (is_cluster_scoped(kind) || namespace.map_or(true, |want| want == ns))
            })
            .map(|(key, value)| (key.clone(), value))
            .collect()
    }

    /// Delete a project together with everything inside it
    pub fn remove_project(&mut self, name: &str) -> bool {
        let existed = self.remove("project", "", name).is_some();
        self.objects.retain(|key, _| split_key(key).1 != name);
        existed
    }
}

/// Exclusive hold on the state file for one invocation
pub struct StateLock {
    path: PathBuf,
}

impl StateLock {
    pub fn acquire(state_path: &Path) -> Result<Self, String> {
        let path = state_path.with_extension("lock");
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => return Ok(Self { path }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if Instant::now() > deadline {
                        return Err(format!("error: timed out waiting for {}", path.display()));
                    }
                    thread::sleep(Duration::from_millis(5));
                }
                Err(e) => return Err(format!("error: cannot create {}: {}", path.display(), e)),
            }
        }
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

pub fn load(path: &Path) -> Result<State, String> {
    match fs::read_to_string(path) {
        Ok(content) if !content.trim().is_empty() => {
            serde_json::from_str(&content).map_err(|e| format!("error: corrupt state {}: {}", path.display(), e))
        }
        Ok(_) => Ok(State::default()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(State::default()),
        Err(e) => Err(format!("error: cannot read {}: {}", path.display(), e)),
    }
}

pub fn save(path: &Path, state: &State) -> Result<(), String> {
    let tmp = path.with_extension("tmp");
    let body = serde_json::to_string_pretty(state).map_err(|e| e.to_string())?;
    fs::write(&tmp, body).map_err(|e| format!("error: cannot write {}: {}", tmp.display(), e))?;
    fs::rename(&tmp, path).map_err(|e| format!("error: cannot replace {}: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_aliases() {
        assert_eq!(canonical_kind("Subscription"), "subscription");
        assert_eq!(canonical_kind("subscriptions.operators.coreos.com"), "subscription");
        assert_eq!(canonical_kind("ClusterServiceVersion"), "csv");
        assert_eq!(canonical_kind("catsrc"), "catalogsource");
        assert_eq!(canonical_kind("Namespace"), "project");
        assert_eq!(canonical_kind("EtcdClusters"), "etcdcluster");
    }

    #[test]
    fn test_project_removal_cascades() {
        let mut state = State::default();
        state.insert("project", "", "ns1", json!({}));
        state.insert("configmap", "ns1", "cm", json!({}));
        state.insert("configmap", "ns2", "cm", json!({}));
        state.insert("crd", "ns1", "x.example.com", json!({}));

        assert!(state.remove_project("ns1"));
        assert!(state.get("configmap", "ns1", "cm").is_none());
        assert!(state.get("configmap", "ns2", "cm").is_some());
        assert!(state.get("crd", "", "x.example.com").is_some());
        assert_eq!(state.list("configmap", None).len(), 1);
    }
}
