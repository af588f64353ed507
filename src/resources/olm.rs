//! Typed views of the OLM objects the harness reads
//!
//! Only the fields the harness looks at are modelled; everything else is
//! ignored during deserialization.

use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    pub namespace: Option<String>,
    #[serde(default)]
    pub owner_references: Vec<OwnerReference>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OwnerReference {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Condition {
    #[serde(rename = "type", default)]
    pub type_: String,
    #[serde(default)]
    pub status: String,
    pub reason: Option<String>,
    pub message: Option<String>,
}

impl Condition {
    pub fn is_true(&self) -> bool {
        self.status == "True"
    }
}

// === Subscription ===

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Subscription {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub status: SubscriptionStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStatus {
    pub state: Option<String>,
    #[serde(rename = "currentCSV")]
    pub current_csv: Option<String>,
    #[serde(rename = "installedCSV")]
    pub installed_csv: Option<String>,
    pub installplan: Option<ObjectRef>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObjectRef {
    #[serde(default)]
    pub name: String,
}

// === InstallPlan ===

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InstallPlan {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: InstallPlanSpec,
    #[serde(default)]
    pub status: InstallPlanStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallPlanSpec {
    #[serde(default)]
    pub cluster_service_version_names: Vec<String>,
    #[serde(default)]
    pub approval: String,
    #[serde(default)]
    pub approved: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InstallPlanStatus {
    pub phase: Option<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl InstallPlan {
    pub fn phase(&self) -> &str {
        self.status.phase.as_deref().unwrap_or("")
    }

    pub fn targets_csv(&self, csv: &str) -> bool {
        self.spec.cluster_service_version_names.iter().any(|n| n == csv)
    }

    /// Owned by the named subscription; plans without owner references are
    /// attributed to every subscription in the namespace
    pub fn owned_by_subscription(&self, subscription: &str) -> bool {
        let owners = &self.metadata.owner_references;
        owners.is_empty()
            || owners
                .iter()
                .any(|o| o.kind == "Subscription" && o.name == subscription)
    }

    /// Message of the first failing condition, for error reports
    pub fn failure_message(&self) -> String {
        self.status
            .conditions
            .iter()
            .find_map(|c| c.message.clone())
            .unwrap_or_else(|| "no condition message".to_string())
    }
}

// === ClusterServiceVersion ===

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClusterServiceVersion {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub status: CsvStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CsvStatus {
    pub phase: Option<String>,
    pub reason: Option<String>,
    pub message: Option<String>,
}

// === CatalogSource ===

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogSource {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub status: CatalogSourceStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSourceStatus {
    pub connection_state: Option<ConnectionState>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    #[serde(default)]
    pub last_observed_state: String,
    pub address: Option<String>,
}

// === OperatorGroup ===

/// Condition types OLM sets on a conflicting or misconfigured group
pub const OPERATOR_GROUP_CONFLICTS: &[&str] = &["MultipleOperatorGroup", "ServiceAccountNotFound"];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OperatorGroup {
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub status: Option<OperatorGroupStatus>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorGroupStatus {
    #[serde(default)]
    pub namespaces: Vec<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl OperatorGroup {
    /// The first true conflict condition, if any
    pub fn conflict(&self) -> Option<&Condition> {
        self.status.as_ref().and_then(|s| {
            s.conditions
                .iter()
                .find(|c| c.is_true() && OPERATOR_GROUP_CONFLICTS.contains(&c.type_.as_str()))
        })
    }

    /// The controller has processed the group at least once
    pub fn is_synced(&self) -> bool {
        self.status
            .as_ref()
            .map(|s| !s.namespaces.is_empty() || !s.conditions.is_empty())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_subscription_status_field_names() {
        let sub: Subscription = serde_json::from_value(json!({
            "metadata": {"name": "etcd", "namespace": "ns"},
            "status": {
                "state": "AtLatestKnown",
                "currentCSV": "etcdoperator.v0.9.4",
                "installedCSV": "etcdoperator.v0.9.4",
                "installplan": {"name": "install-abcde", "kind": "InstallPlan"}
            }
        }))
        .unwrap();
        assert_eq!(sub.status.installed_csv.as_deref(), Some("etcdoperator.v0.9.4"));
        assert_eq!(sub.status.installplan.unwrap().name, "install-abcde");
    }

    #[test]
    fn test_install_plan_ownership_and_targets() {
        let ip: InstallPlan = serde_json::from_value(json!({
            "metadata": {
                "name": "install-1",
                "ownerReferences": [{"kind": "Subscription", "name": "etcd"}]
            },
            "spec": {
                "clusterServiceVersionNames": ["etcdoperator.v0.9.2"],
                "approval": "Manual",
                "approved": false
            },
            "status": {"phase": "RequiresApproval"}
        }))
        .unwrap();
        assert!(ip.targets_csv("etcdoperator.v0.9.2"));
        assert!(!ip.targets_csv("etcdoperator.v0.9.4"));
        assert!(ip.owned_by_subscription("etcd"));
        assert!(!ip.owned_by_subscription("other"));
        assert_eq!(ip.phase(), "RequiresApproval");
    }

    #[test]
    fn test_operator_group_conflict() {
        let og: OperatorGroup = serde_json::from_value(json!({
            "metadata": {"name": "og1"},
            "status": {
                "namespaces": [],
                "conditions": [{
                    "type": "MultipleOperatorGroup",
                    "status": "True",
                    "message": "Multiple OperatorGroup found in the same namespace"
                }]
            }
        }))
        .unwrap();
        assert!(og.is_synced());
        assert_eq!(og.conflict().unwrap().type_, "MultipleOperatorGroup");

        let fresh: OperatorGroup = serde_json::from_value(json!({"metadata": {"name": "og2"}})).unwrap();
        assert!(!fresh.is_synced());
        assert!(fresh.conflict().is_none());
    }
}
