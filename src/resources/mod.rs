//! Resource descriptors
//!
//! One descriptor per OLM/Kubernetes kind. A descriptor holds the object's
//! identity and spec fields, renders its template, and knows the kind's
//! readiness protocol. All descriptors deserialize from scenario files.

pub mod catalog_source;
pub mod config_map;
pub mod crd;
pub mod csv;
pub mod custom_resource;
pub mod olm;
pub mod operator_group;
pub mod project;
pub mod rbac;
pub mod subscription;

pub use catalog_source::{CatalogSourceDescription, SourceType};
pub use config_map::ConfigMapDescription;
pub use crd::CrdDescription;
pub use csv::CsvDescription;
pub use custom_resource::CustomResourceDescription;
pub use operator_group::{OperatorGroupDescription, OperatorGroupTarget};
pub use project::ProjectDescription;
pub use rbac::{RoleBindingDescription, RoleDescription};
pub use subscription::{Approval, SubscriptionDescription};

use async_trait::async_trait;
use serde::Deserialize;

use crate::common::Result;
use crate::context::TestCase;
use crate::tracker::TrackedResource;

/// Create/delete protocol shared by every kind
#[async_trait]
pub trait Descriptor: Send + Sync {
    /// The tracker entry for this object
    fn reference(&self) -> TrackedResource;

    /// Render and submit the manifest, without registering it
    async fn apply(&self, tc: &TestCase) -> Result<()>;

    /// Apply and register for cleanup, without any readiness gate
    async fn create_without_check(&self, tc: &TestCase) -> Result<()> {
        self.apply(tc).await?;
        tc.track(self.reference());
        tracing::info!(test = %tc.name(), "created {}", self.reference());
        Ok(())
    }

    /// Apply, register, and wait for the kind's readiness signal
    async fn create(&mut self, tc: &TestCase) -> Result<()> {
        self.create_without_check(tc).await
    }

    /// Delete the object and drop it from the tracker
    ///
    /// Deleting an object that is already gone succeeds.
    async fn delete(&self, tc: &TestCase) -> Result<()> {
        let reference = self.reference();
        reference.delete(tc.client()).await?;
        tc.untrack(&reference);
        tracing::info!(test = %tc.name(), "deleted {}", reference);
        Ok(())
    }
}

/// Any descriptor, tagged by kind, as written in scenario files
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceSpec {
    CatalogSource(CatalogSourceDescription),
    Subscription(SubscriptionDescription),
    OperatorGroup(OperatorGroupDescription),
    Project(ProjectDescription),
    ConfigMap(ConfigMapDescription),
    CustomResource(CustomResourceDescription),
    Crd(CrdDescription),
    Role(RoleDescription),
    RoleBinding(RoleBindingDescription),
}

impl ResourceSpec {
    pub fn descriptor(&self) -> &dyn Descriptor {
        match self {
            ResourceSpec::CatalogSource(d) => d,
            ResourceSpec::Subscription(d) => d,
            ResourceSpec::OperatorGroup(d) => d,
            ResourceSpec::Project(d) => d,
            ResourceSpec::ConfigMap(d) => d,
            ResourceSpec::CustomResource(d) => d,
            ResourceSpec::Crd(d) => d,
            ResourceSpec::Role(d) => d,
            ResourceSpec::RoleBinding(d) => d,
        }
    }

    pub fn descriptor_mut(&mut self) -> &mut dyn Descriptor {
        match self {
            ResourceSpec::CatalogSource(d) => d,
            ResourceSpec::Subscription(d) => d,
            ResourceSpec::OperatorGroup(d) => d,
            ResourceSpec::Project(d) => d,
            ResourceSpec::ConfigMap(d) => d,
            ResourceSpec::CustomResource(d) => d,
            ResourceSpec::Crd(d) => d,
            ResourceSpec::Role(d) => d,
            ResourceSpec::RoleBinding(d) => d,
        }
    }

    /// Scenario files may leave namespaces out; fill in the test's namespace
    pub fn default_namespace(&mut self, namespace: &str) {
        let slot = match self {
            ResourceSpec::CatalogSource(d) => &mut d.namespace,
            ResourceSpec::Subscription(d) => {
                if d.catalog_source_namespace.is_empty() {
                    d.catalog_source_namespace = namespace.to_string();
                }
                &mut d.namespace
            }
            ResourceSpec::OperatorGroup(d) => &mut d.namespace,
            ResourceSpec::ConfigMap(d) => &mut d.namespace,
            ResourceSpec::CustomResource(d) => &mut d.namespace,
            ResourceSpec::Role(d) => &mut d.namespace,
            ResourceSpec::RoleBinding(d) => &mut d.namespace,
            ResourceSpec::Project(_) | ResourceSpec::Crd(_) => return,
        };
        if slot.is_empty() {
            *slot = namespace.to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_spec_from_yaml() {
        let mut spec: ResourceSpec = serde_yaml::from_str(
            r#"
kind: subscription
name: etcd
channel: singlenamespace-alpha
approval: Manual
package: etcd
catalog_source_name: community-operators
starting_csv: etcdoperator.v0.9.2
"#,
        )
        .unwrap();
        spec.default_namespace("olm-e2e-abcde");

        let reference = spec.descriptor().reference();
        assert_eq!(reference.kind, "subscription");
        assert_eq!(reference.namespace.as_deref(), Some("olm-e2e-abcde"));
        match spec {
            ResourceSpec::Subscription(sub) => {
                assert_eq!(sub.approval, Approval::Manual);
                assert_eq!(sub.catalog_source_namespace, "olm-e2e-abcde");
                assert!(sub.installed_csv.is_none());
            }
            other => panic!("unexpected spec: {other:?}"),
        }
    }

    #[test]
    fn test_cluster_scoped_kinds_keep_no_namespace() {
        let mut spec: ResourceSpec = serde_yaml::from_str(
            "kind: crd\nname: etcdclusters.etcd.database.coreos.com\ntemplate: crd.yaml\n",
        )
        .unwrap();
        spec.default_namespace("ns");
        assert!(spec.descriptor().reference().namespace.is_none());
    }
}
