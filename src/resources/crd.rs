//! CustomResourceDefinition descriptor (cluster-scoped)

use async_trait::async_trait;
use serde::Deserialize;

use crate::check::{Check, Comparator, Query};
use crate::cluster::Scope;
use crate::common::Result;
use crate::context::TestCase;
use crate::tracker::TrackedResource;

use super::Descriptor;

#[derive(Debug, Clone, Deserialize)]
pub struct CrdDescription {
    /// Full CRD name, `<plural>.<group>`
    pub name: String,
    pub template: String,
}

impl CrdDescription {
    pub fn new(name: &str, template: &str) -> Self {
        Self {
            name: name.to_string(),
            template: template.to_string(),
        }
    }
}

#[async_trait]
impl Descriptor for CrdDescription {
    fn reference(&self) -> TrackedResource {
        TrackedResource::cluster("crd", &self.name)
    }

    async fn apply(&self, tc: &TestCase) -> Result<()> {
        tc.template(&self.template)
            .param("NAME", &self.name)
            .apply(tc.client(), Scope::Admin)
            .await
    }

    /// Wait for the API server to accept the new names
    async fn create(&mut self, tc: &TestCase) -> Result<()> {
        self.create_without_check(tc).await?;
        Check::new(
            Comparator::Contain,
            "True",
            Query::cluster_jsonpath(
                "crd",
                &self.name,
                "{.status.conditions[?(@.type==\"Established\")].status}",
            ),
        )
        .check(tc)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::{ok, FakeCluster};
    use crate::tracker::LifecycleTracker;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_create_is_cluster_scoped() {
        let fake = Arc::new(FakeCluster::new());
        fake.on(&["process"], vec![ok("{}")]);
        fake.on(&["Established"], vec![ok("True")]);
        let tc = TestCase::new("crd", fake.clone(), LifecycleTracker::new()).with_namespace("ns1");

        let mut crd = CrdDescription::new("etcdclusters.etcd.database.coreos.com", "crd-etcd.yaml");
        crd.create(&tc).await.unwrap();

        assert!(fake.calls().iter().all(|c| !c.contains("-n ns1")));
        crd.delete(&tc).await.unwrap();
        assert_eq!(
            fake.calls().last().map(String::as_str),
            Some("oc delete crd etcdclusters.etcd.database.coreos.com --ignore-not-found")
        );
        assert!(tc.tracked().is_empty());
    }
}
