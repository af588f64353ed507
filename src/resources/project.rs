//! Project (namespace) descriptor

use async_trait::async_trait;
use serde::Deserialize;

use crate::cluster::{Invocation, Scope};
use crate::common::Result;
use crate::context::TestCase;
use crate::tracker::TrackedResource;

use super::Descriptor;

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectDescription {
    pub name: String,
    /// Create as the regular user, who then administers the project
    #[serde(default)]
    pub scope: Scope,
}

impl ProjectDescription {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            scope: Scope::Admin,
        }
    }

    pub fn as_user(mut self) -> Self {
        self.scope = Scope::User;
        self
    }
}

#[async_trait]
impl Descriptor for ProjectDescription {
    /// Deleted with admin credentials whoever created it
    fn reference(&self) -> TrackedResource {
        TrackedResource::cluster("project", &self.name)
    }

    async fn apply(&self, tc: &TestCase) -> Result<()> {
        Invocation::new("new-project")
            .args([self.name.as_str(), "--skip-config-write"])
            .scope(self.scope)
            .execute(tc.client())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::FakeCluster;
    use crate::tracker::LifecycleTracker;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_project_lifecycle() {
        let fake = Arc::new(FakeCluster::new());
        let tc = TestCase::new("project", fake.clone(), LifecycleTracker::new());

        let mut project = ProjectDescription::new("olm-e2e-abcde");
        project.create(&tc).await.unwrap();
        assert_eq!(tc.tracked(), vec![TrackedResource::cluster("project", "olm-e2e-abcde")]);

        let report = tc.finish().await;
        assert_eq!(report.deleted, 1);
        assert_eq!(
            fake.calls(),
            vec![
                "oc new-project olm-e2e-abcde --skip-config-write",
                "oc delete project olm-e2e-abcde --ignore-not-found",
            ]
        );
    }
}
