//! OperatorGroup descriptor
//!
//! OLM only tolerates one OperatorGroup per namespace. Creation skips the
//! apply when the namespace already has a group, and fails when the
//! controller reports a conflict.

use std::sync::Mutex;

use async_trait::async_trait;
use serde::Deserialize;

use crate::cluster::{get_json, list_json, Scope};
use crate::common::{Error, Result};
use crate::context::TestCase;
use crate::tracker::TrackedResource;
use crate::wait::poll;

use super::olm::OperatorGroup;
use super::Descriptor;

/// Which namespaces the group's operators watch
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OperatorGroupTarget {
    /// Only the group's namespace
    #[default]
    OwnNamespace,
    /// Every namespace (empty target list)
    AllNamespaces,
    /// Namespaces matching `key=value` (a bare key means `key=true`)
    MultiNamespace { label: String },
    /// Own namespace, operators run as the given service account
    ServiceAccount { service_account: String },
}

impl OperatorGroupTarget {
    fn default_template(&self) -> &'static str {
        match self {
            OperatorGroupTarget::OwnNamespace => "operatorgroup.yaml",
            OperatorGroupTarget::AllNamespaces => "operatorgroup-all.yaml",
            OperatorGroupTarget::MultiNamespace { .. } => "operatorgroup-multins.yaml",
            OperatorGroupTarget::ServiceAccount { .. } => "operatorgroup-serviceaccount.yaml",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawOperatorGroup")]
pub struct OperatorGroupDescription {
    pub name: String,
    pub namespace: String,
    pub target: OperatorGroupTarget,
    pub upgrade_strategy: Option<String>,
    pub template: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
enum TargetKind {
    #[default]
    OwnNamespace,
    AllNamespaces,
    MultiNamespace,
    ServiceAccount,
}

/// Scenario-file shape: `target` names the mode, its argument sits beside it
#[derive(Debug, Deserialize)]
struct RawOperatorGroup {
    name: String,
    #[serde(default)]
    namespace: String,
    #[serde(default)]
    target: TargetKind,
    label: Option<String>,
    service_account: Option<String>,
    upgrade_strategy: Option<String>,
    template: Option<String>,
}

impl TryFrom<RawOperatorGroup> for OperatorGroupDescription {
    type Error = String;

    fn try_from(raw: RawOperatorGroup) -> std::result::Result<Self, Self::Error> {
        let target = match raw.target {
            TargetKind::OwnNamespace => OperatorGroupTarget::OwnNamespace,
            TargetKind::AllNamespaces => OperatorGroupTarget::AllNamespaces,
            TargetKind::MultiNamespace => OperatorGroupTarget::MultiNamespace {
                label: raw
                    .label
                    .ok_or_else(|| format!("operatorgroup {}: multi_namespace needs a label", raw.name))?,
            },
            TargetKind::ServiceAccount => OperatorGroupTarget::ServiceAccount {
                service_account: raw.service_account.ok_or_else(|| {
                    format!("operatorgroup {}: service_account target needs service_account", raw.name)
                })?,
            },
        };
        Ok(Self {
            name: raw.name,
            namespace: raw.namespace,
            target,
            upgrade_strategy: raw.upgrade_strategy,
            template: raw.template,
        })
    }
}

impl OperatorGroupDescription {
    pub fn new(name: &str, namespace: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            target: OperatorGroupTarget::OwnNamespace,
            upgrade_strategy: None,
            template: None,
        }
    }

    pub fn target(mut self, target: OperatorGroupTarget) -> Self {
        self.target = target;
        self
    }

    fn template_name(&self) -> &str {
        self.template
            .as_deref()
            .unwrap_or_else(|| self.target.default_template())
    }

    /// Names of the OperatorGroups already in the namespace
    pub async fn existing(&self, tc: &TestCase) -> Result<Vec<String>> {
        let groups: Vec<OperatorGroup> =
            list_json(tc.client(), Scope::Admin, "operatorgroup", &self.namespace).await?;
        Ok(groups.into_iter().map(|g| g.metadata.name).collect())
    }

    /// Create unless the namespace already has a group, then wait for the
    /// controller to sync it
    pub async fn create_with_check(&self, tc: &TestCase) -> Result<()> {
        let existing = self.existing(tc).await?;
        if !existing.is_empty() {
            tracing::info!(
                test = %tc.name(),
                "namespace {} already has operatorgroup {}, skipping {}",
                self.namespace,
                existing.join(", "),
                self.name
            );
            return Ok(());
        }
        self.create_without_check(tc).await?;
        self.wait_synced(tc).await
    }

    /// Wait until the group status is populated; a conflict condition fails
    /// immediately
    pub async fn wait_synced(&self, tc: &TestCase) -> Result<()> {
        let seen = Mutex::new(None::<OperatorGroup>);
        let timeout = tc.settings().check_timeout;

        let outcome = poll(tc.settings().interval, timeout, || async {
            let og: OperatorGroup =
                get_json(tc.client(), Scope::Admin, "operatorgroup", &self.name, Some(&self.namespace))
                    .await?;
            let done = og.is_synced();
            if let Ok(mut slot) = seen.lock() {
                *slot = Some(og);
            }
            Ok(done)
        })
        .await;

        let last = seen.into_inner().ok().flatten();
        if let Some(conflict) = last.as_ref().and_then(|og| og.conflict()) {
            return Err(Error::TestAssertion(format!(
                "operatorgroup {} in {} reports {}: {}",
                self.name,
                self.namespace,
                conflict.type_,
                conflict.message.as_deref().unwrap_or("")
            )));
        }
        outcome.map_err(|t| {
            Error::timeout(
                format!("operatorgroup {} status", self.name),
                timeout.as_secs(),
                t.last_error.unwrap_or_else(|| "status not populated".to_string()),
            )
        })
    }
}

#[async_trait]
impl Descriptor for OperatorGroupDescription {
    fn reference(&self) -> TrackedResource {
        TrackedResource::namespaced("operatorgroup", &self.name, &self.namespace)
    }

    async fn apply(&self, tc: &TestCase) -> Result<()> {
        let mut template = tc
            .template(self.template_name())
            .param("NAME", &self.name)
            .param("NAMESPACE", &self.namespace)
            .param_opt("UPGRADESTRATEGY", self.upgrade_strategy.as_deref());
        template = match &self.target {
            OperatorGroupTarget::MultiNamespace { label } => {
                let (key, value) = label.split_once('=').unwrap_or((label.as_str(), "true"));
                template.param("MULTINSLABEL", key).param("MULTINSLABELVALUE", value)
            }
            OperatorGroupTarget::ServiceAccount { service_account } => {
                template.param("SERVICE_ACCOUNT_NAME", service_account)
            }
            _ => template,
        };
        template.apply(tc.client(), Scope::Admin).await
    }

    async fn create(&mut self, tc: &TestCase) -> Result<()> {
        self.create_with_check(tc).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::{ok, FakeCluster};
    use crate::common::config::PollSettings;
    use crate::tracker::LifecycleTracker;
    use std::sync::Arc;
    use std::time::Duration;

    fn test_case(fake: Arc<FakeCluster>) -> TestCase {
        TestCase::new("og", fake, LifecycleTracker::new())
            .with_namespace("ns1")
            .with_settings(PollSettings {
                interval: Duration::from_secs(3),
                check_timeout: Duration::from_secs(30),
                present_timeout: Duration::from_secs(30),
                readiness_timeout: Duration::from_secs(30),
            })
    }

    #[test]
    fn test_target_from_yaml() {
        let og: OperatorGroupDescription = serde_yaml::from_str(
            "name: og1\ntarget: multi_namespace\nlabel: env=test\n",
        )
        .unwrap();
        assert_eq!(
            og.target,
            OperatorGroupTarget::MultiNamespace {
                label: "env=test".to_string()
            }
        );
        assert_eq!(og.template_name(), "operatorgroup-multins.yaml");

        let og: OperatorGroupDescription = serde_yaml::from_str("name: og2\n").unwrap();
        assert_eq!(og.target, OperatorGroupTarget::OwnNamespace);

        let missing = serde_yaml::from_str::<OperatorGroupDescription>("name: og3\ntarget: multi_namespace\n");
        assert!(missing.unwrap_err().to_string().contains("needs a label"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_skips_when_group_exists() {
        let fake = Arc::new(FakeCluster::new());
        fake.on(
            &["get operatorgroup -o json"],
            vec![ok(r#"{"items":[{"metadata":{"name":"global"}}]}"#)],
        );
        let tc = test_case(fake.clone());

        let mut og = OperatorGroupDescription::new("og1", "ns1");
        og.create(&tc).await.unwrap();

        assert!(fake.calls_matching("process").is_empty());
        assert!(tc.tracked().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_waits_for_status() {
        let fake = Arc::new(FakeCluster::new());
        fake.on(&["get operatorgroup -o json"], vec![ok(r#"{"items":[]}"#)]);
        fake.on(&["process"], vec![ok("{}")]);
        fake.on(
            &["get operatorgroup og1 -o json"],
            vec![ok("{}"), ok(r#"{"status":{"namespaces":["ns1"]}}"#)],
        );
        let tc = test_case(fake.clone());

        let mut og = OperatorGroupDescription::new("og1", "ns1").target(OperatorGroupTarget::ServiceAccount {
            service_account: "scoped".to_string(),
        });
        og.create(&tc).await.unwrap();

        assert_eq!(fake.calls_matching("get operatorgroup og1").len(), 2);
        assert!(fake.calls_matching("process")[0].contains("-p SERVICE_ACCOUNT_NAME=scoped"));
        assert_eq!(tc.tracked(), vec![og.reference()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflict_fails_fast() {
        let fake = Arc::new(FakeCluster::new());
        fake.on(
            &["get operatorgroup og1 -o json"],
            vec![ok(
                r#"{"status":{"conditions":[{"type":"MultipleOperatorGroup","status":"True","message":"Multiple OperatorGroup found in the same namespace"}]}}"#,
            )],
        );
        let tc = test_case(fake.clone());

        let err = OperatorGroupDescription::new("og1", "ns1")
            .wait_synced(&tc)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("MultipleOperatorGroup"));
        assert_eq!(fake.calls().len(), 1);
    }
}
