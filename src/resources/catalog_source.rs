//! CatalogSource descriptor

use async_trait::async_trait;
use serde::Deserialize;

use crate::check::{Check, Comparator, Query};
use crate::cluster::{get_json, Scope};
use crate::common::Result;
use crate::context::TestCase;
use crate::tracker::TrackedResource;

use super::olm::CatalogSource;
use super::Descriptor;

/// `connectionState.lastObservedState` of a serving catalog
pub const READY: &str = "READY";

/// Where the catalog content comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Index image served over gRPC
    #[default]
    Grpc,
    /// Manifests inlined in a ConfigMap
    ConfigMap,
}

impl SourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceType::Grpc => "grpc",
            SourceType::ConfigMap => "configmap",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogSourceDescription {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default = "default_display_name")]
    pub display_name: String,
    #[serde(default = "default_publisher")]
    pub publisher: String,
    #[serde(default)]
    pub source_type: SourceType,
    /// Index image for grpc sources, ConfigMap name for configmap sources
    pub address: String,
    #[serde(default)]
    pub secret: Option<String>,
    /// Registry poll interval, e.g. `10m`
    #[serde(default)]
    pub interval: Option<String>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default = "default_template")]
    pub template: String,
}

fn default_template() -> String {
    "catalogsource-image.yaml".to_string()
}

fn default_display_name() -> String {
    "Test Operators".to_string()
}

fn default_publisher() -> String {
    "OLM-QE".to_string()
}

impl CatalogSourceDescription {
    pub fn new(name: &str, namespace: &str, address: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            display_name: default_display_name(),
            publisher: default_publisher(),
            source_type: SourceType::Grpc,
            address: address.to_string(),
            secret: None,
            interval: None,
            priority: None,
            template: default_template(),
        }
    }

    pub fn with_template(mut self, template: &str) -> Self {
        self.template = template.to_string();
        self
    }

    /// Create and wait for `connectionState.lastObservedState` to reach
    /// `state`, which may list alternatives
    pub async fn create_with_check(&self, tc: &TestCase, state: &str) -> Result<()> {
        self.create_without_check(tc).await?;
        Check::new(
            Comparator::Compare,
            state,
            Query::jsonpath(
                "catalogsource",
                &self.name,
                &self.namespace,
                "{.status.connectionState.lastObservedState}",
            ),
        )
        .timeout(tc.settings().readiness_timeout)
        .check(tc)
        .await
    }

    /// Current `lastObservedState`, empty before the first connection attempt
    pub async fn state(&self, tc: &TestCase) -> Result<String> {
        let source: CatalogSource =
            get_json(tc.client(), Scope::Admin, "catalogsource", &self.name, Some(&self.namespace)).await?;
        Ok(source
            .status
            .connection_state
            .map(|s| s.last_observed_state)
            .unwrap_or_default())
    }
}

#[async_trait]
impl Descriptor for CatalogSourceDescription {
    fn reference(&self) -> TrackedResource {
        TrackedResource::namespaced("catalogsource", &self.name, &self.namespace)
    }

    async fn apply(&self, tc: &TestCase) -> Result<()> {
        tc.template(&self.template)
            .param("NAME", &self.name)
            .param("NAMESPACE", &self.namespace)
            .param("ADDRESS", &self.address)
            .param("DISPLAYNAME", &self.display_name)
            .param("PUBLISHER", &self.publisher)
            .param("SOURCETYPE", self.source_type.as_str())
            .param_opt("SECRET", self.secret.as_deref())
            .param_opt("INTERVAL", self.interval.as_deref())
            .param_opt("PRIORITY", self.priority.map(|p| p.to_string()))
            .apply(tc.client(), Scope::Admin)
            .await
    }

    async fn create(&mut self, tc: &TestCase) -> Result<()> {
        self.create_with_check(tc, READY).await
    }
}
