//! ConfigMap descriptor

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;

use crate::cluster::{Invocation, Scope};
use crate::common::Result;
use crate::context::TestCase;
use crate::tracker::TrackedResource;

use super::Descriptor;

/// A ConfigMap, either rendered from a template or built from literals
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigMapDescription {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    /// Template to render; when absent the map is created from `data`
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl ConfigMapDescription {
    pub fn new(name: &str, namespace: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            template: None,
            data: BTreeMap::new(),
        }
    }

    pub fn from_template(mut self, template: &str) -> Self {
        self.template = Some(template.to_string());
        self
    }

    pub fn entry(mut self, key: &str, value: &str) -> Self {
        self.data.insert(key.to_string(), value.to_string());
        self
    }
}

#[async_trait]
impl Descriptor for ConfigMapDescription {
    fn reference(&self) -> TrackedResource {
        TrackedResource::namespaced("configmap", &self.name, &self.namespace)
    }

    async fn apply(&self, tc: &TestCase) -> Result<()> {
        match &self.template {
            Some(template) => {
                tc.template(template)
                    .param("NAME", &self.name)
                    .param("NAMESPACE", &self.namespace)
                    .apply(tc.client(), Scope::Admin)
                    .await
            }
            None => {
                Invocation::new("create")
                    .args(["configmap", self.name.as_str()])
                    .args(self.data.iter().map(|(k, v)| format!("--from-literal={}={}", k, v)))
                    .namespace(&self.namespace)
                    .execute(tc.client())
                    .await
            }
        }
    }
}
