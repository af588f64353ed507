//! Instances of operator-provided CRDs
//!
//! The kind is free-form (`etcdcluster`, `etcdclusters.etcd.database.coreos.com`)
//! and the template decides the object's shape; the descriptor only supplies
//! name and namespace plus any extra parameters.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;

use crate::check::{Check, Query};
use crate::cluster::Scope;
use crate::common::Result;
use crate::context::TestCase;
use crate::tracker::TrackedResource;

use super::Descriptor;

#[derive(Debug, Clone, Deserialize)]
pub struct CustomResourceDescription {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    /// Resource type as the CLI spells it
    pub type_name: String,
    pub template: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    /// Credentials to create with; operators often grant users access to
    /// their own APIs only
    #[serde(default)]
    pub scope: Scope,
}

impl CustomResourceDescription {
    pub fn new(type_name: &str, name: &str, namespace: &str, template: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            type_name: type_name.to_string(),
            template: template.to_string(),
            params: BTreeMap::new(),
            scope: Scope::Admin,
        }
    }

    pub fn param(mut self, key: &str, value: &str) -> Self {
        self.params.insert(key.to_string(), value.to_string());
        self
    }

    pub fn as_user(mut self) -> Self {
        self.scope = Scope::User;
        self
    }
}

#[async_trait]
impl Descriptor for CustomResourceDescription {
    fn reference(&self) -> TrackedResource {
        TrackedResource::namespaced(&self.type_name, &self.name, &self.namespace).with_scope(self.scope)
    }

    async fn apply(&self, tc: &TestCase) -> Result<()> {
        let mut template = tc
            .template(&self.template)
            .param("NAME", &self.name)
            .param("NAMESPACE", &self.namespace);
        for (key, value) in &self.params {
            template = template.param(key, value);
        }
        template.apply(tc.client(), self.scope).await
    }

    /// Wait until the object can be read back
    async fn create(&mut self, tc: &TestCase) -> Result<()> {
        self.create_without_check(tc).await?;
        let query = Query::object(&self.type_name, &self.name, Some(&self.namespace));
        let check = match self.scope {
            Scope::Admin => Check::present(query).as_admin(),
            Scope::User => Check::present(query).as_user(),
        };
        check.check(tc).await
    }
}
