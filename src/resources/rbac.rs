//! Role and RoleBinding descriptors

use async_trait::async_trait;
use serde::Deserialize;

use crate::cluster::{Invocation, Scope};
use crate::common::Result;
use crate::context::TestCase;
use crate::tracker::TrackedResource;

use super::Descriptor;

/// A namespaced Role
///
/// With a template the role is rendered from it; otherwise it is created
/// with `oc create role` from `verbs` and `resources`.
#[derive(Debug, Clone, Deserialize)]
pub struct RoleDescription {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub verbs: Vec<String>,
    #[serde(default)]
    pub resources: Vec<String>,
}

impl RoleDescription {
    pub fn new(name: &str, namespace: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            template: None,
            verbs: Vec::new(),
            resources: Vec::new(),
        }
    }

    pub fn rule(mut self, verbs: &[&str], resources: &[&str]) -> Self {
        self.verbs.extend(verbs.iter().map(|v| v.to_string()));
        self.resources.extend(resources.iter().map(|r| r.to_string()));
        self
    }
}

#[async_trait]
impl Descriptor for RoleDescription {
    fn reference(&self) -> TrackedResource {
        TrackedResource::namespaced("role", &self.name, &self.namespace)
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
                    .args(["role", self.name.as_str()])
                    .arg(format!("--verb={}", self.verbs.join(",")))
                    .arg(format!("--resource={}", self.resources.join(",")))
                    .namespace(&self.namespace)
                    .execute(tc.client())
                    .await
            }
        }
    }
}

/// Binds a Role or ClusterRole to a user or service account
#[derive(Debug, Clone, Deserialize)]
pub struct RoleBindingDescription {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    /// `role` or `clusterrole`
    #[serde(default = "default_role_kind")]
    pub role_kind: String,
    pub role: String,
    #[serde(default)]
    pub user: Option<String>,
    /// `namespace:name`
    #[serde(default)]
    pub service_account: Option<String>,
    #[serde(default)]
    pub template: Option<String>,
}

fn default_role_kind() -> String {
    "role".to_string()
}

impl RoleBindingDescription {
    pub fn new(name: &str, namespace: &str, role: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            role_kind: default_role_kind(),
            role: role.to_string(),
            user: None,
            service_account: None,
            template: None,
        }
    }

    pub fn cluster_role(mut self) -> Self {
        self.role_kind = "clusterrole".to_string();
        self
    }

    pub fn for_service_account(mut self, namespace: &str, name: &str) -> Self {
        self.service_account = Some(format!("{}:{}", namespace, name));
        self
    }

    pub fn for_user(mut self, user: &str) -> Self {
        self.user = Some(user.to_string());
        self
    }
}

#[async_trait]
impl Descriptor for RoleBindingDescription {
    fn reference(&self) -> TrackedResource {
        TrackedResource::namespaced("rolebinding", &self.name, &self.namespace)
    }

    async fn apply(&self, tc: &TestCase) -> Result<()> {
        if let Some(template) = &self.template {
            return tc
                .template(template)
                .param("NAME", &self.name)
                .param("NAMESPACE", &self.namespace)
                .param("ROLE", &self.role)
                .param_opt("SA", self.service_account.as_deref())
                .apply(tc.client(), Scope::Admin)
                .await;
        }
        let mut inv = Invocation::new("create")
            .args(["rolebinding", self.name.as_str()])
            .arg(format!("--{}={}", self.role_kind, self.role));
        if let Some(user) = &self.user {
            inv = inv.arg(format!("--user={}", user));
        }
        if let Some(sa) = &self.service_account {
            inv = inv.arg(format!("--serviceaccount={}", sa));
        }
        inv.namespace(&self.namespace).execute(tc.client()).await
    }
}
