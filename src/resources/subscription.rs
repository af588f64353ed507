//! Subscription descriptor
//!
//! The controller fills in `status.installplan`, `status.currentCSV` and
//! `status.installedCSV` asynchronously, so every accessor here polls; none
//! of them is set when `create` returns for a manual subscription.

use std::sync::Mutex;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::approval;
use crate::check::{Check, Comparator, Query};
use crate::cluster::{get_json, merge_patch, Scope};
use crate::common::{Error, Result};
use crate::context::TestCase;
use crate::tracker::TrackedResource;
use crate::wait::poll;

use super::olm::Subscription;
use super::Descriptor;

/// InstallPlan approval mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum Approval {
    #[default]
    Automatic,
    Manual,
}

impl Approval {
    pub fn as_str(self) -> &'static str {
        match self {
            Approval::Automatic => "Automatic",
            Approval::Manual => "Manual",
        }
    }
}

/// A Subscription plus the CSV it ends up installing
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionDescription {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    pub channel: String,
    #[serde(default)]
    pub approval: Approval,
    pub package: String,
    pub catalog_source_name: String,
    #[serde(default)]
    pub catalog_source_namespace: String,
    #[serde(default)]
    pub starting_csv: Option<String>,
    #[serde(default = "default_template")]
    pub template: String,

    /// Filled in by polling
    #[serde(skip)]
    pub installed_csv: Option<String>,
    #[serde(skip)]
    pub current_csv: Option<String>,
    #[serde(skip)]
    pub install_plan: Option<String>,
}

fn default_template() -> String {
    "olm-subscription.yaml".to_string()
}

impl SubscriptionDescription {
    pub fn new(name: &str, namespace: &str, package: &str, channel: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            channel: channel.to_string(),
            approval: Approval::Automatic,
            package: package.to_string(),
            catalog_source_name: String::new(),
            catalog_source_namespace: "openshift-marketplace".to_string(),
            starting_csv: None,
            template: default_template(),
            installed_csv: None,
            current_csv: None,
            install_plan: None,
        }
    }

    pub fn from_catalog(mut self, name: &str, namespace: &str) -> Self {
        self.catalog_source_name = name.to_string();
        self.catalog_source_namespace = namespace.to_string();
        self
    }

    pub fn manual(mut self) -> Self {
        self.approval = Approval::Manual;
        self
    }

    pub fn starting_csv(mut self, csv: &str) -> Self {
        self.starting_csv = Some(csv.to_string());
        self
    }

    async fn fetch(&self, tc: &TestCase) -> Result<Subscription> {
        get_json(tc.client(), Scope::Admin, "subscription", &self.name, Some(&self.namespace)).await
    }

    /// Poll the subscription until `field` yields a value
    async fn poll_status<F>(&self, tc: &TestCase, what: &str, field: F) -> Result<String>
    where
        F: Fn(&Subscription) -> Option<String>,
    {
        let found = Mutex::new(None);
        let last_state = Mutex::new(String::new());
        let timeout = tc.settings().readiness_timeout;

        let outcome = poll(tc.settings().interval, timeout, || async {
            let sub = self.fetch(tc).await?;
            if let Ok(mut state) = last_state.lock() {
                *state = sub.status.state.clone().unwrap_or_default();
            }
            match field(&sub).filter(|v| !v.is_empty()) {
                Some(value) => {
                    if let Ok(mut slot) = found.lock() {
                        *slot = Some(value);
                    }
                    Ok(true)
                }
                None => Ok(false),
            }
        })
        .await;

        let value = found.into_inner().ok().flatten();
        match (outcome, value) {
            (Ok(()), Some(value)) => Ok(value),
            (outcome, _) => {
                let state = last_state.into_inner().unwrap_or_default();
                let last = match outcome.err().and_then(|t| t.last_error) {
                    Some(err) => format!("state '{}' ({})", state, err),
                    None => format!("state '{}'", state),
                };
                Err(Error::timeout(
                    format!("subscription '{}' reporting {}", self.name, what),
                    timeout.as_secs(),
                    last,
                ))
            }
        }
    }

    fn csv_reference(&self, csv: &str) -> TrackedResource {
        TrackedResource::namespaced("csv", csv, &self.namespace)
    }

    /// Wait for `status.installedCSV`, record it, and track the CSV
    pub async fn find_installed_csv(&mut self, tc: &TestCase) -> Result<String> {
        let csv = self
            .poll_status(tc, "an installed CSV", |s| s.status.installed_csv.clone())
            .await?;
        tc.track(self.csv_reference(&csv));
        self.installed_csv = Some(csv.clone());
        Ok(csv)
    }

    /// Wait for `status.installplan.name`
    pub async fn get_ip(&mut self, tc: &TestCase) -> Result<String> {
        let ip = self
            .poll_status(tc, "an InstallPlan", |s| {
                s.status.installplan.as_ref().map(|ip| ip.name.clone())
            })
            .await?;
        self.install_plan = Some(ip.clone());
        Ok(ip)
    }

    /// Wait for `status.currentCSV`
    pub async fn get_current_csv(&mut self, tc: &TestCase) -> Result<String> {
        let csv = self
            .poll_status(tc, "a current CSV", |s| s.status.current_csv.clone())
            .await?;
        self.current_csv = Some(csv.clone());
        Ok(csv)
    }

    /// Wait until `status.installedCSV` equals `csv`
    pub async fn expect_csv(&mut self, tc: &TestCase, csv: &str) -> Result<()> {
        Check::new(
            Comparator::Compare,
            csv,
            Query::jsonpath("subscription", &self.name, &self.namespace, "{.status.installedCSV}"),
        )
        .timeout(tc.settings().readiness_timeout)
        .check(tc)
        .await?;
        tc.track(self.csv_reference(csv));
        self.installed_csv = Some(csv.to_string());
        Ok(())
    }

    /// Approve whichever InstallPlan the subscription currently references
    /// and wait for the plan to complete
    pub async fn approve(&mut self, tc: &TestCase) -> Result<()> {
        let ip = approval::wait_for_install_plan(tc, &self.namespace, &self.name).await?;
        approval::approve_install_plan(tc, &self.namespace, &ip).await?;
        self.install_plan = Some(ip.clone());
        approval::wait_install_plan_phase(tc, &self.namespace, &ip, "Complete").await
    }

    /// Approve the plan of this subscription that installs `csv` and wait for
    /// the plan to reach `phase`
    pub async fn approve_specific_ip(&mut self, tc: &TestCase, csv: &str, phase: &str) -> Result<()> {
        let ip = approval::approve_specific_ip(tc, &self.namespace, &self.name, csv, phase).await?;
        tc.track(self.csv_reference(csv));
        self.install_plan = Some(ip);
        Ok(())
    }

    /// Merge-patch the subscription
    pub async fn patch(&self, tc: &TestCase, patch: &serde_json::Value) -> Result<()> {
        merge_patch(tc.client(), Scope::Admin, "subscription", &self.name, Some(&self.namespace), patch).await
    }

    /// Switch to another channel
    pub async fn update_channel(&mut self, tc: &TestCase, channel: &str) -> Result<()> {
        self.patch(tc, &json!({"spec": {"channel": channel}})).await?;
        self.channel = channel.to_string();
        Ok(())
    }

    /// Delete the installed CSV, leaving the subscription in place
    pub async fn delete_csv(&mut self, tc: &TestCase) -> Result<()> {
        let Some(csv) = self.installed_csv.take() else {
            return Ok(());
        };
        let reference = self.csv_reference(&csv);
        reference.delete(tc.client()).await?;
        tc.untrack(&reference);
        Ok(())
    }
}

#[async_trait]
impl Descriptor for SubscriptionDescription {
    fn reference(&self) -> TrackedResource {
        TrackedResource::namespaced("subscription", &self.name, &self.namespace)
    }

    async fn apply(&self, tc: &TestCase) -> Result<()> {
        tc.template(&self.template)
            .param("SUBNAME", &self.name)
            .param("SUBNAMESPACE", &self.namespace)
            .param("CHANNEL", &self.channel)
            .param("APPROVAL", self.approval.as_str())
            .param("OPERATORNAME", &self.package)
            .param("SOURCENAME", &self.catalog_source_name)
            .param("SOURCENAMESPACE", &self.catalog_source_namespace)
            .param("STARTINGCSV", self.starting_csv.as_deref().unwrap_or(""))
            .apply(tc.client(), Scope::Admin)
            .await
    }

    /// Automatic approval waits for the installed CSV to succeed; manual
    /// approval waits for the pending InstallPlan
    async fn create(&mut self, tc: &TestCase) -> Result<()> {
        self.create_without_check(tc).await?;
        match self.approval {
            Approval::Automatic => {
                let csv = self.find_installed_csv(tc).await?;
                approval::wait_csv_phase(tc, &self.namespace, &csv, "Succeeded").await
            }
            Approval::Manual => {
                Check::new(
                    Comparator::Compare,
                    "UpgradePending",
                    Query::jsonpath("subscription", &self.name, &self.namespace, "{.status.state}"),
                )
                .timeout(tc.settings().readiness_timeout)
                .check(tc)
                .await?;
                self.get_ip(tc).await.map(|_| ())
            }
        }
    }
}
