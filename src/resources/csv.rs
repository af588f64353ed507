//! ClusterServiceVersion handle
//!
//! CSVs are created by OLM from an approved InstallPlan, never by the tests,
//! so this only reads, waits on and deletes them.

use crate::approval;
use crate::cluster::{get_json, Scope};
use crate::common::Result;
use crate::context::TestCase;
use crate::tracker::TrackedResource;

use super::olm::ClusterServiceVersion;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvDescription {
    pub name: String,
    pub namespace: String,
}

impl CsvDescription {
    pub fn new(name: &str, namespace: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
        }
    }

    pub fn reference(&self) -> TrackedResource {
        TrackedResource::namespaced("csv", &self.name, &self.namespace)
    }

    /// Current `status.phase`, empty while OLM has not reported one
    pub async fn phase(&self, tc: &TestCase) -> Result<String> {
        let csv: ClusterServiceVersion =
            get_json(tc.client(), Scope::Admin, "csv", &self.name, Some(&self.namespace)).await?;
        Ok(csv.status.phase.unwrap_or_default())
    }

    pub async fn wait_phase(&self, tc: &TestCase, phase: &str) -> Result<()> {
        approval::wait_csv_phase(tc, &self.namespace, &self.name, phase).await
    }

    /// Delete the CSV and drop it from the tracker
    pub async fn delete(&self, tc: &TestCase) -> Result<()> {
        let reference = self.reference();
        reference.delete(tc.client()).await?;
        tc.untrack(&reference);
        tracing::info!(test = %tc.name(), "deleted {}", reference);
        Ok(())
    }
}
