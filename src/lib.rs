//! olmtest - OLM end-to-end test harness core
//!
//! Tests drive a live Operator Lifecycle Manager installation through the
//! `oc` CLI. Descriptors create OLM objects and register them for cleanup,
//! checks poll until the cluster converges, and the approval helpers walk
//! OLM's manual InstallPlan workflow.
//!
//! ```ignore
//! let tc = TestCase::new("installs etcd", client, tracker);
//! tc.run(|tc| async move {
//!     let mut sub = SubscriptionDescription::new("etcd", tc.namespace(), "etcd", "singlenamespace-alpha")
//!         .from_catalog("community-operators", "openshift-marketplace")
//!         .manual();
//!     sub.create(&tc).await?;
//!     sub.approve_specific_ip(&tc, "etcdoperator.v0.9.2", "Complete").await
//! })
//! .await?;
//! ```

pub mod approval;
pub mod check;
pub mod cli;
pub mod cluster;
pub mod commands;
pub mod common;
pub mod context;
pub mod resources;
pub mod testing;
pub mod tracker;
pub mod wait;

// Re-export commonly used types for tests
pub use check::{Check, CheckList, Comparator, Expected, Query};
pub use cluster::{ClusterClient, Invocation, OcClient, Scope};
pub use common::{Error, Result};
pub use context::TestCase;
pub use tracker::{LifecycleTracker, TrackedResource};
