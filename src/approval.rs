//! Manual InstallPlan approval and CSV phase convergence
//!
//! Under `Manual` approval OLM creates an InstallPlan with
//! `spec.approved=false` and waits. Driving it forward means finding the plan,
//! approving it, and then watching the plan and the CSV converge. Terminal
//! failure phases end a wait at once instead of running out the clock.

use std::sync::Mutex;

use serde_json::json;

use crate::cluster::{get_json, list_json, merge_patch, Scope};
use crate::common::{Error, Result};
use crate::context::TestCase;
use crate::resources::olm::{ClusterServiceVersion, InstallPlan, Subscription};
use crate::wait::poll;

/// Phase names OLM never leaves on its own
const INSTALL_PLAN_FAILED: &str = "Failed";
const CSV_FAILED: &str = "Failed";

/// Wait for the subscription to reference an InstallPlan and return its name
pub async fn wait_for_install_plan(tc: &TestCase, namespace: &str, subscription: &str) -> Result<String> {
    let found = Mutex::new(None);
    let last = Mutex::new(String::from("no status"));

    let outcome = poll(tc.settings().interval, tc.settings().readiness_timeout, || async {
        let sub: Subscription =
            get_json(tc.client(), Scope::Admin, "subscription", subscription, Some(namespace)).await?;
        *lock(&last) = sub.status.state.clone().unwrap_or_default();
        match sub.status.installplan {
            Some(ip) if !ip.name.is_empty() => {
                *lock(&found) = Some(ip.name);
                Ok(true)
            }
            _ => Ok(false),
        }
    })
    .await;

    match (outcome, take(found)) {
        (Ok(()), Some(name)) => Ok(name),
        (outcome, _) => Err(Error::timeout(
            format!("subscription '{}' referencing an InstallPlan", subscription),
            tc.settings().readiness_timeout.as_secs(),
            describe_last(take_string(last), outcome.err()),
        )),
    }
}

/// Set `spec.approved=true` on an InstallPlan
pub async fn approve_install_plan(tc: &TestCase, namespace: &str, install_plan: &str) -> Result<()> {
    merge_patch(
        tc.client(),
        Scope::Admin,
        "installplan",
        install_plan,
        Some(namespace),
        &json!({"spec": {"approved": true}}),
    )
    .await?;
    tracing::info!(test = %tc.name(), "approved installplan {} in {}", install_plan, namespace);
    Ok(())
}

/// All InstallPlans in `namespace` that would install `csv`
pub async fn install_plans_for_csv(tc: &TestCase, namespace: &str, csv: &str) -> Result<Vec<InstallPlan>> {
    let plans: Vec<InstallPlan> = list_json(tc.client(), Scope::Admin, "installplan", namespace).await?;
    Ok(plans.into_iter().filter(|ip| ip.targets_csv(csv)).collect())
}

/// Wait for the InstallPlan of `subscription` that targets `csv`
pub async fn find_install_plan_for_csv(
    tc: &TestCase,
    namespace: &str,
    subscription: &str,
    csv: &str,
) -> Result<InstallPlan> {
    let found = Mutex::new(None);

    let outcome = poll(tc.settings().interval, tc.settings().readiness_timeout, || async {
        let plans = install_plans_for_csv(tc, namespace, csv).await?;
        let plan = plans
            .into_iter()
            .find(|ip| ip.owned_by_subscription(subscription));
        let done = plan.is_some();
        *lock(&found) = plan;
        Ok(done)
    })
    .await;

    match (outcome, take(found)) {
        (Ok(()), Some(plan)) => Ok(plan),
        (outcome, _) => Err(Error::timeout(
            format!("InstallPlan for '{}' owned by subscription '{}'", csv, subscription),
            tc.settings().readiness_timeout.as_secs(),
            describe_last("no matching InstallPlan".to_string(), outcome.err()),
        )),
    }
}

/// Wait for an InstallPlan to reach `phase`, failing at once on `Failed`
pub async fn wait_install_plan_phase(
    tc: &TestCase,
    namespace: &str,
    install_plan: &str,
    phase: &str,
) -> Result<()> {
    let last = Mutex::new(None::<InstallPlan>);

    let outcome = poll(tc.settings().interval, tc.settings().readiness_timeout, || async {
        let ip: InstallPlan =
            get_json(tc.client(), Scope::Admin, "installplan", install_plan, Some(namespace)).await?;
        let current = ip.phase().to_string();
        *lock(&last) = Some(ip);
        Ok(current == phase || (current == INSTALL_PLAN_FAILED && phase != INSTALL_PLAN_FAILED))
    })
    .await;

    let last = lock(&last).take();
    match (outcome, last) {
        (Ok(()), Some(ip)) if ip.phase() == phase => Ok(()),
        (Ok(()), Some(ip)) => Err(Error::InstallPlanFailed {
            name: install_plan.to_string(),
            namespace: namespace.to_string(),
            message: ip.failure_message(),
        }),
        (outcome, last) => Err(Error::timeout(
            format!("InstallPlan '{}' reaching phase {}", install_plan, phase),
            tc.settings().readiness_timeout.as_secs(),
            describe_last(
                last.map(|ip| ip.phase().to_string()).unwrap_or_default(),
                outcome.err(),
            ),
        )),
    }
}

/// Wait for a CSV to reach `phase`, failing at once on `Failed`
pub async fn wait_csv_phase(tc: &TestCase, namespace: &str, csv: &str, phase: &str) -> Result<()> {
    let last = Mutex::new(None::<ClusterServiceVersion>);

    let outcome = poll(tc.settings().interval, tc.settings().readiness_timeout, || async {
        let object: ClusterServiceVersion =
            get_json(tc.client(), Scope::Admin, "csv", csv, Some(namespace)).await?;
        let current = object.status.phase.clone().unwrap_or_default();
        *lock(&last) = Some(object);
        Ok(current == phase || (current == CSV_FAILED && phase != CSV_FAILED))
    })
    .await;

    let last = lock(&last).take();
    let current = last
        .as_ref()
        .and_then(|c| c.status.phase.clone())
        .unwrap_or_default();
    match (outcome, last) {
        (Ok(()), _) if current == phase => {
            tracing::info!(test = %tc.name(), "csv {} reached {}", csv, phase);
            Ok(())
        }
        (Ok(()), Some(object)) => Err(Error::CsvFailed {
            name: csv.to_string(),
            namespace: namespace.to_string(),
            phase: current,
            message: object
                .status
                .message
                .or(object.status.reason)
                .unwrap_or_default(),
        }),
        (outcome, _) => Err(Error::timeout(
            format!("CSV '{}' reaching phase {}", csv, phase),
            tc.settings().readiness_timeout.as_secs(),
            describe_last(current, outcome.err()),
        )),
    }
}

/// Find, approve, and drive the plan of `subscription` targeting `csv`
///
/// Returns the plan's name once it reached `phase`.
pub async fn approve_specific_ip(
    tc: &TestCase,
    namespace: &str,
    subscription: &str,
    csv: &str,
    phase: &str,
) -> Result<String> {
    let plan = find_install_plan_for_csv(tc, namespace, subscription, csv).await?;
    let name = plan.metadata.name.clone();

    if plan.spec.approved {
        tracing::debug!("installplan {} is already approved", name);
    } else {
        approve_install_plan(tc, namespace, &name).await?;
    }

    wait_install_plan_phase(tc, namespace, &name, phase).await?;
    Ok(name)
}

/// Exactly one InstallPlan in `namespace` targets `csv`; returns its name
pub async fn ensure_single_install_plan(tc: &TestCase, namespace: &str, csv: &str) -> Result<String> {
    let plans = install_plans_for_csv(tc, namespace, csv).await?;
    match plans.as_slice() {
        [plan] => Ok(plan.metadata.name.clone()),
        _ => {
            let names: Vec<&str> = plans.iter().map(|p| p.metadata.name.as_str()).collect();
            Err(Error::TestAssertion(format!(
                "expected exactly one InstallPlan for '{}' in '{}', found {}: {:?}",
                csv,
                namespace,
                plans.len(),
                names
            )))
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn take<T>(m: Mutex<Option<T>>) -> Option<T> {
    m.into_inner().unwrap_or_else(|e| e.into_inner())
}

fn take_string(m: Mutex<String>) -> String {
    m.into_inner().unwrap_or_else(|e| e.into_inner())
}

fn describe_last(last: String, timeout: Option<crate::wait::WaitTimeout>) -> String {
    match timeout.and_then(|t| t.last_error) {
        Some(err) if last.is_empty() => err,
        Some(err) => format!("{} ({})", last, err),
        None => last,
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
        TestCase::new("approval", fake, LifecycleTracker::new())
            .with_namespace("ns1")
            .with_settings(PollSettings {
                interval: Duration::from_secs(3),
                check_timeout: Duration::from_secs(30),
                present_timeout: Duration::from_secs(30),
                readiness_timeout: Duration::from_secs(30),
            })
    }

    fn plan(name: &str, csv: &str, approved: bool, phase: &str) -> serde_json::Value {
        json!({
            "metadata": {
                "name": name,
                "ownerReferences": [{"kind": "Subscription", "name": "etcd"}]
            },
            "spec": {
                "clusterServiceVersionNames": [csv],
                "approval": "Manual",
                "approved": approved
            },
            "status": {"phase": phase}
        })
    }

    fn list(items: Vec<serde_json::Value>) -> String {
        json!({"kind": "List", "items": items}).to_string()
    }

    #[tokio::test(start_paused = true)]
    async fn test_approve_specific_ip_patches_and_waits_for_phase() {
        let fake = Arc::new(FakeCluster::new());
        fake.on(
            &["get installplan -o json"],
            vec![
                ok(&list(vec![])),
                ok(&list(vec![
                    plan("install-old", "etcdoperator.v0.9.0", true, "Complete"),
                    plan("install-new", "etcdoperator.v0.9.2", false, "RequiresApproval"),
                ])),
            ],
        );
        fake.on(&["patch installplan install-new"], vec![ok("patched")]);
        fake.on(
            &["get installplan install-new"],
            vec![
                ok(&plan("install-new", "etcdoperator.v0.9.2", true, "Installing").to_string()),
                ok(&plan("install-new", "etcdoperator.v0.9.2", true, "Complete").to_string()),
            ],
        );
        let tc = test_case(fake.clone());

        let name = approve_specific_ip(&tc, "ns1", "etcd", "etcdoperator.v0.9.2", "Complete")
            .await
            .unwrap();

        assert_eq!(name, "install-new");
        assert_eq!(
            fake.calls_matching("patch"),
            vec![r#"oc patch installplan install-new --type merge -p {"spec":{"approved":true}} -n ns1"#]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_install_plan_fails_fast() {
        let fake = Arc::new(FakeCluster::new());
        fake.on(
            &["get installplan install-1"],
            vec![ok(&json!({
                "metadata": {"name": "install-1"},
                "status": {
                    "phase": "Failed",
                    "conditions": [{"type": "Installed", "status": "False", "message": "bundle unpacking failed"}]
                }
            })
            .to_string())],
        );
        let tc = test_case(fake.clone());

        let err = wait_install_plan_phase(&tc, "ns1", "install-1", "Complete")
            .await
            .unwrap_err();
        match err {
            Error::InstallPlanFailed { message, .. } => assert_eq!(message, "bundle unpacking failed"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(fake.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_csv_phase_fails_fast_and_times_out() {
        let fake = Arc::new(FakeCluster::new());
        fake.on(
            &["get csv broken.v1"],
            vec![ok(r#"{"metadata":{"name":"broken.v1"},"status":{"phase":"Failed","reason":"InstallComponentFailed"}}"#)],
        );
        fake.on(
            &["get csv slow.v1"],
            vec![ok(r#"{"metadata":{"name":"slow.v1"},"status":{"phase":"Installing"}}"#)],
        );
        let tc = test_case(fake.clone());

        let err = wait_csv_phase(&tc, "ns1", "broken.v1", "Succeeded").await.unwrap_err();
        match err {
            Error::CsvFailed { phase, message, .. } => {
                assert_eq!(phase, "Failed");
                assert_eq!(message, "InstallComponentFailed");
            }
            other => panic!("unexpected error: {other}"),
        }

        let err = wait_csv_phase(&tc, "ns1", "slow.v1", "Succeeded").await.unwrap_err();
        match err {
            Error::Timeout { last, .. } => assert_eq!(last, "Installing"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_ensure_single_install_plan() {
        let fake = Arc::new(FakeCluster::new());
        fake.on(
            &["get installplan -o json"],
            vec![ok(&list(vec![
                plan("install-a", "etcdoperator.v0.9.2", true, "Complete"),
                plan("install-b", "etcdoperator.v0.9.4", false, "RequiresApproval"),
            ]))],
        );
        let tc = test_case(fake.clone());

        assert_eq!(
            ensure_single_install_plan(&tc, "ns1", "etcdoperator.v0.9.2").await.unwrap(),
            "install-a"
        );
        let err = ensure_single_install_plan(&tc, "ns1", "etcdoperator.v1.0.0")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("found 0"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_install_plan_reads_status() {
        let fake = Arc::new(FakeCluster::new());
        fake.on(
            &["get subscription etcd"],
            vec![
                ok(r#"{"metadata":{"name":"etcd"},"status":{}}"#),
                ok(r#"{"metadata":{"name":"etcd"},"status":{"state":"UpgradePending","installplan":{"name":"install-xyz"}}}"#),
            ],
        );
        let tc = test_case(fake.clone());
        assert_eq!(
            wait_for_install_plan(&tc, "ns1", "etcd").await.unwrap(),
            "install-xyz"
        );
    }
}
