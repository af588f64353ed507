//! Test runner implementation
//!
//! Executes a scenario inside a [`TestCase`], so everything the steps create
//! is deleted again whether the scenario passes, fails, or panics.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use colored::Colorize;
use tokio::process::Command as TokioCommand;

use crate::check::CheckList;
use crate::cluster::{merge_patch, ClusterClient, OcClient};
use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::context::TestCase;
use crate::resources::{Descriptor, ProjectDescription, ResourceSpec, SubscriptionDescription};
use crate::tracker::LifecycleTracker;

use super::config::{expand, TestScenario, TestStep};

/// Result of a test run
#[derive(Debug)]
pub struct TestResult {
    pub name: String,
    pub passed: bool,
    pub steps_run: usize,
    pub steps_total: usize,
    pub error: Option<String>,
}

/// Load and parse a scenario file
pub fn load_scenario(path: &Path) -> Result<TestScenario> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
        path: path.display().to_string(),
        error: e.to_string(),
    })?;
    serde_yaml::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse test scenario '{}': {}", path.display(), e)))
}

/// Run a test scenario from a YAML file against the configured cluster
pub async fn run_scenario(path: &Path, config: &Config, verbose: bool) -> Result<TestResult> {
    let scenario = load_scenario(path)?;
    let scenario_dir = path.parent().unwrap_or(Path::new("."));
    let client: Arc<dyn ClusterClient> = Arc::new(OcClient::from_config(config)?);
    run_with_client(scenario, scenario_dir, client, config, verbose).await
}

/// Run an already parsed scenario through `client`
///
/// Relative paths in the scenario resolve against `base_dir`.
pub async fn run_with_client(
    scenario: TestScenario,
    base_dir: &Path,
    client: Arc<dyn ClusterClient>,
    config: &Config,
    verbose: bool,
) -> Result<TestResult> {
    let steps_total = scenario.steps.len();

    println!(
        "\n{} {}",
        "Running Test:".blue().bold(),
        scenario.name.white().bold()
    );

    if let Some(desc) = &scenario.description {
        println!("  {}", desc.dimmed());
    }

    if let Some(setup_steps) = &scenario.setup {
        println!("\n{}", "Setup:".cyan());
        for step in setup_steps {
            if verbose {
                println!("  $ {}", step.shell.dimmed());
            }

            let status = TokioCommand::new("sh")
                .arg("-c")
                .arg(&step.shell)
                .current_dir(base_dir)
                .stdin(Stdio::null())
                .stdout(if verbose { Stdio::inherit() } else { Stdio::null() })
                .stderr(if verbose { Stdio::inherit() } else { Stdio::null() })
                .status()
                .await
                .map_err(|e| Error::Config(format!("Setup command failed to execute: {}", e)))?;

            if !status.success() {
                return Ok(TestResult {
                    name: scenario.name.clone(),
                    passed: false,
                    steps_run: 0,
                    steps_total,
                    error: Some(format!(
                        "Setup command '{}' failed with exit code {:?}",
                        step.shell,
                        status.code()
                    )),
                });
            }
            println!("  {} {}", "✓".green(), step.shell.dimmed());
        }
    }

    let mut tc = TestCase::new(&scenario.name, client, LifecycleTracker::new()).configured(config);
    if let Some(namespace) = &scenario.namespace {
        tc = tc.with_namespace(namespace);
    }
    if let Some(dir) = &scenario.templates {
        tc = tc.with_template_dir(resolve(base_dir, dir));
    }

    if verbose {
        println!("  Namespace: {}", tc.namespace().dimmed());
    }

    println!("\n{}", "Steps:".cyan());

    let progress = AtomicUsize::new(0);
    let outcome = tc
        .run(|tc| execute_steps(tc, &scenario, base_dir, &progress, verbose))
        .await;
    let steps_run = progress.load(Ordering::SeqCst);

    match outcome {
        Ok(()) => {
            println!("\n{} {}\n", "✓".green().bold(), "Test Passed".green().bold());
            Ok(TestResult {
                name: scenario.name,
                passed: true,
                steps_run,
                steps_total,
                error: None,
            })
        }
        Err(e) => {
            println!("\n{} {}\n", "✗".red().bold(), "Test Failed".red().bold());
            Ok(TestResult {
                name: scenario.name,
                passed: false,
                steps_run,
                steps_total,
                error: Some(e.to_string()),
            })
        }
    }
}

fn resolve(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_relative() {
        base_dir.join(path)
    } else {
        path.to_path_buf()
    }
}

async fn execute_steps(
    tc: TestCase,
    scenario: &TestScenario,
    base_dir: &Path,
    progress: &AtomicUsize,
    verbose: bool,
) -> Result<()> {
    if scenario.create_namespace {
        ProjectDescription::new(tc.namespace()).create(&tc).await?;
        println!("  {} project {}", "✓".green(), tc.namespace().dimmed());
    }

    // Resources created so far, by name, for later steps to refer to
    let mut created: HashMap<String, ResourceSpec> = HashMap::new();

    for (i, step) in scenario.steps.iter().enumerate() {
        let step_num = i + 1;
        progress.store(step_num, Ordering::SeqCst);

        match execute_step(&tc, step, &mut created, base_dir, verbose).await {
            Ok(()) => println!("  {} Step {}: {}", "✓".green(), step_num, step.label().dimmed()),
            Err(e) => {
                println!("  {} Step {}: {}", "✗".red(), step_num, e);
                return Err(e);
            }
        }
    }
    Ok(())
}

/// Execute a single test step
async fn execute_step(
    tc: &TestCase,
    step: &TestStep,
    created: &mut HashMap<String, ResourceSpec>,
    base_dir: &Path,
    verbose: bool,
) -> Result<()> {
    match step {
        TestStep::Create { resource } => {
            let mut resource = resource.clone();
            resource.default_namespace(tc.namespace());
            resource.descriptor_mut().create(tc).await?;
            created.insert(resource.descriptor().reference().name, resource);
            Ok(())
        }
        TestStep::CreateWithoutCheck { resource } => {
            let mut resource = resource.clone();
            resource.default_namespace(tc.namespace());
            resource.descriptor().create_without_check(tc).await?;
            created.insert(resource.descriptor().reference().name, resource);
            Ok(())
        }
        TestStep::Delete { name } => {
            let resource = created
                .remove(name)
                .ok_or_else(|| Error::Config(format!("No resource named '{}' was created by this scenario", name)))?;
            resource.descriptor().delete(tc).await
        }
        TestStep::Check(spec) => spec.to_check(tc.namespace()).check(tc).await,
        TestStep::CheckList { checks } => {
            let list: CheckList = checks.iter().map(|c| c.to_check(tc.namespace())).collect();
            list.check(tc).await
        }
        TestStep::Approve { subscription } => subscription_mut(created, subscription)?.approve(tc).await,
        TestStep::ApproveSpecificIp {
            subscription,
            csv,
            phase,
        } => {
            let csv = expand(csv, tc.namespace());
            subscription_mut(created, subscription)?
                .approve_specific_ip(tc, &csv, phase)
                .await
        }
        TestStep::ExpectCsv { subscription, csv } => {
            let csv = expand(csv, tc.namespace());
            subscription_mut(created, subscription)?.expect_csv(tc, &csv).await
        }
        TestStep::Patch {
            kind,
            name,
            namespace,
            scope,
            patch,
        } => {
            let namespace = namespace
                .as_deref()
                .map(|ns| expand(ns, tc.namespace()))
                .unwrap_or_else(|| tc.namespace().to_string());
            let patch: serde_json::Value = serde_json::from_str(&expand(&patch.to_string(), tc.namespace()))?;
            merge_patch(tc.client(), *scope, kind, name, Some(&namespace), &patch).await
        }
        TestStep::Shell {
            command,
            expect_failure,
        } => run_shell(tc, command, *expect_failure, base_dir, verbose).await,
    }
}

fn subscription_mut<'a>(
    created: &'a mut HashMap<String, ResourceSpec>,
    name: &str,
) -> Result<&'a mut SubscriptionDescription> {
    match created.get_mut(name) {
        Some(ResourceSpec::Subscription(sub)) => Ok(sub),
        Some(_) => Err(Error::Config(format!("'{}' is not a subscription", name))),
        None => Err(Error::Config(format!(
            "No subscription named '{}' was created by this scenario",
            name
        ))),
    }
}

async fn run_shell(tc: &TestCase, command: &str, expect_failure: bool, base_dir: &Path, verbose: bool) -> Result<()> {
    let output = TokioCommand::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(base_dir)
        .env("NAMESPACE", tc.namespace())
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| Error::Config(format!("Shell step failed to execute: {}", e)))?;

    if verbose {
        print!("{}", String::from_utf8_lossy(&output.stdout));
        eprint!("{}", String::from_utf8_lossy(&output.stderr));
    }

    if output.status.success() == expect_failure {
        return Err(Error::TestAssertion(format!(
            "'{}' expected {}, exited with {:?}",
            command,
            if expect_failure { "failure" } else { "success" },
            output.status.code()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::{ok, FakeCluster};

    fn fast_config() -> Config {
        Config::parse(
            "[timeouts]\ncheck_interval_secs = 1\ncheck_timeout_secs = 5\npresent_timeout_secs = 5\nreadiness_timeout_secs = 5\n",
        )
        .unwrap()
    }

    fn scenario(yaml: &str) -> TestScenario {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_scenario_passes_and_cleans_up() {
        let fake = Arc::new(FakeCluster::new());
        fake.on(&["get configmap settings"], vec![ok(""), ok("1")]);

        let result = run_with_client(
            scenario(
                r#"
name: configmap roundtrip
namespace: ns1
steps:
  - action: create
    resource: {kind: config_map, name: settings, data: {a: "1"}}
  - action: check
    comparator: compare
    expected: "1"
    query: [configmap, settings, "-n", "${NAMESPACE}", "-o=jsonpath={.data.a}"]
"#,
            ),
            Path::new("."),
            fake.clone(),
            &fast_config(),
            false,
        )
        .await
        .unwrap();

        assert!(result.passed, "{:?}", result.error);
        assert_eq!(result.steps_run, 2);
        let calls = fake.calls();
        assert_eq!(calls[0], "oc new-project ns1 --skip-config-write");
        assert_eq!(calls[1], "oc create configmap settings --from-literal=a=1 -n ns1");
        assert_eq!(
            &calls[calls.len() - 2..],
            &[
                "oc delete configmap settings --ignore-not-found -n ns1".to_string(),
                "oc delete project ns1 --ignore-not-found".to_string(),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_step_stops_and_reports() {
        let fake = Arc::new(FakeCluster::new());
        fake.on(&["get sub etcd"], vec![ok("UpgradePending")]);

        let result = run_with_client(
            scenario(
                r#"
name: failing check
namespace: ns2
create_namespace: false
steps:
  - action: check
    comparator: compare
    expected: AtLatestKnown
    query: [sub, etcd, "-o=jsonpath={.status.state}"]
    with_namespace: true
  - action: shell
    command: "true"
"#,
            ),
            Path::new("."),
            fake.clone(),
            &fast_config(),
            false,
        )
        .await
        .unwrap();

        assert!(!result.passed);
        assert_eq!(result.steps_run, 1);
        assert_eq!(result.steps_total, 2);
        assert!(result.error.unwrap().contains("UpgradePending"));
        assert!(fake.calls_matching("new-project").is_empty());
    }

    #[tokio::test]
    async fn test_unknown_subscription_is_a_config_error() {
        let fake = Arc::new(FakeCluster::new());
        let result = run_with_client(
            scenario(
                "name: bad ref\nnamespace: ns3\ncreate_namespace: false\nsteps:\n  - action: approve\n    subscription: missing\n",
            ),
            Path::new("."),
            fake,
            &Config::default(),
            false,
        )
        .await
        .unwrap();
        assert!(result.error.unwrap().contains("No subscription named 'missing'"));
    }

    #[tokio::test]
    async fn test_shell_step_sees_namespace() {
        let fake = Arc::new(FakeCluster::new());
        let result = run_with_client(
            scenario(
                "name: shell\nnamespace: ns4\ncreate_namespace: false\nsteps:\n  - action: shell\n    command: test \"$NAMESPACE\" = ns4\n  - action: shell\n    command: exit 3\n    expect_failure: true\n",
            ),
            Path::new("."),
            fake,
            &Config::default(),
            false,
        )
        .await
        .unwrap();
        assert!(result.passed, "{:?}", result.error);
    }
}
