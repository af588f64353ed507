//! CLI command handling
//!
//! Dispatches CLI commands and formats their output.

use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;

use crate::check::{Check, Comparator, Query};
use crate::cluster::{ClusterClient, OcClient};
use crate::commands::{ComparatorArg, Commands};
use crate::common::config::Config;
use crate::common::{paths, Error, Result};
use crate::context::TestCase;
use crate::testing::{run_scenario, TestResult};
use crate::tracker::LifecycleTracker;

impl From<ComparatorArg> for Comparator {
    fn from(arg: ComparatorArg) -> Self {
        match arg {
            ComparatorArg::Compare => Comparator::Compare,
            ComparatorArg::NotCompare => Comparator::NotCompare,
            ComparatorArg::Contain => Comparator::Contain,
            ComparatorArg::NotContain => Comparator::NotContain,
            ComparatorArg::Present => Comparator::Present,
            ComparatorArg::NotPresent => Comparator::NotPresent,
        }
    }
}

/// Dispatch a CLI command
pub async fn dispatch(command: Commands) -> Result<()> {
    let config = Config::load()?;

    match command {
        Commands::Run {
            paths,
            verbose,
            keep_going,
        } => {
            let mut results = Vec::new();
            for path in &paths {
                let result = run_scenario(path, &config, verbose).await?;
                let failed = !result.passed;
                results.push(result);
                if failed && !keep_going {
                    break;
                }
            }
            print_summary(&results, paths.len());

            let failures = results.iter().filter(|r| !r.passed).count();
            if failures > 0 {
                return Err(Error::TestAssertion(format!(
                    "{} of {} scenarios failed",
                    failures,
                    results.len()
                )));
            }
            Ok(())
        }

        Commands::Check {
            comparator,
            expected,
            namespace,
            as_user,
            timeout,
            query,
        } => {
            let client: Arc<dyn ClusterClient> = Arc::new(OcClient::from_config(&config)?);
            let mut tc = TestCase::new("olmtest check", client, LifecycleTracker::new()).configured(&config);
            let mut check = Check::new(comparator.into(), expected, Query::new(query));
            if let Some(ns) = namespace {
                tc = tc.with_namespace(ns);
                check = check.with_namespace();
            }
            if as_user {
                check = check.as_user();
            }
            if let Some(secs) = timeout {
                check = check.timeout(Duration::from_secs(secs));
            }

            let description = check.description();
            let result = check.check(&tc).await;
            tc.finish().await;
            result?;
            println!("{} {}", "✓".green(), description);
            Ok(())
        }

        Commands::Config => {
            match paths::config_path() {
                Some(path) => println!("Config file: {}", path.display()),
                None => println!("Config file: (no config directory)"),
            }
            match config.cli_binary() {
                Ok(binary) => println!("oc binary:   {}", binary.display()),
                Err(e) => println!("oc binary:   {}", e.to_string().red()),
            }
            if let Some(kubeconfig) = &config.cli.admin_kubeconfig {
                println!("Admin kubeconfig: {}", kubeconfig.display());
            }
            if let Some(kubeconfig) = &config.cli.user_kubeconfig {
                println!("User kubeconfig:  {}", kubeconfig.display());
            }
            let t = &config.timeouts;
            println!(
                "Timeouts:    interval {}s, check {}s, present {}s, readiness {}s",
                t.check_interval_secs, t.check_timeout_secs, t.present_timeout_secs, t.readiness_timeout_secs
            );
            if let Some(dir) = &config.templates.dir {
                println!("Templates:   {}", dir.display());
            }
            Ok(())
        }
    }
}

fn print_summary(results: &[TestResult], requested: usize) {
    if requested < 2 {
        return;
    }
    println!("{}", "Summary:".cyan().bold());
    for result in results {
        if result.passed {
            println!("  {} {}", "✓".green(), result.name);
        } else {
            println!(
                "  {} {} (step {}/{}): {}",
                "✗".red(),
                result.name,
                result.steps_run,
                result.steps_total,
                result.error.as_deref().unwrap_or("")
            );
        }
    }
    if results.len() < requested {
        println!("  {} scenarios skipped", requested - results.len());
    }
}
