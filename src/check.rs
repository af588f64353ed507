//! Polling assertions against cluster state
//!
//! A [`Check`] runs one CLI query over and over until its comparator holds or
//! its timeout elapses. Queries normally project a single field with
//! `-o=jsonpath=...`; the comparator then works on that text.
//!
//! ```ignore
//! Check::new(Comparator::Compare, "Succeeded", Query::jsonpath("csv", &csv, &ns, "{.status.phase}"))
//!     .check(&tc)
//!     .await?;
//! ```

use std::time::Duration;

use futures_util::future::join_all;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::cluster::{CliOutput, Invocation, Scope};
use crate::common::error::is_not_found_output;
use crate::common::{truncate_output, Error, Result};
use crate::context::TestCase;
use crate::wait::poll;

/// Delimiter joining alternatives in an expected-value string
pub const ALTERNATIVE_DELIMITER: &str = "+2+";

/// How the observed text is compared with the expectation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    /// Trimmed output equals one of the alternatives
    Compare,
    /// Trimmed output equals none of the alternatives
    NotCompare,
    /// Output contains one of the alternatives
    Contain,
    /// Output contains none of the alternatives
    NotContain,
    /// The queried object exists
    Present,
    /// The queried object does not exist
    NotPresent,
}

impl Comparator {
    fn is_presence(self) -> bool {
        matches!(self, Comparator::Present | Comparator::NotPresent)
    }

    fn describe(self) -> &'static str {
        match self {
            Comparator::Compare => "equal",
            Comparator::NotCompare => "differ from",
            Comparator::Contain => "contain",
            Comparator::NotContain => "not contain",
            Comparator::Present => "be present",
            Comparator::NotPresent => "be absent",
        }
    }

    /// Decide whether `output` satisfies this comparator
    pub fn evaluate(self, expected: &Expected, output: &CliOutput) -> bool {
        match self {
            Comparator::Present => output.success() && !is_absent(output),
            Comparator::NotPresent => is_absent(output),
            // A failed query carries no value to compare
            _ if !output.success() => false,
            Comparator::Compare => expected.equals_any(&output.stdout),
            Comparator::NotCompare => !expected.equals_any(&output.stdout),
            Comparator::Contain => expected.contained_in(&output.stdout),
            Comparator::NotContain => !expected.contained_in(&output.stdout),
        }
    }
}

/// An object is absent when the CLI says so, or a list query came back empty
fn is_absent(output: &CliOutput) -> bool {
    if output.success() {
        output.stdout.trim().is_empty() || output.stderr.contains("No resources found")
    } else {
        is_not_found_output(&output.stderr) || is_not_found_output(&output.stdout)
    }
}

/// Expected value: one or more alternatives
///
/// `"Succeeded+2+Installing"` parses into two alternatives; the check holds
/// when the observed value matches either. The delimiter has no escape and
/// alternatives are unordered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expected(Vec<String>);

impl Expected {
    pub fn parse(text: &str) -> Self {
        Self(text.split(ALTERNATIVE_DELIMITER).map(str::to_string).collect())
    }

    pub fn any_of<I, S>(alternatives: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(alternatives.into_iter().map(Into::into).collect())
    }

    pub fn alternatives(&self) -> &[String] {
        &self.0
    }

    fn equals_any(&self, actual: &str) -> bool {
        let actual = actual.trim();
        self.0.iter().any(|alt| alt.trim() == actual)
    }

    fn contained_in(&self, actual: &str) -> bool {
        self.0.iter().any(|alt| actual.contains(alt.as_str()))
    }
}

impl From<&str> for Expected {
    fn from(text: &str) -> Self {
        Self::parse(text)
    }
}

impl From<String> for Expected {
    fn from(text: String) -> Self {
        Self::parse(&text)
    }
}

impl std::fmt::Display for Expected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "'{}'", self.0.join("' or '"))
    }
}

/// The `get` arguments of a check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub args: Vec<String>,
}

impl Query {
    /// Arbitrary `get` arguments, exactly as on the command line
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// `get <kind> <name> -n <ns> -o=jsonpath=<expr>`
    pub fn jsonpath(kind: &str, name: &str, namespace: &str, expr: &str) -> Self {
        Self::new([
            kind.to_string(),
            name.to_string(),
            "-n".to_string(),
            namespace.to_string(),
            format!("-o=jsonpath={}", expr),
        ])
    }

    /// `get <kind> <name> -o=jsonpath=<expr>` for cluster-scoped kinds
    pub fn cluster_jsonpath(kind: &str, name: &str, expr: &str) -> Self {
        Self::new([
            kind.to_string(),
            name.to_string(),
            format!("-o=jsonpath={}", expr),
        ])
    }

    /// `get <kind> <name> [-n <ns>]`, for presence checks
    pub fn object(kind: &str, name: &str, namespace: Option<&str>) -> Self {
        let mut args = vec![kind.to_string(), name.to_string()];
        if let Some(ns) = namespace {
            args.push("-n".to_string());
            args.push(ns.to_string());
        }
        Self::new(args)
    }

    /// The kind, name and namespace the query addresses, for diagnostic dumps
    fn target(&self) -> (Option<&str>, Option<&str>, Option<&str>) {
        let mut namespace = None;
        let mut positional = Vec::new();
        let mut args = self.args.iter();
        while let Some(arg) = args.next() {
            if arg == "-n" || arg == "--namespace" {
                namespace = args.next().map(String::as_str);
            } else if let Some(ns) = arg
                .strip_prefix("--namespace=")
                .or_else(|| arg.strip_prefix("-n="))
            {
                namespace = Some(ns);
            } else if !arg.starts_with('-') {
                positional.push(arg.as_str());
            }
        }
        (
            positional.first().copied(),
            positional.get(1).copied(),
            namespace,
        )
    }
}

/// One polling assertion
#[derive(Debug, Clone)]
pub struct Check {
    pub comparator: Comparator,
    pub expected: Expected,
    pub query: Query,
    pub scope: Scope,
    /// Inline the test case's namespace (`withNamespace`)
    pub inline_namespace: bool,
    pub interval: Option<Duration>,
    pub timeout: Option<Duration>,
}

impl Check {
    pub fn new(comparator: Comparator, expected: impl Into<Expected>, query: Query) -> Self {
        Self {
            comparator,
            expected: expected.into(),
            query,
            scope: Scope::Admin,
            inline_namespace: false,
            interval: None,
            timeout: None,
        }
    }

    /// Presence check for an object
    pub fn present(query: Query) -> Self {
        Self::new(Comparator::Present, "", query)
    }

    /// Absence check for an object
    pub fn not_present(query: Query) -> Self {
        Self::new(Comparator::NotPresent, "", query)
    }

    pub fn as_admin(mut self) -> Self {
        self.scope = Scope::Admin;
        self
    }

    pub fn as_user(mut self) -> Self {
        self.scope = Scope::User;
        self
    }

    /// Add `-n <test namespace>` to the query
    pub fn with_namespace(mut self) -> Self {
        self.inline_namespace = true;
        self
    }

    /// Use the namespace spelled out in the query, if any
    pub fn without_namespace(mut self) -> Self {
        self.inline_namespace = false;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// One-line description for logs and failure messages
    pub fn description(&self) -> String {
        let query = format!("oc get {}", self.query.args.join(" "));
        if self.comparator.is_presence() {
            format!("'{}' should {}", query, self.comparator.describe())
        } else {
            format!(
                "'{}' should {} {}",
                query,
                self.comparator.describe(),
                self.expected
            )
        }
    }

    fn invocation(&self, tc: &TestCase) -> Invocation {
        let inv = Invocation::new("get")
            .args(self.query.args.iter().cloned())
            .scope(self.scope);
        if self.inline_namespace {
            inv.namespace(tc.namespace())
        } else {
            inv
        }
    }

    fn durations(&self, tc: &TestCase) -> (Duration, Duration) {
        let settings = tc.settings();
        let default_timeout = if self.comparator.is_presence() {
            settings.present_timeout
        } else {
            settings.check_timeout
        };
        (
            self.interval.unwrap_or(settings.interval),
            self.timeout.unwrap_or(default_timeout),
        )
    }

    /// Poll until the comparator holds; on timeout the error carries the
    /// last observed output and no diagnostics are collected
    pub async fn check_without_assert(&self, tc: &TestCase) -> Result<()> {
        let (interval, timeout) = self.durations(tc);
        let invocation = self.invocation(tc);
        let last = Mutex::new(String::new());

        let outcome = poll(interval, timeout, || async {
            let output = invocation.raw(tc.client()).await?;
            *last.lock().await = output.combined().trim().to_string();
            Ok(self.comparator.evaluate(&self.expected, &output))
        })
        .await;

        match outcome {
            Ok(()) => {
                tracing::debug!("check passed: {}", self.description());
                Ok(())
            }
            Err(timeout) => {
                let description = format!("{} ({})", self.description(), timeout);
                let last = last.into_inner();
                let last = if last.is_empty() {
                    timeout.last_error.unwrap_or_default()
                } else {
                    last
                };
                Err(Error::check_failed(description, truncate_output(&last, 2000)))
            }
        }
    }

    /// Poll until the comparator holds; on timeout dump the queried object
    /// to the log before returning the failure
    pub async fn check(&self, tc: &TestCase) -> Result<()> {
        let result = self.check_without_assert(tc).await;
        if let Err(e) = &result {
            tracing::error!("{}", e);
            self.dump(tc).await;
        }
        result
    }

    /// Log the full YAML of the object this check queries
    async fn dump(&self, tc: &TestCase) {
        let (Some(kind), Some(name), namespace) = self.query.target() else {
            return;
        };
        let mut inv = Invocation::new("get")
            .args([kind, name, "-o", "yaml"])
            .scope(self.scope);
        match (namespace, self.inline_namespace) {
            (Some(ns), _) => inv = inv.namespace(ns),
            (None, true) => inv = inv.namespace(tc.namespace()),
            (None, false) => {}
        }
        match inv.raw(tc.client()).await {
            Ok(out) => tracing::error!("{}:\n{}", inv.command_line(), out.combined()),
            Err(e) => tracing::error!("{} failed: {}", inv.command_line(), e),
        }
    }
}

/// A batch of independent checks
#[derive(Debug, Clone, Default)]
pub struct CheckList(Vec<Check>);

impl CheckList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, check: Check) -> &mut Self {
        self.0.push(check);
        self
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn empty(&mut self) {
        self.0.clear();
    }

    /// Evaluate every check concurrently
    ///
    /// Passes only if all checks hold; otherwise the error lists every failed
    /// check in list order.
    pub async fn check(&self, tc: &TestCase) -> Result<()> {
        let results = join_all(self.0.iter().map(|c| c.check(tc))).await;
        let failures: Vec<String> = results
            .into_iter()
            .filter_map(|r| r.err().map(|e| e.to_string()))
            .collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::CheckListFailed(failures))
        }
    }
}

impl FromIterator<Check> for CheckList {
    fn from_iter<I: IntoIterator<Item = Check>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::{fail, ok, FakeCluster, HungCluster};
    use crate::common::config::PollSettings;
    use crate::tracker::LifecycleTracker;
    use std::sync::Arc;

    fn stdout(text: &str) -> CliOutput {
        ok(text)
    }

    fn test_case(fake: Arc<FakeCluster>) -> TestCase {
        TestCase::new("check test", fake, LifecycleTracker::new())
            .with_namespace("ns1")
            .with_settings(PollSettings {
                interval: Duration::from_secs(3),
                check_timeout: Duration::from_secs(30),
                present_timeout: Duration::from_secs(15),
                readiness_timeout: Duration::from_secs(60),
            })
    }

    #[test]
    fn test_expected_alternatives() {
        let e = Expected::parse("Succeeded+2+Installing");
        assert_eq!(e.alternatives(), &["Succeeded", "Installing"]);
        assert_eq!(Expected::parse("READY").alternatives(), &["READY"]);
        assert_eq!(e.to_string(), "'Succeeded' or 'Installing'");
    }

    #[test]
    fn test_compare_trims_and_matches_any() {
        let e = Expected::parse("Succeeded+2+Installing");
        assert!(Comparator::Compare.evaluate(&e, &stdout("Installing\n")));
        assert!(!Comparator::Compare.evaluate(&e, &stdout("Pending")));
        assert!(Comparator::NotCompare.evaluate(&e, &stdout("Pending")));
        assert!(!Comparator::NotCompare.evaluate(&e, &stdout(" Succeeded ")));
    }

    #[test]
    fn test_contain_and_not_contain() {
        let e = Expected::parse("etcdoperator.v0.9.2");
        let out = stdout("etcdoperator.v0.9.2 etcdoperator.v0.9.4");
        assert!(Comparator::Contain.evaluate(&e, &out));
        assert!(!Comparator::NotContain.evaluate(&e, &out));
        assert!(Comparator::NotContain.evaluate(&e, &stdout("etcdoperator.v0.9.4")));
    }

    #[test]
    fn test_failed_query_never_matches_value_comparators() {
        let e = Expected::parse("x");
        let out = fail("Error from server (NotFound): not found");
        assert!(!Comparator::Compare.evaluate(&e, &out));
        assert!(!Comparator::NotCompare.evaluate(&e, &out));
        assert!(!Comparator::NotContain.evaluate(&e, &out));
    }

    #[test]
    fn test_presence_tolerates_not_found() {
        let e = Expected::parse("");
        let missing = fail("Error from server (NotFound): catalogsources \"cs\" not found");
        let empty_list = CliOutput {
            stdout: String::new(),
            stderr: "No resources found in ns1 namespace.".to_string(),
            code: Some(0),
        };
        let found = stdout("NAME   AGE\ncs     5s");
        let broken = fail("Unable to connect to the server");

        assert!(Comparator::NotPresent.evaluate(&e, &missing));
        assert!(Comparator::NotPresent.evaluate(&e, &empty_list));
        assert!(!Comparator::NotPresent.evaluate(&e, &found));
        assert!(!Comparator::NotPresent.evaluate(&e, &broken));
        assert!(Comparator::Present.evaluate(&e, &found));
        assert!(!Comparator::Present.evaluate(&e, &missing));
        assert!(!Comparator::Present.evaluate(&e, &empty_list));
    }

    #[test]
    fn test_query_target() {
        let q = Query::jsonpath("csv", "etcd.v1", "ns1", "{.status.phase}");
        assert_eq!(q.target(), (Some("csv"), Some("etcd.v1"), Some("ns1")));
        let q = Query::new(["-n", "ns2", "sub", "etcd"]);
        assert_eq!(q.target(), (Some("sub"), Some("etcd"), Some("ns2")));
        let q = Query::new(["sub", "--namespace", "ns3", "etcd", "-o=yaml"]);
        assert_eq!(q.target(), (Some("sub"), Some("etcd"), Some("ns3")));
        let q = Query::new(["--namespace=ns4", "csv", "etcd.v1"]);
        assert_eq!(q.target(), (Some("csv"), Some("etcd.v1"), Some("ns4")));
    }

    #[test]
    fn test_description() {
        let c = Check::new(
            Comparator::Compare,
            "READY",
            Query::jsonpath("catsrc", "cs", "ns", "{.status.connectionState.lastObservedState}"),
        );
        assert_eq!(
            c.description(),
            "'oc get catsrc cs -n ns -o=jsonpath={.status.connectionState.lastObservedState}' should equal 'READY'"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_passes_once_value_converges() {
        let fake = Arc::new(FakeCluster::new());
        fake.on(
            &["get csv etcd"],
            vec![stdout("Pending"), stdout("InstallReady"), stdout("Succeeded")],
        );
        let tc = test_case(fake.clone());

        Check::new(
            Comparator::Compare,
            "Succeeded",
            Query::jsonpath("csv", "etcd", "ns1", "{.status.phase}"),
        )
        .check(&tc)
        .await
        .unwrap();

        assert_eq!(fake.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_failure_carries_last_value_and_dumps() {
        let fake = Arc::new(FakeCluster::new());
        fake.on(&["-o yaml"], vec![stdout("kind: ClusterServiceVersion")]);
        fake.on(&["get csv etcd"], vec![stdout("Failed")]);
        let tc = test_case(fake.clone());

        let err = Check::new(
            Comparator::Compare,
            "Succeeded",
            Query::jsonpath("csv", "etcd", "ns1", "{.status.phase}"),
        )
        .check(&tc)
        .await
        .unwrap_err();

        match err {
            Error::CheckFailed { last, .. } => assert_eq!(last, "Failed"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(
            fake.calls_matching("-o yaml"),
            vec!["oc get csv etcd -o yaml -n ns1"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_without_assert_skips_dump() {
        let fake = Arc::new(FakeCluster::new());
        fake.on(&["get csv"], vec![stdout("Failed")]);
        let tc = test_case(fake.clone());

        Check::new(
            Comparator::Compare,
            "Succeeded",
            Query::new(["csv", "etcd", "-o=jsonpath={.status.phase}"]),
        )
        .with_namespace()
        .check_without_assert(&tc)
        .await
        .unwrap_err();

        assert!(fake.calls_matching("-o yaml").is_empty());
        assert!(fake.calls()[0].ends_with("-n ns1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_present_uses_present_timeout() {
        let fake = Arc::new(FakeCluster::new());
        fake.on(&["get sub"], vec![fail("Error from server (NotFound): not found")]);
        let tc = test_case(fake.clone());
        let start = tokio::time::Instant::now();

        Check::present(Query::object("sub", "etcd", Some("ns1")))
            .check_without_assert(&tc)
            .await
            .unwrap_err();

        // 15s timeout at a 3s interval: evaluations at 0, 3, 6, 9, 12, 15
        assert_eq!(fake.calls().len(), 6);
        assert_eq!(start.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_list_all_or_nothing() {
        let fake = Arc::new(FakeCluster::new());
        fake.on(&["get sub a"], vec![stdout(""), stdout("AtLatestKnown")]);
        fake.on(&["get sub b"], vec![stdout("UpgradePending")]);
        fake.on(&["get sub c"], vec![stdout(""), stdout(""), stdout("AtLatestKnown")]);
        let tc = test_case(fake.clone());

        let query = |name: &str| Query::jsonpath("sub", name, "ns1", "{.status.state}");

        let passing: CheckList = ["a", "c"]
            .iter()
            .map(|n| Check::new(Comparator::Compare, "AtLatestKnown", query(n)))
            .collect();
        passing.check(&tc).await.unwrap();

        let failing: CheckList = ["a", "b"]
            .iter()
            .map(|n| {
                Check::new(Comparator::Compare, "AtLatestKnown", query(n))
                    .timeout(Duration::from_secs(6))
            })
            .collect();
        let err = failing.check(&tc).await.unwrap_err();
        match err {
            Error::CheckListFailed(failures) => {
                assert_eq!(failures.len(), 1);
                assert!(failures[0].contains("sub b"));
                assert!(failures[0].contains("UpgradePending"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_cli_fails_at_check_timeout() {
        let tc = TestCase::new("hung", Arc::new(HungCluster), LifecycleTracker::new())
            .with_namespace("ns1");
        let start = tokio::time::Instant::now();

        let err = Check::new(
            Comparator::Compare,
            "Succeeded",
            Query::jsonpath("csv", "etcd", "ns1", "{.status.phase}"),
        )
        .timeout(Duration::from_secs(10))
        .check_without_assert(&tc)
        .await
        .unwrap_err();

        assert_eq!(start.elapsed(), Duration::from_secs(10));
        match err {
            Error::CheckFailed { description, last } => {
                assert!(description.contains("timed out after 10.0s (1 attempts)"), "{description}");
                assert!(last.contains("did not finish"), "{last}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
