//! Mock `oc` binary for integration testing
//!
//! Implements the slice of the OpenShift CLI the harness drives, backed by a
//! JSON file named by `MOCK_OC_STATE`. Before every command one reconcile
//! pass advances the toy OLM controllers, so polling callers see objects
//! move through their phases. Each command line is appended to `MOCK_OC_LOG`
//! when that variable is set.

mod jsonpath;
mod reconcile;
mod state;

use std::collections::{BTreeMap, HashSet};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use serde_json::{json, Map, Value};

use state::{canonical_kind, is_cluster_scoped, State, StateLock};

/// What the process prints and how it exits
struct Output {
    stdout: String,
    stderr: String,
    code: i32,
}

impl Output {
    fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            code: 0,
        }
    }

    fn fail(stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            code: 1,
        }
    }
}

/// Parsed command line
#[derive(Debug, Default)]
struct Args {
    verb: String,
    positional: Vec<String>,
    namespace: Option<String>,
    output: Option<String>,
    files: Vec<String>,
    /// Values of `-p`: template parameters for `process`, the body for `patch`
    p_values: Vec<String>,
    literals: Vec<String>,
    flags: BTreeMap<String, String>,
    switches: HashSet<String>,
}

impl Args {
    fn parse(raw: Vec<String>) -> Self {
        let mut args = Args::default();
        let mut iter = raw.into_iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "-n" | "--namespace" => args.namespace = iter.next(),
                "-o" | "--output" => args.output = iter.next(),
                "-f" | "--filename" => args.files.extend(iter.next()),
                "-p" | "--param" | "--patch" => args.p_values.extend(iter.next()),
                "--type" => {
                    if let Some(value) = iter.next() {
                        args.flags.insert("type".to_string(), value);
                    }
                }
                "-A" | "--all-namespaces" => {
                    args.switches.insert("all-namespaces".to_string());
                }
                _ => {
                    if let Some(value) = arg.strip_prefix("-o=").or_else(|| arg.strip_prefix("--output=")) {
                        args.output = Some(value.to_string());
                    } else if let Some(value) = arg.strip_prefix("--namespace=") {
                        args.namespace = Some(value.to_string());
                    } else if let Some(value) = arg.strip_prefix("--from-literal=") {
                        args.literals.push(value.to_string());
                    } else if let Some(flag) = arg.strip_prefix("--") {
                        match flag.split_once('=') {
                            Some((key, value)) => {
                                args.flags.insert(key.to_string(), value.to_string());
                            }
                            None => {
                                args.switches.insert(flag.to_string());
                            }
                        }
                    } else if args.verb.is_empty() {
                        args.verb = arg;
                    } else {
                        args.positional.push(arg);
                    }
                }
            }
        }
        args
    }

    fn namespace(&self) -> &str {
        self.namespace.as_deref().unwrap_or("default")
    }

    /// `kind name` or `kind/name`
    fn target(&self) -> Option<(String, Option<String>)> {
        let first = self.positional.first()?;
        match first.split_once('/') {
            Some((kind, name)) => Some((canonical_kind(kind), Some(name.to_string()))),
            None => Some((canonical_kind(first), self.positional.get(1).cloned())),
        }
    }
}

fn main() {
    let raw: Vec<String> = std::env::args().skip(1).collect();
    if let Ok(log) = std::env::var("MOCK_OC_LOG") {
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(log) {
            let _ = writeln!(file, "oc {}", raw.join(" "));
        }
    }

    let output = run(Args::parse(raw));
    print!("{}", output.stdout);
    eprint!("{}", output.stderr);
    std::process::exit(output.code);
}

fn run(args: Args) -> Output {
    match args.verb.as_str() {
        "" => return Output::fail("error: no command given\n"),
        "version" => return Output::ok("Client Version: 4.14.0-mock\n"),
        // Rendering is a pure function of the template file
        "process" => return process(&args),
        _ => {}
    }

    let state_path = match std::env::var("MOCK_OC_STATE") {
        Ok(path) => PathBuf::from(path),
        Err(_) => return Output::fail("error: MOCK_OC_STATE is not set\n"),
    };
    let _lock = match StateLock::acquire(&state_path) {
        Ok(lock) => lock,
        Err(e) => return Output::fail(format!("{}\n", e)),
    };
    let mut state = match state::load(&state_path) {
        Ok(state) => state,
        Err(e) => return Output::fail(format!("{}\n", e)),
    };

    reconcile::reconcile(&mut state);

    let output = match args.verb.as_str() {
        "get" => get(&state, &args),
        "apply" => submit(&mut state, &args, false),
        "create" if !args.files.is_empty() => submit(&mut state, &args, true),
        "create" => create_from_flags(&mut state, &args),
        "new-project" => new_project(&mut state, &args),
        "delete" => delete(&mut state, &args),
        "patch" => patch(&mut state, &args),
        "label" => label(&mut state, &args),
        other => Output::fail(format!("error: unknown command \"{}\" for \"oc\"\n", other)),
    };

    if let Err(e) = state::save(&state_path, &state) {
        return Output::fail(format!("{}\n", e));
    }
    output
}

fn not_found(kind: &str, name: &str) -> Output {
    Output::fail(format!("Error from server (NotFound): {} \"{}\" not found\n", kind, name))
}

fn text<'a>(value: &'a Value, pointer: &str) -> &'a str {
    value.pointer(pointer).and_then(Value::as_str).unwrap_or("")
}

// === process ===

fn process(args: &Args) -> Output {
    let Some(path) = args.files.first() else {
        return Output::fail("error: process requires -f\n");
    };
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => return Output::fail(format!("error: unable to read {}: {}\n", path, e)),
    };
    let template: Value = match serde_yaml::from_str(&content) {
        Ok(template) => template,
        Err(e) => return Output::fail(format!("error: unable to parse {}: {}\n", path, e)),
    };

    let mut params: BTreeMap<String, Option<String>> = BTreeMap::new();
    let mut required = HashSet::new();
    for param in template["parameters"].as_array().into_iter().flatten() {
        let name = text(param, "/name").to_string();
        if param["required"].as_bool().unwrap_or(false) {
            required.insert(name.clone());
        }
        params.insert(name, param["value"].as_str().map(str::to_string));
    }
    let ignore_unknown = args.flags.get("ignore-unknown-parameters").map(String::as_str) == Some("true")
        || args.switches.contains("ignore-unknown-parameters");
    for pair in &args.p_values {
        let Some((key, value)) = pair.split_once('=') else {
            return Output::fail(format!("error: invalid parameter assignment in {:?}\n", pair));
        };
        if !params.contains_key(key) && !ignore_unknown {
            return Output::fail(format!("error: unknown parameter name {:?}\n", key));
        }
        params.insert(key.to_string(), Some(value.to_string()));
    }
    for name in &required {
        if params.get(name).map_or(true, |v| v.as_deref().unwrap_or("").is_empty()) {
            return Output::fail(format!(
                "error: unable to process template\n  template.parameters[{}]: Required value\n",
                name
            ));
        }
    }

    let values: BTreeMap<String, String> = params
        .into_iter()
        .map(|(k, v)| (k, v.unwrap_or_default()))
        .collect();
    let items: Vec<Value> = template["objects"]
        .as_array()
        .into_iter()
        .flatten()
        .map(|object| substitute(object, &values))
        .collect();
    let list = json!({"kind": "List", "apiVersion": "v1", "items": items});
    Output::ok(format!("{}\n", list))
}

fn substitute_text(text: &str, params: &BTreeMap<String, String>) -> String {
    params.iter().fold(text.to_string(), |out, (key, replacement)| {
        out.replace(&format!("${{{}}}", key), replacement)
    })
}

/// Replace `${KEY}` in every string and map key; a string that is exactly
/// `${{KEY}}` becomes the parsed value, so numbers and booleans keep their type
fn substitute(value: &Value, params: &BTreeMap<String, String>) -> Value {
    match value {
        Value::String(s) => {
            if let Some(key) = s.strip_prefix("${{").and_then(|k| k.strip_suffix("}}")) {
                let raw = params.get(key).cloned().unwrap_or_default();
                return serde_yaml::from_str(&raw).unwrap_or(Value::String(raw));
            }
            Value::String(substitute_text(s, params))
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| substitute(v, params)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (substitute_text(k, params), substitute(v, params)))
                .collect(),
        ),
        other => other.clone(),
    }
}

// === apply / create ===

fn submit(state: &mut State, args: &Args, create_only: bool) -> Output {
    let mut stdout = String::new();
    for path in &args.files {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                return Output::fail(format!("error: the path \"{}\" cannot be read: {}\n", path, e))
            }
        };
        let document: Value = match serde_yaml::from_str(&content) {
            Ok(document) => document,
            Err(e) => return Output::fail(format!("error: error parsing {}: {}\n", path, e)),
        };
        let objects = if document["kind"] == "List" {
            document["items"].as_array().cloned().unwrap_or_default()
        } else {
            vec![document]
        };

        for mut object in objects {
            let kind = canonical_kind(text(&object, "/kind"));
            let name = text(&object, "/metadata/name").to_string();
            if kind.is_empty() || name.is_empty() {
                return Output::fail(format!("error: error validating \"{}\": missing kind or name\n", path));
            }
            let namespace = if is_cluster_scoped(&kind) {
                String::new()
            } else {
                match text(&object, "/metadata/namespace") {
                    "" => args.namespace().to_string(),
                    ns => ns.to_string(),
                }
            };
            if !namespace.is_empty() {
                object["metadata"]["namespace"] = json!(namespace);
            }

            let verb = match state.get(&kind, &namespace, &name) {
                Some(_) if create_only => {
                    return Output::fail(format!(
                        "Error from server (AlreadyExists): error when creating \"{}\": {} \"{}\" already exists\n",
                        path, kind, name
                    ));
                }
                Some(existing) => {
                    if let Some(status) = existing.get("status") {
                        object["status"] = status.clone();
                    }
                    "configured"
                }
                None => "created",
            };
            state.insert(&kind, &namespace, &name, object);
            stdout.push_str(&format!("{}/{} {}\n", kind, name, verb));
        }
    }
    Output::ok(stdout)
}

fn create_from_flags(state: &mut State, args: &Args) -> Output {
    let (Some(kind), Some(name)) = (args.positional.first(), args.positional.get(1)) else {
        return Output::fail("error: create requires a resource type and a name\n");
    };
    let kind = canonical_kind(kind);
    let namespace = args.namespace().to_string();
    if state.get(&kind, &namespace, name).is_some() {
        return Output::fail(format!(
            "error: failed to create {}: {} \"{}\" already exists\n",
            kind, kind, name
        ));
    }

    let metadata = json!({"name": name, "namespace": namespace});
    let object = match kind.as_str() {
        "configmap" => {
            let data: Map<String, Value> = args
                .literals
                .iter()
                .filter_map(|l| l.split_once('='))
                .map(|(k, v)| (k.to_string(), json!(v)))
                .collect();
            json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": metadata, "data": data})
        }
        "role" => {
            let split = |flag: &str| -> Vec<String> {
                args.flags
                    .get(flag)
                    .map(|v| v.split(',').map(str::to_string).collect())
                    .unwrap_or_default()
            };
            json!({
                "apiVersion": "rbac.authorization.k8s.io/v1",
                "kind": "Role",
                "metadata": metadata,
                "rules": [{"verbs": split("verb"), "resources": split("resource")}]
            })
        }
        "rolebinding" => {
            let (role_kind, role) = match (args.flags.get("role"), args.flags.get("clusterrole")) {
                (Some(role), _) => ("Role", role.clone()),
                (None, Some(role)) => ("ClusterRole", role.clone()),
                (None, None) => return Output::fail("error: exactly one of clusterrole or role must be specified\n"),
            };
            let mut subjects = Vec::new();
            if let Some(user) = args.flags.get("user") {
                subjects.push(json!({"kind": "User", "name": user}));
            }
            if let Some((sa_ns, sa)) = args.flags.get("serviceaccount").and_then(|s| s.split_once(':')) {
                subjects.push(json!({"kind": "ServiceAccount", "name": sa, "namespace": sa_ns}));
            }
            json!({
                "apiVersion": "rbac.authorization.k8s.io/v1",
                "kind": "RoleBinding",
                "metadata": metadata,
                "roleRef": {"kind": role_kind, "name": role},
                "subjects": subjects
            })
        }
        "serviceaccount" => json!({"apiVersion": "v1", "kind": "ServiceAccount", "metadata": metadata}),
        other => return Output::fail(format!("error: unsupported resource for create: {}\n", other)),
    };
    state.insert(&kind, &namespace, name, object);
    Output::ok(format!("{}/{} created\n", kind, name))
}

fn new_project(state: &mut State, args: &Args) -> Output {
    let Some(name) = args.positional.first() else {
        return Output::fail("error: must have exactly one argument\n");
    };
    if state.get("project", "", name).is_some() {
        return Output::fail(format!(
            "Error from server (AlreadyExists): project.project.openshift.io \"{}\" already exists\n",
            name
        ));
    }
    state.insert(
        "project",
        "",
        name,
        json!({"apiVersion": "project.openshift.io/v1", "kind": "Project", "metadata": {"name": name, "labels": {}}}),
    );
    Output::ok(format!("Created project {}\n", name))
}

// === get ===

fn get(state: &State, args: &Args) -> Output {
    let Some((kind, name)) = args.target() else {
        return Output::fail("error: you must specify the type of resource to get\n");
    };
    let namespace = args.namespace();

    let (root, found) = match &name {
        Some(name) => match state.get(&kind, namespace, name) {
            Some(object) => (object.clone(), vec![object.clone()]),
            None => return not_found(&kind, name),
        },
        None => {
            let scope = if args.switches.contains("all-namespaces") {
                None
            } else {
                Some(namespace)
            };
            let items: Vec<Value> = state.list(&kind, scope).into_iter().map(|(_, v)| v.clone()).collect();
            (json!({"apiVersion": "v1", "kind": "List", "items": items}), items)
        }
    };

    match args.output.as_deref() {
        Some("json") => Output::ok(format!(
            "{}\n",
            serde_json::to_string_pretty(&root).unwrap_or_default()
        )),
        Some("yaml") => Output::ok(serde_yaml::to_string(&root).unwrap_or_default()),
        Some("name") => Output::ok(
            found
                .iter()
                .map(|o| format!("{}/{}\n", kind, text(o, "/metadata/name")))
                .collect::<String>(),
        ),
        Some(format) if format.starts_with("jsonpath=") => {
            let expr = format.trim_start_matches("jsonpath=").trim_matches('\'');
            match jsonpath::evaluate(&root, expr) {
                Ok(value) => Output::ok(value),
                Err(e) => Output::fail(format!("{}\n", e)),
            }
        }
        Some(other) => Output::fail(format!("error: unable to match a printer suitable for the output format \"{}\"\n", other)),
        None if found.is_empty() => Output {
            stdout: String::new(),
            stderr: format!("No resources found in {} namespace.\n", namespace),
            code: 0,
        },
        None => Output::ok(table(&kind, &found)),
    }
}

/// Default printer: name, the kind's headline status and age
fn table(kind: &str, objects: &[Value]) -> String {
    let status_pointer = match kind {
        "csv" | "installplan" => "/status/phase",
        "subscription" => "/status/state",
        "catalogsource" => "/status/connectionState/lastObservedState",
        _ => "",
    };
    let width = objects
        .iter()
        .map(|o| text(o, "/metadata/name").len())
        .max()
        .unwrap_or(0)
        .max(4)
        + 3;
    let mut out = format!("{:<width$}{:<20}AGE\n", "NAME", "STATUS", width = width);
    for object in objects {
        let status = if status_pointer.is_empty() { "" } else { text(object, status_pointer) };
        out.push_str(&format!(
            "{:<width$}{:<20}1m\n",
            text(object, "/metadata/name"),
            status,
            width = width
        ));
    }
    out
}

// === delete / patch / label ===

fn delete(state: &mut State, args: &Args) -> Output {
    let Some((kind, Some(name))) = args.target() else {
        return Output::fail("error: resource(s) were provided, but no name was specified\n");
    };
    let removed = if kind == "project" {
        state.remove_project(&name)
    } else {
        state.remove(&kind, args.namespace(), &name).is_some()
    };
    match (removed, args.switches.contains("ignore-not-found")) {
        (true, _) => Output::ok(format!("{} \"{}\" deleted\n", kind, name)),
        (false, true) => Output::ok(""),
        (false, false) => not_found(&kind, &name),
    }
}

/// RFC 7386 merge: objects merge key by key, `null` deletes
fn merge(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = json!({});
    }
    if let Value::Object(target) = target {
        for (key, value) in patch {
            if value.is_null() {
                target.remove(key);
            } else {
                merge(target.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

fn patch(state: &mut State, args: &Args) -> Output {
    let Some((kind, Some(name))) = args.target() else {
        return Output::fail("error: resource(s) were provided, but no name was specified\n");
    };
    if let Some(patch_type) = args.flags.get("type").filter(|t| t.as_str() != "merge") {
        return Output::fail(format!("error: unsupported patch type {}\n", patch_type));
    }
    let Some(body) = args.p_values.first() else {
        return Output::fail("error: must specify -p to patch\n");
    };
    let body: Value = match serde_yaml::from_str(body) {
        Ok(body) => body,
        Err(e) => return Output::fail(format!("error: unable to parse {:?}: {}\n", body, e)),
    };
    let namespace = args.namespace().to_string();
    let Some(mut object) = state.get(&kind, &namespace, &name).cloned() else {
        return not_found(&kind, &name);
    };
    merge(&mut object, &body);
    state.insert(&kind, &namespace, &name, object);
    Output::ok(format!("{}/{} patched\n", kind, name))
}

fn label(state: &mut State, args: &Args) -> Output {
    let Some((kind, Some(name))) = args.target() else {
        return Output::fail("error: resource(s) were provided, but no name was specified\n");
    };
    let namespace = args.namespace().to_string();
    let Some(mut object) = state.get(&kind, &namespace, &name).cloned() else {
        return not_found(&kind, &name);
    };
    for pair in args.positional.iter().skip(if args.positional[0].contains('/') { 1 } else { 2 }) {
        if let Some((key, value)) = pair.split_once('=') {
            object["metadata"]["labels"][key] = json!(value);
        } else if let Some(key) = pair.strip_suffix('-') {
            if let Some(labels) = object["metadata"]["labels"].as_object_mut() {
                labels.remove(key);
            }
        }
    }
    state.insert(&kind, &namespace, &name, object);
    Output::ok(format!("{}/{} labeled\n", kind, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(line: &str) -> Args {
        Args::parse(line.split_whitespace().map(str::to_string).collect())
    }

    #[test]
    fn test_parse_flags_anywhere() {
        let a = args("--kubeconfig=/tmp/k get sub etcd -n ns1 -o=jsonpath={.status.state}");
        assert_eq!(a.verb, "get");
        assert_eq!(a.positional, vec!["sub", "etcd"]);
        assert_eq!(a.namespace(), "ns1");
        assert_eq!(a.output.as_deref(), Some("jsonpath={.status.state}"));
        assert_eq!(a.target(), Some(("subscription".to_string(), Some("etcd".to_string()))));

        let a = args("delete configmap cm --ignore-not-found");
        assert!(a.switches.contains("ignore-not-found"));
        assert_eq!(a.namespace(), "default");
    }

    #[test]
    fn test_substitute_parameters() {
        let params: BTreeMap<String, String> = [
            ("NAME".to_string(), "etcd".to_string()),
            ("PRIORITY".to_string(), "5".to_string()),
        ]
        .into_iter()
        .collect();
        let object = json!({"metadata": {"name": "${NAME}-sub"}, "spec": {"priority": "${{PRIORITY}}"}});
        let rendered = substitute(&object, &params);
        assert_eq!(rendered["metadata"]["name"], "etcd-sub");
        assert_eq!(rendered["spec"]["priority"], 5);
    }

    #[test]
    fn test_merge_patch() {
        let mut target = json!({"spec": {"channel": "alpha", "name": "etcd"}, "status": {"state": "x"}});
        merge(&mut target, &json!({"spec": {"channel": "beta"}, "status": null}));
        assert_eq!(target, json!({"spec": {"channel": "beta", "name": "etcd"}}));
    }

    #[test]
    fn test_get_missing_object_is_not_found() {
        let state = State::default();
        let out = get(&state, &args("get csv etcd.v1 -n ns1"));
        assert_eq!(out.code, 1);
        assert!(out.stderr.contains("NotFound"));

        let out = get(&state, &args("get csv -n ns1"));
        assert_eq!(out.code, 0);
        assert_eq!(out.stderr, "No resources found in ns1 namespace.\n");
    }
}
