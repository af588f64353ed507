//! Toy OLM controllers
//!
//! Every invocation runs one reconcile pass before executing its command.
//! Each pass moves an object at most one step forward, so callers observe
//! the same intermediate states a real cluster goes through:
//!
//! - CatalogSource: CONNECTING, then READY (TRANSIENT_FAILURE for images
//!   containing `does-not-exist` or configmap sources whose ConfigMap is missing)
//! - Subscription: once its catalog is READY, one InstallPlan per target CSV,
//!   state UpgradePending; AtLatestKnown once the CSV succeeded
//! - InstallPlan: RequiresApproval until approved, Installing, Complete
//!   (Failed for CSV names containing `badplan`)
//! - CSV: Pending, Installing, Succeeded (Failed for names containing `broken`)
//! - OperatorGroup: status.namespaces; MultipleOperatorGroup when a namespace
//!   holds more than one group, ServiceAccountNotFound for a missing account
//! - CRD: Established

use serde_json::{json, Value};

use crate::state::{split_key, State};

pub fn reconcile(state: &mut State) {
    let keys: Vec<String> = state.objects.keys().cloned().collect();
    for key in keys {
        let (kind, namespace, name) = split_key(&key);
        let (kind, namespace, name) = (kind.to_string(), namespace.to_string(), name.to_string());
        match kind.as_str() {
            "catalogsource" => catalog_source(state, &namespace, &name),
            "subscription" => subscription(state, &namespace, &name),
            "installplan" => install_plan(state, &namespace, &name),
            "csv" => csv(state, &namespace, &name),
            "operatorgroup" => operator_group(state, &namespace, &name),
            "crd" => crd(state, &name),
            _ => {}
        }
    }
}

fn text<'a>(value: &'a Value, pointer: &str) -> &'a str {
    value.pointer(pointer).and_then(Value::as_str).unwrap_or("")
}

/// Stable five-character suffix for generated names
pub fn short_hash(input: &str) -> String {
    // FNV-1a
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in input.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    let alphabet = b"bcdfghjklmnpqrstvwxz2456789";
    (0..5)
        .map(|i| alphabet[((hash >> (i * 8)) % alphabet.len() as u64) as usize] as char)
        .collect()
}

fn catalog_source(state: &mut State, namespace: &str, name: &str) {
    let Some(mut object) = state.get("catalogsource", namespace, name).cloned() else {
        return;
    };
    let next = match text(&object, "/status/connectionState/lastObservedState") {
        "" => "CONNECTING",
        "CONNECTING" => {
            let broken = match text(&object, "/spec/sourceType") {
                "configmap" => {
                    let cm = text(&object, "/spec/configMap");
                    state.get("configmap", namespace, cm).is_none()
                }
                _ => text(&object, "/spec/image").contains("does-not-exist"),
            };
            if broken {
                "TRANSIENT_FAILURE"
            } else {
                "READY"
            }
        }
        _ => return,
    };
    object["status"] = json!({
        "connectionState": {
            "lastObservedState": next,
            "address": format!("{}.{}.svc:50051", name, namespace)
        }
    });
    state.insert("catalogsource", namespace, name, object);
}

fn subscription(state: &mut State, namespace: &str, name: &str) {
    let Some(mut object) = state.get("subscription", namespace, name).cloned() else {
        return;
    };

    if object.pointer("/status/installplan").is_none() {
        let source = text(&object, "/spec/source");
        let source_ns = match text(&object, "/spec/sourceNamespace") {
            "" => namespace,
            ns => ns,
        };
        let ready = state
            .get("catalogsource", source_ns, source)
            .map(|cs| text(cs, "/status/connectionState/lastObservedState") == "READY")
            .unwrap_or(false);
        if !ready {
            return;
        }

        let csv = match text(&object, "/spec/startingCSV") {
            "" => format!("{}.v1.0.0", text(&object, "/spec/name")),
            starting => starting.to_string(),
        };
        let approval = match text(&object, "/spec/installPlanApproval") {
            "" => "Automatic",
            other => other,
        }
        .to_string();
        let plan = format!("install-{}", short_hash(&format!("{}/{}/{}", namespace, name, csv)));

        if state.get("installplan", namespace, &plan).is_none() {
            let approved = approval == "Automatic";
            state.insert(
                "installplan",
                namespace,
                &plan,
                json!({
                    "apiVersion": "operators.coreos.com/v1alpha1",
                    "kind": "InstallPlan",
                    "metadata": {
                        "name": plan,
                        "namespace": namespace,
                        "ownerReferences": [{"kind": "Subscription", "name": name}]
                    },
                    "spec": {
                        "approval": approval,
                        "approved": approved,
                        "clusterServiceVersionNames": [csv]
                    },
                    "status": {"phase": if approved { "Installing" } else { "RequiresApproval" }}
                }),
            );
        }
        object["status"] = json!({
            "state": "UpgradePending",
            "currentCSV": csv,
            "installplan": {"kind": "InstallPlan", "name": plan, "namespace": namespace}
        });
        state.insert("subscription", namespace, name, object);
        return;
    }

    let csv = text(&object, "/status/currentCSV").to_string();
    let Some(phase) = state
        .get("csv", namespace, &csv)
        .map(|c| text(c, "/status/phase").to_string())
    else {
        return;
    };
    let current_state = text(&object, "/status/state").to_string();
    let installed = text(&object, "/status/installedCSV").to_string();
    let next_state = if phase == "Succeeded" { "AtLatestKnown" } else { current_state.as_str() };
    if installed == csv && next_state == current_state {
        return;
    }
    object["status"]["installedCSV"] = json!(csv);
    object["status"]["state"] = json!(next_state);
    state.insert("subscription", namespace, name, object);
}

fn install_plan(state: &mut State, namespace: &str, name: &str) {
    let Some(mut object) = state.get("installplan", namespace, name).cloned() else {
        return;
    };
    let csvs: Vec<String> = object
        .pointer("/spec/clusterServiceVersionNames")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default();
    let approved = object.pointer("/spec/approved").and_then(Value::as_bool).unwrap_or(false);

    let next = match text(&object, "/status/phase") {
        "RequiresApproval" if approved => "Installing",
        "Installing" if csvs.iter().any(|c| c.contains("badplan")) => {
            object["status"]["conditions"] = json!([{
                "type": "Installed",
                "status": "False",
                "reason": "InstallComponentFailed",
                "message": "error creating csv: invalid bundle"
            }]);
            "Failed"
        }
        "Installing" => {
            for csv in &csvs {
                if state.get("csv", namespace, csv).is_none() {
                    state.insert(
                        "csv",
                        namespace,
                        csv,
                        json!({
                            "apiVersion": "operators.coreos.com/v1alpha1",
                            "kind": "ClusterServiceVersion",
                            "metadata": {"name": csv, "namespace": namespace},
                            "status": {"phase": "Pending"}
                        }),
                    );
                }
            }
            "Complete"
        }
        _ => return,
    };
    object["status"]["phase"] = json!(next);
    state.insert("installplan", namespace, name, object);
}

fn csv(state: &mut State, namespace: &str, name: &str) {
    let Some(mut object) = state.get("csv", namespace, name).cloned() else {
        return;
    };
    let next = match text(&object, "/status/phase") {
        "" | "Pending" => "Installing",
        "Installing" if name.contains("broken") => {
            object["status"]["reason"] = json!("InstallComponentFailed");
            object["status"]["message"] = json!("install strategy failed: deployment has no ready replicas");
            "Failed"
        }
        "Installing" => "Succeeded",
        _ => return,
    };
    object["status"]["phase"] = json!(next);
    state.insert("csv", namespace, name, object);
}

fn operator_group(state: &mut State, namespace: &str, name: &str) {
    let Some(mut object) = state.get("operatorgroup", namespace, name).cloned() else {
        return;
    };

    let mut conditions = Vec::new();
    if state.list("operatorgroup", Some(namespace)).len() > 1 {
        conditions.push(json!({
            "type": "MultipleOperatorGroup",
            "status": "True",
            "reason": "MultipleOperatorGroupsFound",
            "message": "Multiple OperatorGroup found in the same namespace"
        }));
    }
    let account = text(&object, "/spec/serviceAccountName");
    if !account.is_empty() && state.get("serviceaccount", namespace, account).is_none() {
        conditions.push(json!({
            "type": "ServiceAccountNotFound",
            "status": "True",
            "reason": "ServiceAccountNotFound",
            "message": format!("ServiceAccount {} not found in {}", account, namespace)
        }));
    }

    let namespaces: Vec<String> = if !conditions.is_empty() {
        Vec::new()
    } else if let Some(targets) = object.pointer("/spec/targetNamespaces").and_then(Value::as_array) {
        targets.iter().filter_map(Value::as_str).map(str::to_string).collect()
    } else if let Some(labels) = object.pointer("/spec/selector/matchLabels").and_then(Value::as_object) {
        state
            .list("project", None)
            .into_iter()
            .filter(|(_, project)| {
                labels
                    .iter()
                    .all(|(k, v)| project.pointer(&format!("/metadata/labels/{}", k)) == Some(v))
            })
            .map(|(_, project)| text(project, "/metadata/name").to_string())
            .collect()
    } else {
        vec![String::new()]
    };

    let status = json!({"namespaces": namespaces, "conditions": conditions});
    if object.get("status") == Some(&status) {
        return;
    }
    object["status"] = status;
    state.insert("operatorgroup", namespace, name, object);
}

fn crd(state: &mut State, name: &str) {
    let Some(mut object) = state.get("crd", "", name).cloned() else {
        return;
    };
    if object.pointer("/status/conditions").is_some() {
        return;
    }
    object["status"] = json!({
        "conditions": [{"type": "Established", "status": "True"}]
    });
    state.insert("crd", "", name, object);
}
