//! The JSONPath subset the harness queries with
//!
//! Supports `{.a.b}`, `{.a[0]}`, `{.items[*].metadata.name}` and equality
//! filters such as `{.status.conditions[?(@.type=="Ready")].status}`.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Field(String),
    Index(usize),
    Wildcard,
    Filter { path: Vec<String>, value: String },
}

fn parse(expr: &str) -> Result<Vec<Segment>, String> {
    let body = expr
        .trim()
        .strip_prefix('{')
        .and_then(|e| e.strip_suffix('}'))
        .ok_or_else(|| format!("error: unsupported jsonpath expression {}", expr))?;

    let mut segments = Vec::new();
    let mut rest = body;
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix('.') {
            let end = after.find(&['.', '['][..]).unwrap_or(after.len());
            if end > 0 {
                segments.push(Segment::Field(after[..end].to_string()));
            }
            rest = &after[end..];
        } else if let Some(after) = rest.strip_prefix('[') {
            let end = after
                .find(']')
                .ok_or_else(|| format!("error: unclosed bracket in {}", expr))?;
            segments.push(parse_bracket(&after[..end])?);
            rest = &after[end + 1..];
        } else {
            return Err(format!("error: unexpected '{}' in {}", rest, expr));
        }
    }
    Ok(segments)
}

fn parse_bracket(inner: &str) -> Result<Segment, String> {
    if inner == "*" {
        return Ok(Segment::Wildcard);
    }
    if let Ok(index) = inner.parse() {
        return Ok(Segment::Index(index));
    }
    let filter = inner
        .strip_prefix("?(@.")
        .and_then(|f| f.strip_suffix(')'))
        .ok_or_else(|| format!("error: unsupported subscript [{}]", inner))?;
    let (path, value) = filter
        .split_once("==")
        .ok_or_else(|| format!("error: unsupported filter [{}]", inner))?;
    let value = value.trim().trim_matches(|c: char| c == '"' || c == '\'');
    Ok(Segment::Filter {
        path: path.trim().split('.').map(str::to_string).collect(),
        value: value.to_string(),
    })
}

fn lookup<'a>(value: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(value, |v, key| v.get(key))
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Evaluate `expr` against `root`; results are space-separated like kubectl
pub fn evaluate(root: &Value, expr: &str) -> Result<String, String> {
    let mut current: Vec<&Value> = vec![root];
    for segment in parse(expr)? {
        let mut next = Vec::new();
        for value in current {
            match &segment {
                Segment::Field(name) => next.extend(value.get(name)),
                Segment::Index(i) => next.extend(value.get(*i)),
                Segment::Wildcard => match value {
                    Value::Array(items) => next.extend(items.iter()),
                    Value::Object(map) => next.extend(map.values()),
                    _ => {}
                },
                Segment::Filter { path, value: wanted } => {
                    if let Value::Array(items) = value {
                        next.extend(
                            items
                                .iter()
                                .filter(|item| lookup(item, path).map(render).as_deref() == Some(wanted.as_str())),
                        );
                    }
                }
            }
        }
        current = next;
    }
    Ok(current.into_iter().map(render).collect::<Vec<_>>().join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fields_filters_and_wildcards() {
        let obj = json!({
            "status": {
                "phase": "Succeeded",
                "conditions": [
                    {"type": "Established", "status": "True"},
                    {"type": "NamesAccepted", "status": "False"}
                ]
            },
            "items": [{"metadata": {"name": "a"}}, {"metadata": {"name": "b"}}]
        });
        assert_eq!(evaluate(&obj, "{.status.phase}").unwrap(), "Succeeded");
        assert_eq!(
            evaluate(&obj, r#"{.status.conditions[?(@.type=="Established")].status}"#).unwrap(),
            "True"
        );
        assert_eq!(evaluate(&obj, "{.items[*].metadata.name}").unwrap(), "a b");
        assert_eq!(evaluate(&obj, "{.items[1].metadata.name}").unwrap(), "b");
        assert_eq!(evaluate(&obj, "{.status.missing}").unwrap(), "");
        assert!(evaluate(&obj, ".status").is_err());
    }
}
