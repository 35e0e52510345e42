//! Request template filling.
//!
//! Templates are plain JSON documents; each step writes its identifiers
//! into them at fixed JSON-pointer locations. Missing intermediate objects
//! and arrays are created; an array index may extend an array by one.

use serde_json::{Map, Value};

use crate::error::StepFailure;

/// Copy `template` and set every `(pointer, value)` assignment on it.
pub fn fill(template: &Value, assignments: Vec<(&str, Value)>) -> Result<Value, StepFailure> {
    let mut body = template.clone();
    for (pointer, value) in assignments {
        set_pointer(&mut body, pointer, value)?;
    }
    Ok(body)
}

/// Set the value at `pointer` (RFC 6901 syntax, no `~` escapes).
pub fn set_pointer(target: &mut Value, pointer: &str, value: Value) -> Result<(), StepFailure> {
    let tokens: Vec<&str> = match pointer.strip_prefix('/') {
        Some(rest) if !rest.is_empty() => rest.split('/').collect(),
        _ => return Err(StepFailure::Template(format!("invalid pointer {pointer:?}"))),
    };
    let Some((last, parents)) = tokens.split_last() else {
        return Err(StepFailure::Template(format!("invalid pointer {pointer:?}")));
    };

    let mut current = target;
    for (i, token) in parents.iter().enumerate() {
        current = child_mut(current, token, tokens[i + 1])?;
    }

    if current.is_null() {
        *current = container_for(last);
    }
    match current {
        Value::Object(map) => {
            map.insert((*last).to_string(), value);
            Ok(())
        }
        Value::Array(items) => {
            let idx = index(last, items.len())?;
            if idx == items.len() {
                items.push(value);
            } else {
                items[idx] = value;
            }
            Ok(())
        }
        _ => Err(StepFailure::Template(format!(
            "cannot set {pointer:?}: parent is a scalar"
        ))),
    }
}

fn child_mut<'a>(
    parent: &'a mut Value,
    token: &str,
    next: &str,
) -> Result<&'a mut Value, StepFailure> {
    if parent.is_null() {
        *parent = container_for(token);
    }
    match parent {
        Value::Object(map) => Ok(map
            .entry(token.to_string())
            .or_insert_with(|| container_for(next))),
        Value::Array(items) => {
            let idx = index(token, items.len())?;
            if idx == items.len() {
                items.push(container_for(next));
            }
            Ok(&mut items[idx])
        }
        _ => Err(StepFailure::Template(format!(
            "cannot descend into scalar at {token:?}"
        ))),
    }
}

fn container_for(token: &str) -> Value {
    if token.parse::<usize>().is_ok() {
        Value::Array(Vec::new())
    } else {
        Value::Object(Map::new())
    }
}

fn index(token: &str, len: usize) -> Result<usize, StepFailure> {
    let idx: usize = token
        .parse()
        .map_err(|_| StepFailure::Template(format!("expected array index, got {token:?}")))?;
    if idx > len {
        return Err(StepFailure::Template(format!(
            "index {idx} out of range for array of length {len}"
        )));
    }
    Ok(idx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fill_sets_top_level_key() {
        let template = json!({ "key": "", "rclass": "local", "packageType": "docker" });
        let body = fill(&template, vec![("/key", json!("docker-local-1"))]).unwrap();
        assert_eq!(body["key"], "docker-local-1");
        assert_eq!(body["packageType"], "docker");
        assert_eq!(template["key"], "", "template itself is untouched");
    }

    #[test]
    fn test_fill_nested_array_paths() {
        let template = json!({
            "general_data": { "name": "", "active": true },
            "project_resources": { "resources": [ { "type": "repository", "name": "" } ] },
            "assigned_policies": [ { "name": "", "type": "security" } ]
        });
        let body = fill(
            &template,
            vec![
                ("/general_data/name", json!("watch-1")),
                ("/project_resources/resources/0/name", json!("repo-1")),
                ("/assigned_policies/0/name", json!("policy-1")),
            ],
        )
        .unwrap();

        assert_eq!(body["general_data"]["name"], "watch-1");
        assert_eq!(body["general_data"]["active"], true);
        assert_eq!(body["project_resources"]["resources"][0]["name"], "repo-1");
        assert_eq!(body["project_resources"]["resources"][0]["type"], "repository");
        assert_eq!(body["assigned_policies"][0]["type"], "security");
    }

    #[test]
    fn test_fill_creates_missing_structure() {
        let body = fill(
            &json!({}),
            vec![("/filters/resources/artifacts/0/repo", json!("r"))],
        )
        .unwrap();
        assert_eq!(body, json!({ "filters": { "resources": { "artifacts": [ { "repo": "r" } ] } } }));
    }

    #[test]
    fn test_fill_rejects_scalar_parent_and_gaps() {
        assert!(set_pointer(&mut json!({ "a": 1 }), "/a/b", json!(2)).is_err());
        assert!(set_pointer(&mut json!({ "a": [] }), "/a/3", json!(2)).is_err());
        assert!(set_pointer(&mut json!({}), "no-slash", json!(2)).is_err());
    }
}
