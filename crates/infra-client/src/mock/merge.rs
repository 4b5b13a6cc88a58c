//! JSON merge patch and label-selector helpers for the mock store

use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Applies an RFC 7386 JSON merge patch to `target`
pub(crate) fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                merge_patch(target_map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

/// Evaluates a comma-separated equality selector (`k=v`, `k!=v`, `k`, `!k`)
pub(crate) fn selector_matches(selector: &str, labels: &BTreeMap<String, String>) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| {
            if let Some((key, value)) = term.split_once("!=") {
                labels.get(key.trim()).map(String::as_str) != Some(value.trim())
            } else if let Some((key, value)) = term.split_once('=') {
                let key = key.trim();
                let value = value.trim().trim_start_matches('=');
                labels.get(key).map(String::as_str) == Some(value)
            } else if let Some(key) = term.strip_prefix('!') {
                !labels.contains_key(key.trim())
            } else {
                labels.contains_key(term)
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_patch_replaces_removes_and_recurses() {
        let mut target = json!({
            "metadata": {"labels": {"a": "1", "b": "2"}, "finalizers": ["x", "y"]},
            "spec": {"disks": [{"device": "/dev/sda"}]}
        });
        merge_patch(
            &mut target,
            &json!({
                "metadata": {"labels": {"a": null, "c": "3"}, "finalizers": ["y"]},
                "spec": {"userData": "data"}
            }),
        );
        assert_eq!(
            target,
            json!({
                "metadata": {"labels": {"b": "2", "c": "3"}, "finalizers": ["y"]},
                "spec": {"disks": [{"device": "/dev/sda"}], "userData": "data"}
            })
        );
    }

    #[test]
    fn test_selector_matches_equality_and_existence() {
        let labels: BTreeMap<String, String> =
            [("owner".to_string(), "m1".to_string()), ("ns".to_string(), "default".to_string())]
                .into_iter()
                .collect();
        assert!(selector_matches("owner=m1,ns=default", &labels));
        assert!(selector_matches("owner==m1", &labels));
        assert!(!selector_matches("owner=m2", &labels));
        assert!(selector_matches("owner", &labels));
        assert!(!selector_matches("!owner", &labels));
        assert!(selector_matches("rack!=r1", &labels));
        assert!(selector_matches("", &labels));
    }
}
