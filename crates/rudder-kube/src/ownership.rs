//! Field ownership from managed-fields metadata
//!
//! The API server records, per field manager, a FieldsV1 trie of everything
//! that manager last applied. Keys encode the step type: `f:` descends into
//! a map member, `k:` selects an associative-list element by its key fields,
//! `v:` selects a set element by value, `i:` selects a positional element,
//! and `.` marks ownership of the node itself. An empty object owns the
//! whole subtree at that node.
//!
//! Decoding is deterministic and offline. A malformed entry contributes no
//! paths; one corrupt manager must never abort the whole computation.

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ManagedFieldsEntry;
use rudder_core::{FieldPath, PathSegment};
use serde_json::Value;

/// Decode one FieldsV1 tree into flat paths. `None` when malformed.
pub fn decode_fields_v1(fields: &Value) -> Option<Vec<FieldPath>> {
    let root = fields.as_object()?;
    let mut paths = Vec::new();
    decode_node(root, &FieldPath::root(), &mut paths)?;
    Some(paths)
}

fn decode_node(
    node: &serde_json::Map<String, Value>,
    prefix: &FieldPath,
    out: &mut Vec<FieldPath>,
) -> Option<()> {
    if node.is_empty() {
        // Leaf marker: the manager owns everything at this position.
        if !prefix.is_root() {
            out.push(prefix.clone());
        }
        return Some(());
    }

    for (key, child) in node {
        if key == "." {
            if !prefix.is_root() {
                out.push(prefix.clone());
            }
            continue;
        }

        let segment = if let Some(name) = key.strip_prefix("f:") {
            PathSegment::Field(name.to_string())
        } else if let Some(raw) = key.strip_prefix("k:") {
            let keys: Value = serde_json::from_str(raw).ok()?;
            let keys = keys.as_object()?;
            PathSegment::Key(keys.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        } else if let Some(raw) = key.strip_prefix("v:") {
            PathSegment::Value(serde_json::from_str(raw).ok()?)
        } else if let Some(raw) = key.strip_prefix("i:") {
            PathSegment::Index(raw.parse().ok()?)
        } else {
            return None;
        };

        let child = child.as_object()?;
        decode_node(child, &prefix.child(segment), out)?;
    }
    Some(())
}

/// Paths owned by `manager`: the union over all of that manager's entries.
pub fn owned_paths(entries: &[ManagedFieldsEntry], manager: &str) -> Vec<FieldPath> {
    let mut seen = BTreeSet::new();
    let mut paths = Vec::new();
    for entry in entries {
        if entry.manager.as_deref() != Some(manager) {
            continue;
        }
        for path in decode_entry(entry) {
            if seen.insert(path.to_string()) {
                paths.push(path);
            }
        }
    }
    paths
}

/// path → managers, across every entry, for the field_ownership attribute.
pub fn ownership_map(entries: &[ManagedFieldsEntry]) -> BTreeMap<String, String> {
    let mut by_path: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for entry in entries {
        let Some(manager) = entry.manager.as_deref() else {
            continue;
        };
        for path in decode_entry(entry) {
            by_path
                .entry(path.to_string())
                .or_default()
                .insert(manager.to_string());
        }
    }
    by_path
        .into_iter()
        .map(|(path, managers)| (path, managers.into_iter().collect::<Vec<_>>().join(", ")))
        .collect()
}

/// Render the ownership map as the human-readable JSON attribute.
pub fn field_ownership_json(entries: &[ManagedFieldsEntry]) -> String {
    serde_json::to_string(&ownership_map(entries)).unwrap_or_else(|_| "{}".to_string())
}

fn decode_entry(entry: &ManagedFieldsEntry) -> Vec<FieldPath> {
    if let Some(fields_type) = entry.fields_type.as_deref()
        && fields_type != "FieldsV1"
    {
        tracing::debug!(fields_type, "skipping managed-fields entry with unknown encoding");
        return Vec::new();
    }
    let Some(fields) = &entry.fields_v1 else {
        return Vec::new();
    };
    match decode_fields_v1(&fields.0) {
        Some(paths) => paths,
        None => {
            tracing::debug!(
                manager = entry.manager.as_deref().unwrap_or("<unknown>"),
                "skipping malformed managed-fields entry"
            );
            Vec::new()
        }
    }
}

/// Every leaf path present in a manifest body, with positional list indexing.
pub fn leaf_paths(body: &Value) -> Vec<FieldPath> {
    let mut paths = Vec::new();
    collect_leaves(body, &FieldPath::root(), &mut paths);
    paths
}

fn collect_leaves(value: &Value, prefix: &FieldPath, out: &mut Vec<FieldPath>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                collect_leaves(child, &prefix.child(PathSegment::Field(key.clone())), out);
            }
        }
        Value::Array(items) if !items.is_empty() => {
            for (i, child) in items.iter().enumerate() {
                collect_leaves(child, &prefix.child(PathSegment::Index(i)), out);
            }
        }
        _ => {
            if !prefix.is_root() {
                out.push(prefix.clone());
            }
        }
    }
}

/// Requested paths that another manager currently owns.
///
/// `others` is the path→manager map with our own manager's rows removed. A
/// request conflicts when it targets an owned path exactly or sits anywhere
/// on the same branch (owning `spec.replicas` blocks a request for `spec`
/// as a whole and vice versa).
pub fn detect_conflicts(
    requested: &[FieldPath],
    others: &BTreeMap<String, String>,
) -> Vec<(String, String)> {
    let other_paths: Vec<(FieldPath, &String)> = others
        .iter()
        .filter_map(|(path, manager)| parse_displayed(path).map(|p| (p, manager)))
        .collect();

    let mut conflicts = Vec::new();
    let mut seen = BTreeSet::new();
    for request in requested {
        for (owned, manager) in &other_paths {
            if request.starts_with(owned) || owned.starts_with(request) {
                let rendered = owned.to_string();
                if seen.insert(rendered.clone()) {
                    conflicts.push((rendered, (*manager).clone()));
                }
            }
        }
    }
    conflicts
}

// Displayed ownership paths with key/value segments have no dotted-string
// spelling; those cannot be requested by name and never parse back.
fn parse_displayed(path: &str) -> Option<FieldPath> {
    FieldPath::parse(path).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::FieldsV1;
    use serde_json::json;

    fn entry(manager: &str, fields: Value) -> ManagedFieldsEntry {
        ManagedFieldsEntry {
            manager: Some(manager.to_string()),
            operation: Some("Apply".to_string()),
            api_version: Some("v1".to_string()),
            fields_type: Some("FieldsV1".to_string()),
            fields_v1: Some(FieldsV1(fields)),
            ..Default::default()
        }
    }

    fn rendered(paths: &[FieldPath]) -> Vec<String> {
        paths.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_decode_map_members() {
        let fields = json!({
            "f:data": {
                "f:key1": {},
                "f:key2": {},
            },
            "f:metadata": {
                "f:labels": {
                    ".": {},
                    "f:app": {},
                }
            }
        });
        let paths = decode_fields_v1(&fields).unwrap();
        let rendered = rendered(&paths);
        assert!(rendered.contains(&"data.key1".to_string()));
        assert!(rendered.contains(&"data.key2".to_string()));
        // "." marks the labels map itself as owned, alongside its member.
        assert!(rendered.contains(&"metadata.labels".to_string()));
        assert!(rendered.contains(&"metadata.labels.app".to_string()));
    }

    #[test]
    fn test_decode_associative_list_keys() {
        let fields = json!({
            "f:spec": {
                "f:containers": {
                    "k:{\"name\":\"app\"}": {
                        ".": {},
                        "f:image": {},
                    }
                }
            }
        });
        let paths = rendered(&decode_fields_v1(&fields).unwrap());
        assert!(paths.contains(&r#"spec.containers[name="app"]"#.to_string()));
        assert!(paths.contains(&r#"spec.containers[name="app"].image"#.to_string()));
    }

    #[test]
    fn test_decode_set_values_and_indices() {
        let fields = json!({
            "f:spec": {
                "f:finalizers": {
                    "v:\"kubernetes\"": {},
                },
                "f:ports": {
                    "i:0": {"f:port": {}},
                }
            }
        });
        let paths = rendered(&decode_fields_v1(&fields).unwrap());
        assert!(paths.contains(&r#"spec.finalizers[v="kubernetes"]"#.to_string()));
        assert!(paths.contains(&"spec.ports[0].port".to_string()));
    }

    #[test]
    fn test_decode_malformed() {
        assert!(decode_fields_v1(&json!("not a map")).is_none());
        assert!(decode_fields_v1(&json!({"x:badprefix": {}})).is_none());
        assert!(decode_fields_v1(&json!({"k:not-json": {}})).is_none());
        assert!(decode_fields_v1(&json!({"f:spec": "not a map"})).is_none());
    }

    #[test]
    fn test_owned_paths_filters_by_manager_and_unions_entries() {
        let entries = vec![
            entry("rudder", json!({"f:data": {"f:a": {}}})),
            entry("kubectl", json!({"f:data": {"f:b": {}}})),
            entry("rudder", json!({"f:data": {"f:a": {}, "f:c": {}}})),
        ];
        let paths = rendered(&owned_paths(&entries, "rudder"));
        assert_eq!(paths, vec!["data.a", "data.c"]);
    }

    #[test]
    fn test_malformed_entry_skipped_not_fatal() {
        let entries = vec![
            entry("rudder", json!({"bogus": {}})),
            entry("rudder", json!({"f:data": {"f:a": {}}})),
        ];
        let paths = rendered(&owned_paths(&entries, "rudder"));
        assert_eq!(paths, vec!["data.a"]);
    }

    #[test]
    fn test_ownership_map_merges_managers() {
        let entries = vec![
            entry("rudder", json!({"f:spec": {"f:replicas": {}}})),
            entry("hpa-controller", json!({"f:spec": {"f:replicas": {}}})),
        ];
        let map = ownership_map(&entries);
        assert_eq!(
            map.get("spec.replicas").map(String::as_str),
            Some("hpa-controller, rudder")
        );

        let json = field_ownership_json(&entries);
        assert!(json.contains("spec.replicas"));
        assert!(json.contains("hpa-controller"));
    }

    #[test]
    fn test_leaf_paths() {
        let body = json!({
            "apiVersion": "v1",
            "metadata": {"name": "x", "labels": {}},
            "spec": {"items": [{"a": 1}, 2]},
        });
        let paths = rendered(&leaf_paths(&body));
        assert!(paths.contains(&"apiVersion".to_string()));
        assert!(paths.contains(&"metadata.name".to_string()));
        assert!(paths.contains(&"metadata.labels".to_string()));
        assert!(paths.contains(&"spec.items[0].a".to_string()));
        assert!(paths.contains(&"spec.items[1]".to_string()));
    }

    #[test]
    fn test_detect_conflicts() {
        let mut others = BTreeMap::new();
        others.insert("spec.replicas".to_string(), "hpa-controller".to_string());
        others.insert("data.other".to_string(), "kubectl".to_string());

        let requested = vec![
            FieldPath::parse("spec.replicas").unwrap(),
            FieldPath::parse("data.mine").unwrap(),
        ];
        let conflicts = detect_conflicts(&requested, &others);
        assert_eq!(
            conflicts,
            vec![("spec.replicas".to_string(), "hpa-controller".to_string())]
        );

        // Requesting a parent of an owned path also conflicts.
        let parent = vec![FieldPath::parse("spec").unwrap()];
        assert_eq!(detect_conflicts(&parent, &others).len(), 1);
    }
}
