//! Internal annotation namespace
//!
//! rudder stamps one annotation on every object it manages so a later read
//! can tell whether the live object still belongs to the same resource
//! instance. Everything under the prefix is reserved: manifests may not set
//! these keys, and `ignore_fields` may not hide them.

/// Prefix reserved for rudder's own annotations.
pub const ANNOTATION_PREFIX: &str = "rudder.io/";

/// Annotation carrying the immutable resource-instance id.
pub const RESOURCE_ID: &str = "rudder.io/resource-id";

/// True when an annotation key lives in the reserved namespace.
pub fn is_internal(key: &str) -> bool {
    key.starts_with(ANNOTATION_PREFIX)
}

/// Read an annotation from an untyped object's metadata.
pub fn get(body: &serde_json::Value, key: &str) -> Option<String> {
    body.get("metadata")?
        .get("annotations")?
        .get(key)?
        .as_str()
        .map(str::to_string)
}

/// Write an annotation into an untyped object's metadata, creating the
/// annotations map when absent.
pub fn set(body: &mut serde_json::Value, key: &str, value: &str) {
    let metadata = body
        .as_object_mut()
        .map(|m| m.entry("metadata").or_insert_with(|| serde_json::json!({})));
    let Some(metadata) = metadata else { return };
    let annotations = metadata
        .as_object_mut()
        .map(|m| m.entry("annotations").or_insert_with(|| serde_json::json!({})));
    if let Some(serde_json::Value::Object(map)) = annotations {
        map.insert(key.to_string(), serde_json::Value::String(value.to_string()));
    }
}
