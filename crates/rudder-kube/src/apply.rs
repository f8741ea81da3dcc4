//! Server-side apply pipeline
//!
//! Three steps for every mutation: stamp the resource-id annotation into the
//! desired body, SSA-patch it under our field manager, then re-read the
//! object. The re-read is not optional politeness: the patch response alone
//! may not reflect the final managed-fields merge under concurrent writers,
//! and ownership computation needs the authoritative list.

use kube::api::DynamicObject;
use regex::Regex;
use rudder_core::{GvkRef, annotations};
use serde_json::Value;
use std::sync::LazyLock;

use crate::client::DynamicClient;
use crate::error::{KubeError, Result};

/// Stamp the resource-instance id into the desired body. Idempotent; the
/// manifest is validated never to carry internal annotations itself.
pub fn stamp_identity(body: &mut Value, id: &str) {
    if annotations::get(body, annotations::RESOURCE_ID).as_deref() == Some(id) {
        return;
    }
    annotations::set(body, annotations::RESOURCE_ID, id);
}

/// SSA-apply the body, translating field-manager conflicts.
///
/// Without `force_conflicts`, a 409 becomes the Field Ownership Conflict
/// error naming the paths and the owning manager; ownership is never taken
/// silently. With it, the apply retries exactly once with force=true.
pub async fn ssa_apply(
    client: &DynamicClient,
    gvk: &GvkRef,
    namespace: Option<&str>,
    name: &str,
    body: &Value,
    field_manager: &str,
    force_conflicts: bool,
) -> Result<DynamicObject> {
    match client
        .apply(gvk, namespace, name, body, field_manager, false)
        .await
    {
        Ok(obj) => Ok(obj),
        Err(e) if e.is_conflict() => {
            if force_conflicts {
                tracing::warn!(name, "field conflict, retrying with force per force_conflicts");
                client
                    .apply(gvk, namespace, name, body, field_manager, true)
                    .await
            } else {
                let (manager, paths) = decode_conflict(&e);
                Err(KubeError::FieldConflict { paths, manager })
            }
        }
        Err(e) => Err(e),
    }
}

/// Re-read the object for the authoritative managed-fields list.
///
/// A failure here, after a successful apply, is exactly the situation the
/// pending-projection protocol exists for; callers must commit the mutation
/// result before treating this as an error.
pub async fn refresh(
    client: &DynamicClient,
    gvk: &GvkRef,
    namespace: Option<&str>,
    name: &str,
) -> Result<DynamicObject> {
    client
        .get(gvk, namespace, name)
        .await?
        .ok_or_else(|| KubeError::PendingProjection {
            message: format!("object '{}' not found after apply", name),
        })
}

static CONFLICT_MANAGER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"conflicts? with "([^"]+)""#).expect("valid regex"));
static CONFLICT_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*-\s+(\.\S.*)$").expect("valid regex"));
static CONFLICT_INLINE_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":\s+(\.\S+)\s*$").expect("valid regex"));

/// Pull the owning manager and the conflicting paths out of a 409 message.
///
/// The server message is the only place this information exists; if the
/// format is unexpected the whole message becomes the "path" so nothing is
/// swallowed.
fn decode_conflict(error: &KubeError) -> (String, Vec<String>) {
    let message = match error {
        KubeError::Api(kube::Error::Api(resp)) => resp.message.clone(),
        other => other.to_string(),
    };

    let manager = CONFLICT_MANAGER
        .captures(&message)
        .map(|c| c[1].to_string())
        .unwrap_or_else(|| "<unknown>".to_string());

    let mut paths: Vec<String> = CONFLICT_PATH
        .captures_iter(&message)
        .map(|c| c[1].trim().to_string())
        .collect();
    if paths.is_empty()
        && let Some(c) = CONFLICT_INLINE_PATH.captures(&message)
    {
        paths.push(c[1].to_string());
    }
    if paths.is_empty() {
        paths.push(message);
    }

    (manager, paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn conflict_error(message: &str) -> KubeError {
        KubeError::Api(kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: message.to_string(),
            reason: "Conflict".to_string(),
            code: 409,
        }))
    }

    #[test]
    fn test_stamp_identity() {
        let mut body = json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "x"}});
        stamp_identity(&mut body, "abc");
        assert_eq!(
            annotations::get(&body, annotations::RESOURCE_ID).as_deref(),
            Some("abc")
        );

        // Re-stamping with the same id changes nothing.
        let before = body.clone();
        stamp_identity(&mut body, "abc");
        assert_eq!(body, before);
    }

    #[test]
    fn test_decode_conflict_single_inline() {
        let err = conflict_error(
            r#"Apply failed with 1 conflict: conflict with "kubectl-client-side-apply" using apps/v1: .spec.replicas"#,
        );
        let (manager, paths) = decode_conflict(&err);
        assert_eq!(manager, "kubectl-client-side-apply");
        assert_eq!(paths, vec![".spec.replicas"]);
    }

    #[test]
    fn test_decode_conflict_multi_line() {
        let err = conflict_error(
            "Apply failed with 2 conflicts: conflicts with \"hpa-controller\" using apps/v1:\n- .spec.replicas\n- .spec.template.spec.containers[name=\"app\"].image",
        );
        let (manager, paths) = decode_conflict(&err);
        assert_eq!(manager, "hpa-controller");
        assert_eq!(paths.len(), 2);
        assert_eq!(paths[0], ".spec.replicas");
        assert!(paths[1].contains("containers"));
    }

    #[test]
    fn test_decode_conflict_unexpected_format() {
        let err = conflict_error("something the regexes do not know");
        let (manager, paths) = decode_conflict(&err);
        assert_eq!(manager, "<unknown>");
        assert_eq!(paths, vec!["something the regexes do not know"]);
    }
}
