//! Wait engine: block until a readiness predicate holds on a live object.
//!
//! Watch-first with a polling fallback. The loop snapshots the object, opens
//! a name-scoped watch from that snapshot's resourceVersion, and re-evaluates
//! the predicate on every Added/Modified event. Any watch failure downgrades
//! to a 2s poll for the remainder of the timeout. Cancellation is dropping
//! the future; nothing outlives the call.

use futures::StreamExt;
use kube::api::{DynamicObject, WatchEvent};
use rudder_core::{FieldPath, GvkRef, WaitFor};
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;

use crate::client::DynamicClient;
use crate::error::{KubeError, Result};

const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Kinds whose rollout we know how to judge, and which auto-wait when no
/// explicit wait configuration is given.
const ROLLOUT_KINDS: [&str; 3] = ["Deployment", "StatefulSet", "DaemonSet"];

/// A resolved wait predicate. `WaitFor` is what the user writes; this is
/// what the engine runs.
#[derive(Debug, Clone, PartialEq)]
pub enum WaitSpec {
    /// Path resolves to a non-empty value.
    Field(FieldPath),
    /// Every path resolves and string-formats to its expected value.
    FieldValues(Vec<(FieldPath, String)>),
    /// `status.conditions[]` has an entry of this type with status "True".
    Condition(String),
    /// Kind-specific workload readiness.
    Rollout,
}

impl WaitSpec {
    /// Turn user configuration into a predicate, or `None` for no waiting.
    ///
    /// An absent `wait_for` auto-activates rollout waiting for workload
    /// kinds. Any explicit configuration, including an empty block and an
    /// explicit `rollout = false`, suppresses the auto-trigger.
    pub fn resolve(wait_for: Option<&WaitFor>, kind: &str) -> Result<Option<WaitSpec>> {
        let Some(wait_for) = wait_for else {
            if ROLLOUT_KINDS.contains(&kind) {
                return Ok(Some(WaitSpec::Rollout));
            }
            return Ok(None);
        };

        if let Some(field) = &wait_for.field {
            return Ok(Some(WaitSpec::Field(FieldPath::parse(field)?)));
        }
        if !wait_for.field_values.is_empty() {
            let mut pairs = Vec::with_capacity(wait_for.field_values.len());
            for (path, expected) in &wait_for.field_values {
                pairs.push((FieldPath::parse(path)?, expected.clone()));
            }
            return Ok(Some(WaitSpec::FieldValues(pairs)));
        }
        if let Some(condition) = &wait_for.condition {
            return Ok(Some(WaitSpec::Condition(condition.clone())));
        }
        if wait_for.rollout == Some(true) {
            return Ok(Some(WaitSpec::Rollout));
        }
        // Explicitly empty, or rollout = false: no waiting at all.
        Ok(None)
    }

    /// Only a `field` wait surfaces the matched subtree as the status
    /// attribute.
    pub fn populates_status(&self) -> bool {
        matches!(self, WaitSpec::Field(_))
    }

    /// The matched subtree for the status attribute, shaped as a sparse
    /// object containing exactly the waited-on path.
    pub fn status_subtree(&self, body: &Value) -> Option<Value> {
        let WaitSpec::Field(path) = self else {
            return None;
        };
        let mut out = Value::Null;
        if path.copy_into(body, &mut out) {
            Some(out)
        } else {
            None
        }
    }

    fn evaluate(&self, body: &Value, kind: &str) -> Check {
        match self {
            WaitSpec::Field(path) => match path.lookup(body) {
                Some(value) if !is_empty_value(value) => Check::ready(),
                Some(_) => Check::waiting(format!("field '{}' is empty", path)),
                None => Check::waiting(format!("field '{}' not present", path)),
            },
            WaitSpec::FieldValues(pairs) => {
                for (path, expected) in pairs {
                    match path.lookup(body) {
                        None => {
                            return Check::waiting(format!("field '{}' not present", path));
                        }
                        Some(value) if format_value(value) != *expected => {
                            return Check::waiting(format!(
                                "field '{}' is '{}', want '{}'",
                                path,
                                format_value(value),
                                expected
                            ));
                        }
                        Some(_) => {}
                    }
                }
                Check::ready()
            }
            WaitSpec::Condition(wanted) => {
                let conditions = body
                    .pointer("/status/conditions")
                    .and_then(Value::as_array)
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                for condition in conditions {
                    if condition.get("type").and_then(Value::as_str) == Some(wanted) {
                        if condition.get("status").and_then(Value::as_str) == Some("True") {
                            return Check::ready();
                        }
                        return Check::waiting(format!(
                            "condition '{}' is {}",
                            wanted,
                            condition
                                .get("status")
                                .and_then(Value::as_str)
                                .unwrap_or("unknown")
                        ));
                    }
                }
                Check::waiting(format!("condition '{}' not reported", wanted))
            }
            WaitSpec::Rollout => rollout_check(body, kind),
        }
    }
}

struct Check {
    satisfied: bool,
    reason: String,
}

impl Check {
    fn ready() -> Self {
        Check {
            satisfied: true,
            reason: String::new(),
        }
    }

    fn waiting(reason: String) -> Self {
        Check {
            satisfied: false,
            reason,
        }
    }
}

/// A value counts as present only when it is semantically non-empty.
/// Booleans and numbers are never empty, zero included.
fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn int_at(body: &Value, pointer: &str) -> i64 {
    body.pointer(pointer).and_then(Value::as_i64).unwrap_or(0)
}

fn rollout_check(body: &Value, kind: &str) -> Check {
    let generation = int_at(body, "/metadata/generation");
    let observed = int_at(body, "/status/observedGeneration");
    if generation > observed {
        return Check::waiting(format!(
            "waiting for spec update to be observed: generation {} > observed {}",
            generation, observed
        ));
    }

    match kind {
        "Deployment" => {
            let mut replicas = int_at(body, "/spec/replicas");
            if replicas == 0 {
                replicas = 1;
            }
            let ready = int_at(body, "/status/readyReplicas");
            let updated = int_at(body, "/status/updatedReplicas");
            if ready == replicas && updated == replicas {
                Check::ready()
            } else {
                Check::waiting(format!("replicas not ready: {}/{} ready", ready, replicas))
            }
        }
        "StatefulSet" => {
            let mut replicas = int_at(body, "/spec/replicas");
            if replicas == 0 {
                replicas = 1;
            }
            let ready = int_at(body, "/status/readyReplicas");
            let current = int_at(body, "/status/currentReplicas");
            let updated = int_at(body, "/status/updatedReplicas");
            if ready == replicas && current == replicas && updated == replicas {
                Check::ready()
            } else {
                Check::waiting(format!("replicas not ready: {}/{} ready", ready, replicas))
            }
        }
        "DaemonSet" => {
            let desired = int_at(body, "/status/desiredNumberScheduled");
            let ready = int_at(body, "/status/numberReady");
            let updated = int_at(body, "/status/updatedNumberScheduled");
            if ready == desired && updated == desired {
                Check::ready()
            } else {
                Check::waiting(format!("pods not ready: {}/{} ready", ready, desired))
            }
        }
        _ => Check::ready(),
    }
}

/// Block until the predicate holds, or the timeout elapses.
///
/// Transient errors (get failures, watch drops) never abort the wait; they
/// downgrade to polling and the deadline decides. Returns the object that
/// satisfied the predicate.
pub async fn wait_until(
    client: &DynamicClient,
    gvk: &GvkRef,
    namespace: Option<&str>,
    name: &str,
    spec: &WaitSpec,
    kind: &str,
    timeout: Duration,
) -> Result<DynamicObject> {
    let deadline = Instant::now() + timeout;
    let mut last_reason = "object not yet observed".to_string();
    let mut watch_available = true;

    loop {
        let mut resource_version = None;
        match client.get(gvk, namespace, name).await {
            Ok(Some(obj)) => {
                let body = serde_json::to_value(&obj)?;
                let check = spec.evaluate(&body, kind);
                if check.satisfied {
                    return Ok(obj);
                }
                last_reason = check.reason;
                resource_version = obj.metadata.resource_version.clone();
            }
            Ok(None) => last_reason = "object not found".to_string(),
            Err(e) => {
                tracing::debug!(name, error = %e, "get failed during wait, continuing");
            }
        }

        if watch_available && let Some(rv) = resource_version {
            match client.watch_one(gvk, namespace, name, &rv).await {
                Ok(stream) => {
                    let mut stream = Box::pin(stream);
                    loop {
                        tokio::select! {
                            _ = tokio::time::sleep_until(deadline) => {
                                return Err(timeout_error(timeout, &last_reason));
                            }
                            event = stream.next() => match event {
                                Some(Ok(WatchEvent::Added(obj) | WatchEvent::Modified(obj))) => {
                                    let body = serde_json::to_value(&obj)?;
                                    let check = spec.evaluate(&body, kind);
                                    if check.satisfied {
                                        return Ok(obj);
                                    }
                                    last_reason = check.reason;
                                }
                                Some(Ok(WatchEvent::Deleted(_))) => {
                                    last_reason = "object was deleted".to_string();
                                }
                                Some(Ok(WatchEvent::Bookmark(_))) => {}
                                Some(Ok(WatchEvent::Error(status))) => {
                                    tracing::debug!(name, message = %status.message, "watch error, falling back to polling");
                                    watch_available = false;
                                    break;
                                }
                                Some(Err(e)) => {
                                    tracing::debug!(name, error = %e, "watch stream failed, falling back to polling");
                                    watch_available = false;
                                    break;
                                }
                                None => {
                                    watch_available = false;
                                    break;
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::debug!(name, error = %e, "watch open failed, falling back to polling");
                    watch_available = false;
                }
            }
        }

        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                return Err(timeout_error(timeout, &last_reason));
            }
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }
    }
}

/// Poll until the object is gone, for delete flows.
pub async fn wait_for_removal(
    client: &DynamicClient,
    gvk: &GvkRef,
    namespace: Option<&str>,
    name: &str,
    timeout: Duration,
) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        match client.get(gvk, namespace, name).await {
            Ok(None) => return Ok(()),
            Ok(Some(_)) => {}
            Err(e) => {
                tracing::debug!(name, error = %e, "get failed while waiting for removal");
            }
        }
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                return Err(KubeError::DeleteTimeout {
                    name: name.to_string(),
                    elapsed_secs: timeout.as_secs(),
                });
            }
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }
    }
}

fn timeout_error(timeout: Duration, reason: &str) -> KubeError {
    KubeError::WaitTimeout {
        elapsed_secs: timeout.as_secs(),
        reason: reason.to_string(),
    }
}
