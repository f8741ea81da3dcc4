//! Persisted resource state and the recovery-flag store.
//!
//! A mutation's outcome must be committed before anything that can fail
//! afterwards (projection, waiting) runs. The two private flags survive
//! across invocations and drive the recovery paths; they are never surfaced
//! as user-visible attributes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::Result;

/// Private flag: a mutation succeeded but the follow-up projection read
/// failed; the next refresh or apply completes it.
pub const PENDING_PROJECTION: &str = "pending_projection";

/// Private flag: the object was imported without our identity annotation;
/// cleared on the first successful update.
pub const IMPORTED_WITHOUT_ANNOTATIONS: &str = "imported_without_annotations";

/// Everything persisted for one resource instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    /// Immutable instance identity, stamped into the object's annotations.
    pub id: String,
    /// Fingerprint of the cluster the object lives in. A changed fingerprint
    /// on a later invocation means the configuration points at a different
    /// cluster, which is refused.
    pub connection_fingerprint: String,
    /// Resolved object identity, kept alongside the manifest so state is
    /// readable without re-parsing YAML.
    pub api_version: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
    /// The manifest text as last applied.
    pub yaml_body: String,
    /// Opaque serialized projection of the owned fields; byte-equality with
    /// a recomputed projection means no drift.
    pub managed_state_projection: String,
    /// Human-readable JSON of path to owning manager.
    pub field_ownership: String,
    /// Pruned status subtree from a `field` wait, or from `track_status`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Value>,
}

/// Commit point for resource state plus a byte-string key/value side channel
/// for the recovery flags. Supplied by the calling framework; each instance
/// is scoped to one resource.
pub trait StateStore {
    fn persist(&mut self, state: &ResourceState) -> Result<()>;
    fn get_private(&self, key: &str) -> Option<Vec<u8>>;
    fn set_private(&mut self, key: &str, value: Option<&[u8]>) -> Result<()>;
}

pub fn flag(store: &dyn StateStore, key: &str) -> bool {
    matches!(store.get_private(key).as_deref(), Some(b"1"))
}

pub fn set_flag(store: &mut dyn StateStore, key: &str, on: bool) -> Result<()> {
    store.set_private(key, if on { Some(b"1") } else { None })
}

/// In-memory store for tests and embedding without a framework.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: Option<ResourceState>,
    private: BTreeMap<String, Vec<u8>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> Option<&ResourceState> {
        self.state.as_ref()
    }
}

impl StateStore for MemoryStateStore {
    fn persist(&mut self, state: &ResourceState) -> Result<()> {
        self.state = Some(state.clone());
        Ok(())
    }

    fn get_private(&self, key: &str) -> Option<Vec<u8>> {
        self.private.get(key).cloned()
    }

    fn set_private(&mut self, key: &str, value: Option<&[u8]>) -> Result<()> {
        match value {
            Some(bytes) => {
                self.private.insert(key.to_string(), bytes.to_vec());
            }
            None => {
                self.private.remove(key);
            }
        }
        Ok(())
    }
}
