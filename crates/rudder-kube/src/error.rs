//! Error types for rudder-kube

use thiserror::Error;

/// Result type for rudder-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Errors that can occur while reconciling a managed object
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// Manifest or configuration error from rudder-core
    #[error(transparent)]
    Core(#[from] rudder_core::CoreError),

    /// Another field manager owns fields the manifest wants to change
    #[error("Field Ownership Conflict: Cannot modify fields owned by other controllers\n{}\nHint: set force_conflicts = true to take ownership, or add the paths to ignore_fields", format_conflicts(.paths, .manager))]
    FieldConflict { paths: Vec<String>, manager: String },

    /// The live object belongs to a different resource instance
    #[error("object '{name}' is already managed by another resource instance (id '{owner_id}')\nHint: import the existing object instead of creating it, or remove the other instance first")]
    AlreadyManaged { name: String, owner_id: String },

    /// The stored ownership annotation no longer matches
    #[error("ownership mismatch for '{name}': expected resource id '{expected}', found {found}\nHint: another instance or a manual edit may have claimed this object")]
    OwnershipMismatch {
        name: String,
        expected: String,
        found: String,
    },

    /// Delete refused while protection is on
    #[error("Delete Protection Enabled: refusing to delete '{name}'\nHint: set delete_protection = false and apply before destroying")]
    DeleteProtection { name: String },

    /// Wait condition did not hold before the deadline
    #[error("Wait condition failed: timed out after {elapsed_secs}s: {reason}")]
    WaitTimeout { elapsed_secs: u64, reason: String },

    /// Object still present after the delete timeout
    #[error("Deletion timeout: '{name}' still exists after {elapsed_secs}s\nLikely blocked by finalizers or dependent objects; set force_destroy = true to strip finalizers")]
    DeleteTimeout { name: String, elapsed_secs: u64 },

    /// The configured connection points at a different cluster than the
    /// one the resource was created against
    #[error("connection change would move resource to a different cluster\nHint: destroy the resource first, or keep the connection pointed at the original cluster")]
    ConnectionChanged,

    /// ignore_fields may not hide rudder's own annotations
    #[error("Cannot ignore provider internal annotations: {path}")]
    IgnoreInternalAnnotation { path: String },

    /// The mutation succeeded but the follow-up read for managed fields
    /// did not; state was committed without a projection
    #[error("apply succeeded but refreshing the managed-state projection failed: {message}\nHint: re-run the apply; the retry completes the projection without re-creating the object")]
    PendingProjection { message: String },

    /// Import target does not exist in the cluster
    #[error("cannot import '{name}': object not found in the cluster\nHint: check the name, namespace, and cluster connection")]
    ImportNotFound { name: String },

    /// Discovery could not resolve the manifest's kind
    #[error("unknown resource type: {gvk}\nHint: check apiVersion/kind spelling, or install the CRD first")]
    UnknownResourceType { gvk: String },

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

fn format_conflicts(paths: &[String], manager: &str) -> String {
    if paths.is_empty() {
        format!("conflicting manager: '{}'", manager)
    } else {
        let listed: Vec<String> = paths.iter().map(|p| format!("  - {}", p)).collect();
        format!("owned by '{}':\n{}", manager, listed.join("\n"))
    }
}

impl From<serde_json::Error> for KubeError {
    fn from(e: serde_json::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for KubeError {
    fn from(e: serde_yaml::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl KubeError {
    /// Check if this is a Kubernetes 404 Not Found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, KubeError::Api(kube::Error::Api(resp)) if resp.code == 404)
    }

    /// Check if this is a conflict error (409)
    pub fn is_conflict(&self) -> bool {
        matches!(self, KubeError::Api(kube::Error::Api(resp)) if resp.code == 409)
    }
}
