//! Per-resource configuration
//!
//! One `ResourceConfig` describes everything a single operation needs: the
//! manifest text, how to reach the cluster, how long to wait, and which
//! fields to leave to other controllers.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{CoreError, Result};

fn default_timeout() -> Duration {
    Duration::from_secs(10 * 60)
}

/// Configuration for one managed resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct ResourceConfig {
    /// Raw YAML manifest of the object under management.
    pub yaml_body: String,

    /// How to reach the target cluster.
    pub cluster_connection: ClusterConnection,

    /// Optional wait configuration. `None` means "unset" (rollout waiting
    /// auto-activates for workload kinds); `Some` with nothing set is an
    /// explicit "do not wait".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_for: Option<WaitFor>,

    /// Dotted field paths excluded from ownership and drift comparison.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignore_fields: Vec<String>,

    /// Take ownership of conflicting fields instead of failing.
    #[serde(default)]
    pub force_conflicts: bool,

    /// Refuse destroy operations while set.
    #[serde(default)]
    pub delete_protection: bool,

    /// Strip finalizers when a delete exceeds its timeout.
    #[serde(default)]
    pub force_destroy: bool,

    /// Surface the live `status` subtree on read even without a field wait.
    #[serde(default)]
    pub track_status: bool,

    /// Upper bound for apply-time waiting.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub apply_timeout: Duration,

    /// Upper bound for waiting on object removal.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub delete_timeout: Duration,
}

/// Connection details for the target cluster.
///
/// Either a kubeconfig (raw text or a path, with an optional context) or an
/// explicit endpoint (host + CA + token or client certificate).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct ClusterConnection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Base64-encoded cluster CA certificate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_ca_certificate: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Base64-encoded client certificate, paired with `client_key`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_certificate: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_key: Option<String>,

    #[serde(default)]
    pub insecure: bool,
}

impl ClusterConnection {
    /// Check that exactly one connection style is configured.
    pub fn validate(&self) -> Result<()> {
        let has_kubeconfig = self.kubeconfig.is_some() || self.kubeconfig_path.is_some();
        let has_host = self.host.is_some();

        if self.kubeconfig.is_some() && self.kubeconfig_path.is_some() {
            return Err(CoreError::InvalidConnection {
                message: "kubeconfig and kubeconfig_path are mutually exclusive".to_string(),
            });
        }
        if !has_kubeconfig && !has_host {
            return Err(CoreError::InvalidConnection {
                message: "one of kubeconfig, kubeconfig_path, or host is required".to_string(),
            });
        }
        if has_host {
            let has_token = self.token.is_some();
            let has_cert = self.client_certificate.is_some() && self.client_key.is_some();
            if !has_token && !has_cert {
                return Err(CoreError::InvalidConnection {
                    message: "host connections require token or client_certificate/client_key"
                        .to_string(),
                });
            }
        }
        Ok(())
    }

    /// Stable hash of the cluster identity.
    ///
    /// Changing credentials keeps the fingerprint; changing the endpoint or
    /// CA (or pointing at a different kubeconfig) changes it, which is how a
    /// connection edit that would silently retarget the resource at another
    /// cluster gets caught.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        if let Some(host) = &self.host {
            hasher.update(b"host:");
            hasher.update(host.as_bytes());
            if let Some(ca) = &self.cluster_ca_certificate {
                hasher.update(b"ca:");
                hasher.update(ca.as_bytes());
            }
        } else {
            // Hash the kubeconfig's server line(s) rather than the whole
            // file so credential rotation does not read as a cluster move.
            let text = match (&self.kubeconfig, &self.kubeconfig_path) {
                (Some(raw), _) => raw.clone(),
                (None, Some(path)) => std::fs::read_to_string(path).unwrap_or_default(),
                (None, None) => String::new(),
            };
            hasher.update(b"kubeconfig:");
            if let Some(ctx) = &self.context {
                hasher.update(ctx.as_bytes());
            }
            for line in text.lines() {
                let line = line.trim();
                if let Some(server) = line.strip_prefix("server:") {
                    hasher.update(server.trim().as_bytes());
                }
            }
        }
        hex::encode(hasher.finalize())
    }
}

/// User-configured wait intent, stored exactly as written.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct WaitFor {
    /// Wait for a path to exist with a non-empty value; the matched subtree
    /// is copied into the persisted status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,

    /// Wait for every path to equal its expected string exactly.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub field_values: BTreeMap<String, String>,

    /// Wait for `status.conditions[].type == X` with status "True".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    /// Wait for workload rollout completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollout: Option<bool>,
}

impl WaitFor {
    /// True when the user wrote `wait_for = {}`: an explicit "no waiting".
    pub fn is_empty(&self) -> bool {
        self.field.is_none()
            && self.field_values.is_empty()
            && self.condition.is_none()
            && self.rollout.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn kubeconfig_connection() -> ClusterConnection {
        ClusterConnection {
            kubeconfig: Some(
                "clusters:\n- cluster:\n    server: https://one.example:6443\n".to_string(),
            ),
            ..Default::default()
        }
    }

    #[test]
    fn test_config_deserialize_defaults() {
        let config: ResourceConfig = serde_yaml::from_str(
            r#"
yaml_body: "apiVersion: v1"
cluster_connection:
  kubeconfig_path: /home/user/.kube/config
"#,
        )
        .unwrap();

        assert!(config.wait_for.is_none());
        assert!(config.ignore_fields.is_empty());
        assert!(!config.force_conflicts);
        assert!(!config.delete_protection);
        assert!(!config.track_status);
        assert_eq!(config.apply_timeout, Duration::from_secs(600));
        assert_eq!(config.delete_timeout, Duration::from_secs(600));
    }

    #[test]
    fn test_human_readable_timeouts() {
        let config: ResourceConfig = serde_yaml::from_str(
            r#"
yaml_body: "apiVersion: v1"
cluster_connection:
  host: https://example:6443
  token: t
apply_timeout: 90s
delete_timeout: 5m
"#,
        )
        .unwrap();
        assert_eq!(config.apply_timeout, Duration::from_secs(90));
        assert_eq!(config.delete_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_empty_wait_for_is_distinct_from_unset() {
        let unset: ResourceConfig = serde_yaml::from_str(
            "yaml_body: x\ncluster_connection:\n  host: h\n  token: t\n",
        )
        .unwrap();
        assert!(unset.wait_for.is_none());

        let empty: ResourceConfig = serde_yaml::from_str(
            "yaml_body: x\ncluster_connection:\n  host: h\n  token: t\nwait_for: {}\n",
        )
        .unwrap();
        assert!(empty.wait_for.as_ref().is_some_and(WaitFor::is_empty));
    }

    #[test]
    fn test_connection_validation() {
        assert!(ClusterConnection::default().validate().is_err());

        let both = ClusterConnection {
            kubeconfig: Some("x".to_string()),
            kubeconfig_path: Some("/tmp/kc".to_string()),
            ..Default::default()
        };
        assert!(both.validate().is_err());

        let host_no_auth = ClusterConnection {
            host: Some("https://example:6443".to_string()),
            ..Default::default()
        };
        assert!(host_no_auth.validate().is_err());

        let host_token = ClusterConnection {
            host: Some("https://example:6443".to_string()),
            token: Some("t".to_string()),
            ..Default::default()
        };
        host_token.validate().unwrap();
        kubeconfig_connection().validate().unwrap();
    }

    #[test]
    fn test_fingerprint_tracks_cluster_not_credentials() {
        let base = ClusterConnection {
            host: Some("https://one.example:6443".to_string()),
            token: Some("alpha".to_string()),
            ..Default::default()
        };
        let rotated = ClusterConnection {
            token: Some("beta".to_string()),
            ..base.clone()
        };
        let moved = ClusterConnection {
            host: Some("https://two.example:6443".to_string()),
            ..base.clone()
        };

        assert_eq!(base.fingerprint(), rotated.fingerprint());
        assert_ne!(base.fingerprint(), moved.fingerprint());
    }

    #[test]
    fn test_fingerprint_from_kubeconfig_server() {
        let raw = kubeconfig_connection();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "clusters:\n- cluster:\n    server: https://one.example:6443\n"
        )
        .unwrap();
        let from_path = ClusterConnection {
            kubeconfig_path: Some(file.path().to_string_lossy().into_owned()),
            ..Default::default()
        };

        assert_eq!(raw.fingerprint(), from_path.fingerprint());
    }
}
