//! Manifest parsing and pre-network validation
//!
//! A resource instance manages exactly one Kubernetes object, parsed from
//! the user's YAML text into an untyped tree. Validation here runs before
//! any network call: fields the API server populates itself are rejected,
//! as are annotations in rudder's reserved namespace.

use serde_json::Value;

use crate::annotations;
use crate::error::{CoreError, Result};

/// Metadata members only the API server may write.
const SERVER_MANAGED_METADATA: &[&str] = &[
    "managedFields",
    "uid",
    "resourceVersion",
    "generation",
    "creationTimestamp",
];

/// Group/version/kind of a manifest, before discovery resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GvkRef {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl GvkRef {
    /// Split an `apiVersion` string: "apps/v1" carries a group, bare "v1"
    /// is the core API.
    pub fn from_api_version(api_version: &str, kind: &str) -> Self {
        let (group, version) = match api_version.rsplit_once('/') {
            Some((g, v)) => (g.to_string(), v.to_string()),
            None => (String::new(), api_version.to_string()),
        };
        GvkRef {
            group,
            version,
            kind: kind.to_string(),
        }
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl std::fmt::Display for GvkRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.api_version(), self.kind)
    }
}

/// A parsed single-object manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    body: Value,
}

impl Manifest {
    /// Parse one YAML document into an untyped object tree.
    pub fn parse(yaml: &str) -> Result<Self> {
        let mut documents = Vec::new();
        for document in serde_yaml::Deserializer::from_str(yaml) {
            let value: Value =
                serde::Deserialize::deserialize(document).map_err(|e| CoreError::InvalidYaml {
                    message: e.to_string(),
                })?;
            if !value.is_null() {
                documents.push(value);
            }
        }

        let body = match documents.len() {
            0 => {
                return Err(CoreError::InvalidYaml {
                    message: "manifest is empty".to_string(),
                });
            }
            1 => documents.into_iter().next().expect("one document"),
            _ => return Err(CoreError::MultipleDocuments),
        };

        if !body.is_object() {
            return Err(CoreError::InvalidYaml {
                message: "manifest root must be a mapping".to_string(),
            });
        }

        let manifest = Manifest { body };
        manifest.require("apiVersion")?;
        manifest.require("kind")?;
        if manifest.name().is_none() {
            return Err(CoreError::MissingField {
                field: "metadata.name".to_string(),
            });
        }
        Ok(manifest)
    }

    fn require(&self, field: &str) -> Result<&str> {
        self.body
            .get(field)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| CoreError::MissingField {
                field: field.to_string(),
            })
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    pub fn into_body(self) -> Value {
        self.body
    }

    pub fn api_version(&self) -> &str {
        self.body
            .get("apiVersion")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn kind(&self) -> &str {
        self.body.get("kind").and_then(Value::as_str).unwrap_or_default()
    }

    pub fn gvk(&self) -> GvkRef {
        GvkRef::from_api_version(self.api_version(), self.kind())
    }

    pub fn name(&self) -> Option<&str> {
        self.body
            .get("metadata")
            .and_then(|m| m.get("name"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn namespace(&self) -> Option<&str> {
        self.body
            .get("metadata")
            .and_then(|m| m.get("namespace"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Reject manifests that try to set server-populated fields or
    /// annotations in the reserved namespace.
    pub fn validate(&self) -> Result<()> {
        if let Some(metadata) = self.body.get("metadata").and_then(Value::as_object) {
            for member in SERVER_MANAGED_METADATA {
                if metadata.contains_key(*member) {
                    return Err(CoreError::ServerManagedField {
                        path: format!("metadata.{}", member),
                    });
                }
            }
            if let Some(annotations) = metadata.get("annotations").and_then(Value::as_object) {
                for key in annotations.keys() {
                    if annotations::is_internal(key) {
                        return Err(CoreError::InternalAnnotation {
                            annotation: key.clone(),
                        });
                    }
                }
            }
        }
        if self.body.get("status").is_some() {
            return Err(CoreError::ServerManagedField {
                path: "status".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIGMAP: &str = r#"
apiVersion: v1
kind: ConfigMap
metadata:
  name: demo
  namespace: default
data:
  key: value
"#;

    #[test]
    fn test_parse_basic() {
        let manifest = Manifest::parse(CONFIGMAP).unwrap();
        assert_eq!(manifest.api_version(), "v1");
        assert_eq!(manifest.kind(), "ConfigMap");
        assert_eq!(manifest.name(), Some("demo"));
        assert_eq!(manifest.namespace(), Some("default"));
        manifest.validate().unwrap();
    }

    #[test]
    fn test_gvk_split() {
        let gvk = GvkRef::from_api_version("apps/v1", "Deployment");
        assert_eq!(gvk.group, "apps");
        assert_eq!(gvk.version, "v1");
        assert_eq!(gvk.api_version(), "apps/v1");

        let core = GvkRef::from_api_version("v1", "ConfigMap");
        assert_eq!(core.group, "");
        assert_eq!(core.api_version(), "v1");
        assert_eq!(core.to_string(), "v1/ConfigMap");
    }

    #[test]
    fn test_invalid_yaml() {
        let err = Manifest::parse("a: [unclosed").unwrap_err();
        assert!(err.to_string().starts_with("Invalid YAML"));
    }

    #[test]
    fn test_multiple_documents_rejected() {
        let yaml = format!("{}---\n{}", CONFIGMAP, CONFIGMAP);
        let err = Manifest::parse(&yaml).unwrap_err();
        assert!(matches!(err, CoreError::MultipleDocuments));
    }

    #[test]
    fn test_missing_fields() {
        assert!(matches!(
            Manifest::parse("kind: ConfigMap\nmetadata:\n  name: x"),
            Err(CoreError::MissingField { .. })
        ));
        assert!(matches!(
            Manifest::parse("apiVersion: v1\nkind: ConfigMap"),
            Err(CoreError::MissingField { .. })
        ));
    }

    #[test]
    fn test_server_managed_fields_rejected() {
        let yaml = r#"
apiVersion: v1
kind: ConfigMap
metadata:
  name: demo
  resourceVersion: "123"
"#;
        let err = Manifest::parse(yaml).unwrap().validate().unwrap_err();
        assert!(
            err.to_string()
                .contains("Server-managed fields not allowed in yaml_body")
        );

        let yaml = r#"
apiVersion: v1
kind: ConfigMap
metadata:
  name: demo
status:
  phase: Active
"#;
        assert!(Manifest::parse(yaml).unwrap().validate().is_err());
    }

    #[test]
    fn test_internal_annotations_rejected() {
        let yaml = r#"
apiVersion: v1
kind: ConfigMap
metadata:
  name: demo
  annotations:
    rudder.io/resource-id: stolen
"#;
        let err = Manifest::parse(yaml).unwrap().validate().unwrap_err();
        assert!(
            err.to_string()
                .contains("Provider internal annotations not allowed in yaml_body")
        );
    }

    #[test]
    fn test_foreign_annotations_allowed() {
        let yaml = r#"
apiVersion: v1
kind: ConfigMap
metadata:
  name: demo
  annotations:
    helm.sh/hook: pre-install
"#;
        Manifest::parse(yaml).unwrap().validate().unwrap();
    }
}
