//! Field paths over untyped Kubernetes objects
//!
//! A [`FieldPath`] addresses one position inside the nested map/list tree of
//! a Kubernetes object. Paths come from two sources: user-entered dotted
//! strings (`ignore_fields`, wait specs) and decoded managed-fields
//! metadata. The decoded form can contain associative-list key segments and
//! set-value segments that have no dotted-string spelling; those render in a
//! bracketed form for display only.

use serde_json::Value;

use crate::error::{CoreError, Result};

/// One step through the object tree.
#[derive(Debug, Clone, PartialEq)]
pub enum PathSegment {
    /// Map member by name.
    Field(String),
    /// List element by position.
    Index(usize),
    /// List element selected by its associative key fields
    /// (e.g. containers keyed by `name`).
    Key(Vec<(String, Value)>),
    /// Set element selected by its own value.
    Value(Value),
}

/// A path into a Kubernetes object tree.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FieldPath(pub Vec<PathSegment>);

impl FieldPath {
    pub fn root() -> Self {
        FieldPath(Vec::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push(&mut self, segment: PathSegment) {
        self.0.push(segment);
    }

    /// Child path with one more segment appended.
    pub fn child(&self, segment: PathSegment) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment);
        FieldPath(segments)
    }

    /// Parse a user-entered dotted path.
    ///
    /// Supported syntax: `spec.replicas`, `spec.ports[0].port`, and quoted
    /// members for names containing dots: `metadata.annotations["a.b/c"]`.
    pub fn parse(input: &str) -> Result<Self> {
        let err = |message: &str| CoreError::InvalidFieldPath {
            path: input.to_string(),
            message: message.to_string(),
        };

        if input.is_empty() {
            return Err(err("path is empty"));
        }

        let mut segments = Vec::new();
        let mut chars = input.chars().peekable();
        let mut field = String::new();
        let mut expect_field = true;
        let mut after_bracket = false;

        loop {
            match chars.peek().copied() {
                Some('.') => {
                    chars.next();
                    if expect_field && field.is_empty() {
                        return Err(err("empty path member"));
                    }
                    if !field.is_empty() {
                        segments.push(PathSegment::Field(std::mem::take(&mut field)));
                    }
                    expect_field = true;
                    after_bracket = false;
                }
                Some('[') => {
                    chars.next();
                    if !field.is_empty() {
                        segments.push(PathSegment::Field(std::mem::take(&mut field)));
                    }
                    let mut inner = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == ']' {
                            closed = true;
                            break;
                        }
                        inner.push(c);
                    }
                    if !closed {
                        return Err(err("unterminated '['"));
                    }
                    if inner.is_empty() {
                        return Err(err("empty '[]' selector"));
                    }
                    if (inner.starts_with('"') && inner.ends_with('"') && inner.len() >= 2)
                        || (inner.starts_with('\'') && inner.ends_with('\'') && inner.len() >= 2)
                    {
                        segments.push(PathSegment::Field(inner[1..inner.len() - 1].to_string()));
                    } else {
                        let index: usize = inner
                            .parse()
                            .map_err(|_| err("selector must be an index or a quoted member"))?;
                        segments.push(PathSegment::Index(index));
                    }
                    expect_field = false;
                    after_bracket = true;
                }
                Some(c) => {
                    if after_bracket {
                        return Err(err("expected '.' or '[' after ']'"));
                    }
                    chars.next();
                    field.push(c);
                    expect_field = false;
                }
                None => break,
            }
        }

        if expect_field && field.is_empty() && !segments.is_empty() {
            return Err(err("trailing '.'"));
        }
        if !field.is_empty() {
            segments.push(PathSegment::Field(field));
        }
        if segments.is_empty() {
            return Err(err("path is empty"));
        }

        Ok(FieldPath(segments))
    }

    /// True when `self` starts with all of `prefix`'s segments.
    pub fn starts_with(&self, prefix: &FieldPath) -> bool {
        self.0.len() >= prefix.0.len() && self.0[..prefix.0.len()] == prefix.0[..]
    }

    /// Resolve the path against an object tree.
    pub fn lookup<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        let mut current = root;
        for segment in &self.0 {
            current = match segment {
                PathSegment::Field(name) => current.as_object()?.get(name)?,
                PathSegment::Index(i) => current.as_array()?.get(*i)?,
                PathSegment::Key(keys) => current
                    .as_array()?
                    .iter()
                    .find(|elem| keys_match(elem, keys))?,
                PathSegment::Value(v) => current.as_array()?.iter().find(|elem| *elem == v)?,
            };
        }
        Some(current)
    }

    /// Remove the value addressed by this path, if present.
    pub fn prune(&self, root: &mut Value) {
        let Some((last, parents)) = self.0.split_last() else {
            *root = Value::Null;
            return;
        };

        let mut current = root;
        for segment in parents {
            let next = match segment {
                PathSegment::Field(name) => current.as_object_mut().and_then(|m| m.get_mut(name)),
                PathSegment::Index(i) => current.as_array_mut().and_then(|a| a.get_mut(*i)),
                PathSegment::Key(keys) => current
                    .as_array_mut()
                    .and_then(|a| a.iter_mut().find(|elem| keys_match(elem, keys))),
                PathSegment::Value(v) => current
                    .as_array_mut()
                    .and_then(|a| a.iter_mut().find(|elem| *elem == v)),
            };
            match next {
                Some(v) => current = v,
                None => return,
            }
        }

        match last {
            PathSegment::Field(name) => {
                if let Some(map) = current.as_object_mut() {
                    map.remove(name);
                }
            }
            PathSegment::Index(i) => {
                if let Some(arr) = current.as_array_mut()
                    && *i < arr.len()
                {
                    arr.remove(*i);
                }
            }
            PathSegment::Key(keys) => {
                if let Some(arr) = current.as_array_mut() {
                    arr.retain(|elem| !keys_match(elem, keys));
                }
            }
            PathSegment::Value(v) => {
                if let Some(arr) = current.as_array_mut() {
                    arr.retain(|elem| elem != v);
                }
            }
        }
    }

    /// Copy the value at this path from `src` into `dst`, creating
    /// intermediate maps and list elements as needed. Returns false when the
    /// path does not resolve in `src`.
    pub fn copy_into(&self, src: &Value, dst: &mut Value) -> bool {
        let Some(found) = self.lookup(src) else {
            return false;
        };
        let found = found.clone();

        let mut current = dst;
        for segment in &self.0 {
            match segment {
                PathSegment::Field(name) => {
                    if !current.is_object() {
                        *current = Value::Object(serde_json::Map::new());
                    }
                    current = current
                        .as_object_mut()
                        .expect("object ensured above")
                        .entry(name.clone())
                        .or_insert(Value::Null);
                }
                PathSegment::Index(i) => {
                    if !current.is_array() {
                        *current = Value::Array(Vec::new());
                    }
                    let arr = current.as_array_mut().expect("array ensured above");
                    while arr.len() <= *i {
                        arr.push(Value::Null);
                    }
                    current = &mut arr[*i];
                }
                PathSegment::Key(keys) => {
                    if !current.is_array() {
                        *current = Value::Array(Vec::new());
                    }
                    let arr = current.as_array_mut().expect("array ensured above");
                    let pos = arr.iter().position(|elem| keys_match(elem, keys));
                    let pos = match pos {
                        Some(p) => p,
                        None => {
                            let mut elem = serde_json::Map::new();
                            for (k, v) in keys {
                                elem.insert(k.clone(), v.clone());
                            }
                            arr.push(Value::Object(elem));
                            arr.len() - 1
                        }
                    };
                    current = &mut arr[pos];
                }
                PathSegment::Value(v) => {
                    if !current.is_array() {
                        *current = Value::Array(Vec::new());
                    }
                    let arr = current.as_array_mut().expect("array ensured above");
                    if !arr.iter().any(|elem| elem == v) {
                        arr.push(v.clone());
                    }
                    // Set elements carry no children; the element is the value.
                    return true;
                }
            }
        }

        *current = found;
        true
    }
}

fn keys_match(elem: &Value, keys: &[(String, Value)]) -> bool {
    keys.iter()
        .all(|(k, v)| elem.as_object().and_then(|m| m.get(k)) == Some(v))
}

/// True when a member name round-trips through the dotted spelling.
fn is_plain_member(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

impl std::fmt::Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            match segment {
                PathSegment::Field(name) => {
                    if is_plain_member(name) {
                        if i > 0 {
                            write!(f, ".")?;
                        }
                        write!(f, "{}", name)?;
                    } else {
                        write!(f, "[\"{}\"]", name)?;
                    }
                }
                PathSegment::Index(n) => write!(f, "[{}]", n)?,
                PathSegment::Key(keys) => {
                    let rendered: Vec<String> = keys
                        .iter()
                        .map(|(k, v)| format!("{}={}", k, compact_json(v)))
                        .collect();
                    write!(f, "[{}]", rendered.join(","))?;
                }
                PathSegment::Value(v) => write!(f, "[v={}]", compact_json(v))?,
            }
        }
        Ok(())
    }
}

fn compact_json(v: &Value) -> String {
    serde_json::to_string(v).unwrap_or_else(|_| "?".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_simple() {
        let path = FieldPath::parse("spec.replicas").unwrap();
        assert_eq!(
            path.0,
            vec![
                PathSegment::Field("spec".to_string()),
                PathSegment::Field("replicas".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_index() {
        let path = FieldPath::parse("spec.ports[0].port").unwrap();
        assert_eq!(
            path.0,
            vec![
                PathSegment::Field("spec".to_string()),
                PathSegment::Field("ports".to_string()),
                PathSegment::Index(0),
                PathSegment::Field("port".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_quoted_member() {
        let path = FieldPath::parse(r#"metadata.annotations["a.b/c"]"#).unwrap();
        assert_eq!(
            path.0,
            vec![
                PathSegment::Field("metadata".to_string()),
                PathSegment::Field("annotations".to_string()),
                PathSegment::Field("a.b/c".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(FieldPath::parse("").is_err());
        assert!(FieldPath::parse("spec..replicas").is_err());
        assert!(FieldPath::parse("spec.").is_err());
        assert!(FieldPath::parse("spec[").is_err());
        assert!(FieldPath::parse("spec[abc]").is_err());
        assert!(FieldPath::parse("spec[]").is_err());
    }

    #[test]
    fn test_parse_requires_separator_after_bracket() {
        assert!(FieldPath::parse("spec[0]b").is_err());
        assert!(FieldPath::parse(r#"metadata.annotations["a.b/c"]x"#).is_err());

        // A dot or another selector is still fine.
        assert!(FieldPath::parse("spec[0].b").is_ok());
        assert!(FieldPath::parse("spec[0][1]").is_ok());
    }

    #[test]
    fn test_display_round_trip() {
        for input in ["spec.replicas", "spec.ports[0].port", "data.key-1"] {
            let path = FieldPath::parse(input).unwrap();
            assert_eq!(path.to_string(), input);
        }
        let quoted = FieldPath::parse(r#"metadata.annotations["a.b/c"]"#).unwrap();
        assert_eq!(quoted.to_string(), r#"metadata.annotations["a.b/c"]"#);
    }

    #[test]
    fn test_lookup() {
        let obj = json!({
            "spec": {
                "replicas": 3,
                "containers": [
                    {"name": "app", "image": "nginx:1.27"},
                    {"name": "sidecar", "image": "envoy:1.30"},
                ],
            }
        });

        let path = FieldPath::parse("spec.replicas").unwrap();
        assert_eq!(path.lookup(&obj), Some(&json!(3)));

        let keyed = FieldPath(vec![
            PathSegment::Field("spec".to_string()),
            PathSegment::Field("containers".to_string()),
            PathSegment::Key(vec![("name".to_string(), json!("sidecar"))]),
            PathSegment::Field("image".to_string()),
        ]);
        assert_eq!(keyed.lookup(&obj), Some(&json!("envoy:1.30")));

        assert!(FieldPath::parse("spec.missing").unwrap().lookup(&obj).is_none());
    }

    #[test]
    fn test_prune() {
        let mut obj = json!({
            "metadata": {"labels": {"a": "1", "b": "2"}},
            "spec": {"finalizers": ["x", "y"]},
        });

        FieldPath::parse("metadata.labels.a").unwrap().prune(&mut obj);
        assert_eq!(obj["metadata"]["labels"], json!({"b": "2"}));

        FieldPath::parse("spec.finalizers[0]").unwrap().prune(&mut obj);
        assert_eq!(obj["spec"]["finalizers"], json!(["y"]));

        // Pruning a missing path is a no-op.
        FieldPath::parse("spec.nope.deeper").unwrap().prune(&mut obj);
        assert_eq!(obj["spec"]["finalizers"], json!(["y"]));
    }

    #[test]
    fn test_copy_into_builds_structure() {
        let src = json!({
            "spec": {
                "containers": [{"name": "app", "image": "nginx", "stdin": true}],
            }
        });
        let mut dst = Value::Null;

        let image = FieldPath(vec![
            PathSegment::Field("spec".to_string()),
            PathSegment::Field("containers".to_string()),
            PathSegment::Key(vec![("name".to_string(), json!("app"))]),
            PathSegment::Field("image".to_string()),
        ]);
        assert!(image.copy_into(&src, &mut dst));

        assert_eq!(
            dst,
            json!({"spec": {"containers": [{"name": "app", "image": "nginx"}]}})
        );

        // Second path into the same keyed element merges, not duplicates.
        let stdin = FieldPath(vec![
            PathSegment::Field("spec".to_string()),
            PathSegment::Field("containers".to_string()),
            PathSegment::Key(vec![("name".to_string(), json!("app"))]),
            PathSegment::Field("stdin".to_string()),
        ]);
        assert!(stdin.copy_into(&src, &mut dst));
        assert_eq!(dst["spec"]["containers"].as_array().unwrap().len(), 1);
        assert_eq!(dst["spec"]["containers"][0]["stdin"], json!(true));
    }

    #[test]
    fn test_copy_into_missing_source() {
        let src = json!({"spec": {}});
        let mut dst = Value::Null;
        assert!(!FieldPath::parse("spec.replicas").unwrap().copy_into(&src, &mut dst));
        assert_eq!(dst, Value::Null);
    }

    #[test]
    fn test_starts_with() {
        let full = FieldPath::parse("spec.template.spec.containers").unwrap();
        let prefix = FieldPath::parse("spec.template").unwrap();
        assert!(full.starts_with(&prefix));
        assert!(!prefix.starts_with(&full));
    }
}
