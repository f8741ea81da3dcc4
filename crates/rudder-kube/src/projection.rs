//! Managed-state projection
//!
//! The projection is the live object pruned to the field paths this manager
//! owns, minus `ignore_fields`, with quantity strings rewritten to the form
//! the API server stores. Two byte-identical projections mean "no drift";
//! the serialized string is what the diff machinery compares across applies.

use rudder_core::{FieldPath, quantity};
use serde_json::Value;

/// Build the pruned view of `live` restricted to `owned` minus `ignore`.
pub fn project(live: &Value, owned: &[FieldPath], ignore: &[FieldPath]) -> Value {
    let mut out = Value::Null;
    for path in owned {
        if ignore.iter().any(|ig| path.starts_with(ig)) {
            continue;
        }
        path.copy_into(live, &mut out);
    }

    // An owned subtree can still contain ignored descendants.
    for path in ignore {
        path.prune(&mut out);
    }

    normalize_quantities(&mut out, None);
    if out.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        out
    }
}

/// Canonical string form of a projection.
///
/// serde_json's default map is sorted by key, so serialization order is
/// stable without extra work.
pub fn serialize_projection(projection: &Value) -> String {
    serde_json::to_string(projection).unwrap_or_else(|_| "{}".to_string())
}

/// Rewrite quantity-position string leaves to their canonical form.
///
/// Values that do not parse as quantities are left as-is; a normalization
/// failure must only ever fall back to raw string comparison for that field.
fn normalize_quantities(value: &mut Value, map_name: Option<&str>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                match child {
                    Value::String(s) => {
                        if quantity::is_quantity_position(map_name, key)
                            && let Some(canonical) = quantity::normalize(s)
                        {
                            *s = canonical;
                        }
                    }
                    _ => normalize_quantities(child, Some(key)),
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                normalize_quantities(item, map_name);
            }
        }
        _ => {}
    }
}
