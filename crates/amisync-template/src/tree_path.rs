//! Dot-path access into JSON documents.
//!
//! A path such as `Mappings.RegionMap.us-east-1` is split on `.` and walked
//! one segment at a time. Object members are addressed by key and array
//! elements by decimal index. A member holding `null` counts as absent.
//!
//! [`get`] is lenient: it stops at the first absent segment and returns the
//! deepest node it reached rather than failing, so a typo in a path silently
//! yields an ancestor node. [`get_exact`] reports the absence instead and is
//! what the patcher reads with.
//!
//! Writes are strict: [`set`] never creates intermediate nodes. Patches only
//! target structure that already exists in the template.

use serde_json::Value;

fn child<'a>(node: &'a Value, segment: &str) -> Option<&'a Value> {
    let next = match node {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    };
    next.filter(|v| !v.is_null())
}

fn child_mut<'a>(node: &'a mut Value, segment: &str) -> Option<&'a mut Value> {
    let next = match node {
        Value::Object(map) => map.get_mut(segment),
        Value::Array(items) => segment
            .parse::<usize>()
            .ok()
            .and_then(move |i| items.get_mut(i)),
        _ => None,
    };
    next.filter(|v| !v.is_null())
}

/// Returns the node at `path`, or the deepest existing node on the way to it.
pub fn get<'a>(document: &'a Value, path: &str) -> &'a Value {
    let mut node = document;
    for segment in path.split('.') {
        match child(node, segment) {
            Some(next) => node = next,
            None => return node,
        }
    }
    node
}

/// Returns the node at `path` only if every segment exists.
pub fn get_exact<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(document, child)
}

/// Assigns `value` at `path`.
///
/// Every segment but the last must already exist. The last segment is
/// inserted into an object or replaces an in-bounds array element. When the
/// path cannot be reached the document is left unchanged and a diagnostic is
/// logged.
///
/// Returns whether the value was assigned.
pub fn set(document: &mut Value, path: &str, value: Value) -> bool {
    let segments: Vec<&str> = path.split('.').collect();
    let Some((last, parents)) = segments.split_last() else {
        return false;
    };

    let mut node = document;
    for segment in parents {
        match child_mut(node, segment) {
            Some(next) => node = next,
            None => {
                tracing::error!(path, node = segment, "node not found in the node path");
                return false;
            }
        }
    }

    match node {
        Value::Object(map) => {
            let _ = map.insert((*last).to_owned(), value);
            true
        }
        Value::Array(items) => match last.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => {
                tracing::error!(path, node = last, "array index not found in the node path");
                false
            }
        },
        _ => {
            tracing::error!(path, node = last, "parent of node is not a container");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn template() -> Value {
        json!({
            "Parameters": {
                "Version": { "Type": "String", "AllowedValues": ["6.2.3"] }
            },
            "Mappings": {
                "Regions": { "us-east-1": { "FGT623": "ami-1" } },
                "Empty": null
            },
            "Outputs": [ { "Value": "a" }, { "Value": "b" } ]
        })
    }

    #[test]
    fn get_descends_full_path() {
        let doc = template();
        assert_eq!(get(&doc, "Parameters.Version.Type"), &json!("String"));
    }

    #[test]
    fn get_indexes_arrays() {
        let doc = template();
        assert_eq!(get(&doc, "Outputs.1.Value"), &json!("b"));
    }

    #[test]
    fn get_missing_segment_returns_deepest_existing_node() {
        // Lenient read: a missing leaf yields its parent, not an error.
        let doc = template();
        assert_eq!(get(&doc, "Parameters.Missing.Type"), &doc["Parameters"]);
        assert_eq!(get(&doc, "Nope"), &doc);
    }

    #[test]
    fn get_treats_null_as_absent() {
        let doc = template();
        assert_eq!(get(&doc, "Mappings.Empty"), &doc["Mappings"]);
    }

    #[test]
    fn get_exact_requires_every_segment() {
        let doc = template();
        assert!(get_exact(&doc, "Parameters.Version").is_some());
        assert!(get_exact(&doc, "Parameters.Missing").is_none());
    }

    #[test]
    fn set_then_get_round_trips() {
        let mut doc = template();
        assert!(set(&mut doc, "Parameters.Version.Default", json!("6.2.3")));
        assert_eq!(get(&doc, "Parameters.Version.Default"), &json!("6.2.3"));
    }

    #[test]
    fn set_replaces_existing_subtree() {
        let mut doc = template();
        let value = json!({ "FGT641": "ami-2" });
        assert!(set(&mut doc, "Mappings.Regions.us-east-1", value.clone()));
        assert_eq!(get(&doc, "Mappings.Regions.us-east-1"), &value);
    }

    #[test]
    fn set_missing_intermediate_leaves_document_unchanged() {
        let mut doc = template();
        let before = doc.clone();
        assert!(!set(&mut doc, "Mappings.Missing.Key", json!("x")));
        assert_eq!(doc, before);
        assert_eq!(get(&doc, "Mappings.Missing.Key"), &before["Mappings"]);
    }

    #[test]
    fn set_does_not_descend_through_null() {
        let mut doc = template();
        let before = doc.clone();
        assert!(!set(&mut doc, "Mappings.Empty.Key", json!("x")));
        assert_eq!(doc, before);
    }

    #[test]
    fn set_into_scalar_parent_is_rejected() {
        let mut doc = template();
        let before = doc.clone();
        assert!(!set(&mut doc, "Parameters.Version.Type.Inner", json!(1)));
        assert_eq!(doc, before);
    }

    #[test]
    fn set_array_element_in_bounds_only() {
        let mut doc = template();
        assert!(set(&mut doc, "Outputs.0", json!({ "Value": "z" })));
        assert_eq!(get(&doc, "Outputs.0.Value"), &json!("z"));
        assert!(!set(&mut doc, "Outputs.5", json!({})));
    }
}
