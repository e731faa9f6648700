//! Layering: policy extraction, parent resolution and action application.
//!
//! The layering policy declares the site's `layerOrder`. The first entry is
//! the root layer: its documents have no parent and render their own data.
//! Every later layer inherits from the one immediately before it, and a
//! child document's rendered data starts as a deep copy of its parent's
//! rendered data with the child's `merge`/`replace`/`delete` actions applied
//! in order.

use serde_json::Value;

use deckhand_types::{Document, Error, LayeringAction, LAYERING_POLICY_SCHEMA};

use crate::path::{DataPath, PathError};

//─────────────────────────────
//  Policy and layer order
//─────────────────────────────

/// Finds the revision's single layering policy document.
///
/// Zero policies means layering cannot run at all; more than one is a
/// constraint violation on the singleton.
pub fn extract_layering_policy(documents: &[Document]) -> Result<&Document, Error> {
    let mut policies = documents
        .iter()
        .filter(|d| d.schema() == LAYERING_POLICY_SCHEMA);

    let first = policies.next().ok_or(Error::LayeringPolicyMissing)?;
    if let Some(second) = policies.next() {
        return Err(Error::Conflict {
            detail: format!(
                "multiple LayeringPolicy documents found: {} and {}",
                first.full_name(),
                second.full_name()
            ),
        });
    }
    Ok(first)
}

/// The ordered list of layer names from a layering policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerOrder {
    layers: Vec<String>,
}

impl LayerOrder {
    /// Reads `data.layerOrder` out of a policy document.
    pub fn from_policy(policy: &Document) -> Result<Self, Error> {
        let raw = policy
            .data()
            .get("layerOrder")
            .ok_or_else(|| Error::LayeringPolicyMalformed {
                detail: "data.layerOrder is missing".to_string(),
            })?;
        let items = raw
            .as_array()
            .ok_or_else(|| Error::LayeringPolicyMalformed {
                detail: "data.layerOrder is not a list".to_string(),
            })?;

        let mut layers = Vec::with_capacity(items.len());
        for item in items {
            let layer = item
                .as_str()
                .ok_or_else(|| Error::LayeringPolicyMalformed {
                    detail: format!("layerOrder entry {item} is not a string"),
                })?;
            layers.push(layer.to_string());
        }
        Ok(Self { layers })
    }

    /// Position of `layer` in the declared order.
    pub fn index_of(&self, layer: &str) -> Option<usize> {
        self.layers.iter().position(|l| l == layer)
    }

    /// Whether `layer` is declared at all.
    pub fn contains(&self, layer: &str) -> bool {
        self.index_of(layer).is_some()
    }

    /// Whether `layer` is the root layer (no parent expected).
    pub fn is_root_layer(&self, layer: &str) -> bool {
        self.index_of(layer) == Some(0)
    }

    /// The layer a document of `layer` inherits from, i.e. the one
    /// immediately before it in the declared order.
    pub fn parent_layer(&self, layer: &str) -> Option<&str> {
        match self.index_of(layer)? {
            0 => None,
            index => Some(self.layers[index - 1].as_str()),
        }
    }

    /// The declared layer names, root first.
    pub fn layers(&self) -> &[String] {
        &self.layers
    }
}

//─────────────────────────────
//  Parent resolution
//─────────────────────────────

/// Candidate parents of `doc`: documents of the same `schema` in the layer
/// immediately before `doc`'s, whose labels satisfy the child's
/// `parentSelector`.
///
/// The caller decides how many candidates are acceptable: zero is fine only
/// in the root layer, and more than one is indeterminate.
pub fn find_parents<'a>(
    doc: &Document,
    documents: &'a [Document],
    order: &LayerOrder,
) -> Vec<&'a Document> {
    let Some(definition) = doc.layering_definition() else {
        return Vec::new();
    };
    let Some(parent_layer) = order.parent_layer(&definition.layer) else {
        return Vec::new();
    };

    documents
        .iter()
        .filter(|candidate| candidate.schema() == doc.schema())
        .filter(|candidate| candidate.layer().as_deref() == Some(parent_layer))
        .filter(|candidate| candidate.matches_labels(&definition.parent_selector))
        .collect()
}

//─────────────────────────────
//  Action application
//─────────────────────────────

/// Applies one layering action from the child's data onto the working copy.
///
/// `working` starts as a deep copy of the parent's rendered data and is
/// mutated in place; the child's own data is the source side of `merge` and
/// `replace`.
pub fn apply_action(
    action: &LayeringAction,
    child: &Document,
    working: &mut Value,
) -> Result<(), Error> {
    let path = DataPath::parse(&action.path)
        .map_err(|e| missing_key(child, &action.path, &e.to_string()))?;

    match action.method.as_str() {
        "merge" => {
            let source = path
                .extract(child.data())
                .map_err(|_| missing_key(child, &action.path, "absent from child data"))?
                .clone();
            let target = path
                .extract_mut(working)
                .map_err(|_| missing_key(child, &action.path, "absent from parent data"))?;
            merge_values(target, &source);
            Ok(())
        }
        "replace" => {
            let source = path
                .extract(child.data())
                .map_err(|_| missing_key(child, &action.path, "absent from child data"))?
                .clone();
            let target = path
                .extract_mut(working)
                .map_err(|_| missing_key(child, &action.path, "absent from parent data"))?;
            *target = source;
            Ok(())
        }
        "delete" => path.delete(working).map_err(|e| match e {
            PathError::NotFound { .. } => {
                missing_key(child, &action.path, "absent from parent data")
            }
            other => missing_key(child, &action.path, &other.to_string()),
        }),
        other => Err(Error::InvalidAction {
            document: child.full_name(),
            method: other.to_string(),
        }),
    }
}

/// Recursively merges `source` into `target`.
///
/// Keys present on both sides where both values are objects recurse;
/// everywhere else the child's value wins.
fn merge_values(target: &mut Value, source: &Value) {
    match (target, source) {
        (Value::Object(target_map), Value::Object(source_map)) => {
            for (key, source_value) in source_map {
                match target_map.get_mut(key) {
                    Some(target_value)
                        if target_value.is_object() && source_value.is_object() =>
                    {
                        merge_values(target_value, source_value);
                    }
                    _ => {
                        target_map.insert(key.clone(), source_value.clone());
                    }
                }
            }
        }
        (target, source) => *target = source.clone(),
    }
}

fn missing_key(doc: &Document, path: &str, detail: &str) -> Error {
    Error::MissingKey {
        document: doc.full_name(),
        path: path.to_string(),
        detail: detail.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deckhand_types::ErrorKind;
    use serde_json::json;

    fn policy(layer_order: serde_json::Value) -> Document {
        Document::from_value(json!({
            "schema": "deckhand/LayeringPolicy/v1",
            "metadata": {"schema": "metadata/Control/v1", "name": "layering-policy"},
            "data": {"layerOrder": layer_order}
        }))
    }

    fn site_doc(name: &str, selector: serde_json::Value, actions: serde_json::Value,
                data: serde_json::Value) -> Document {
        Document::from_value(json!({
            "schema": "example/Kind/v1",
            "metadata": {
                "schema": "metadata/Document/v1",
                "name": name,
                "layeringDefinition": {
                    "layer": "site",
                    "parentSelector": selector,
                    "actions": actions
                }
            },
            "data": data
        }))
    }

    fn global_doc(name: &str, labels: serde_json::Value, data: serde_json::Value) -> Document {
        Document::from_value(json!({
            "schema": "example/Kind/v1",
            "metadata": {
                "schema": "metadata/Document/v1",
                "name": name,
                "labels": labels,
                "layeringDefinition": {"layer": "global"}
            },
            "data": data
        }))
    }

    #[test]
    fn test_extract_layering_policy() {
        let p = policy(json!(["global", "site"]));
        let docs = vec![p.clone(), global_doc("g", json!({}), json!({}))];
        assert_eq!(extract_layering_policy(&docs).unwrap().name(), "layering-policy");

        let none: Vec<Document> = vec![global_doc("g", json!({}), json!({}))];
        assert_eq!(
            extract_layering_policy(&none).unwrap_err().kind(),
            ErrorKind::LayeringPolicyMissing
        );

        let two = vec![p.clone(), p];
        assert_eq!(
            extract_layering_policy(&two).unwrap_err().kind(),
            ErrorKind::Conflict
        );
    }

    #[test]
    fn test_layer_order() {
        let order = LayerOrder::from_policy(&policy(json!(["global", "region", "site"]))).unwrap();
        assert!(order.is_root_layer("global"));
        assert!(!order.is_root_layer("site"));
        assert_eq!(order.parent_layer("site"), Some("region"));
        assert_eq!(order.parent_layer("region"), Some("global"));
        assert_eq!(order.parent_layer("global"), None);
        assert_eq!(order.parent_layer("unknown"), None);
        assert!(order.contains("region"));
    }

    #[test]
    fn test_layer_order_malformed() {
        let missing = LayerOrder::from_policy(&policy(json!(null)));
        // null layerOrder parses as a present-but-wrong value
        assert_eq!(
            missing.unwrap_err().kind(),
            ErrorKind::LayeringPolicyMalformed
        );

        let not_list = LayerOrder::from_policy(&policy(json!("global")));
        assert_eq!(
            not_list.unwrap_err().kind(),
            ErrorKind::LayeringPolicyMalformed
        );

        let mixed = LayerOrder::from_policy(&policy(json!(["global", 42])));
        assert_eq!(mixed.unwrap_err().kind(), ErrorKind::LayeringPolicyMalformed);
    }

    #[test]
    fn test_find_parents_label_subset() {
        let order = LayerOrder::from_policy(&policy(json!(["global", "site"]))).unwrap();
        let g1 = global_doc("g1", json!({"tier": "web", "zone": "a"}), json!({}));
        let g2 = global_doc("g2", json!({"tier": "db"}), json!({}));
        let child = site_doc("s", json!({"tier": "web"}), json!([]), json!({}));
        let docs = vec![g1, g2, child.clone()];

        let parents = find_parents(&child, &docs, &order);
        assert_eq!(parents.len(), 1);
        assert_eq!(parents[0].name(), "g1");
    }

    #[test]
    fn test_find_parents_requires_same_schema_and_adjacent_layer() {
        let order =
            LayerOrder::from_policy(&policy(json!(["global", "region", "site"]))).unwrap();
        // Parent candidate sits two layers up: not adjacent, so not a parent.
        let g = global_doc("g", json!({"tier": "web"}), json!({}));
        let child = site_doc("s", json!({"tier": "web"}), json!([]), json!({}));
        let docs = vec![g, child.clone()];
        assert!(find_parents(&child, &docs, &order).is_empty());
    }

    #[test]
    fn test_merge_action_at_root() {
        // Fixture: global {a:{x:1,y:2}, b:4}; site merges {a:{z:3}} at `.`.
        let child = site_doc(
            "s",
            json!({}),
            json!([{"path": ".", "method": "merge"}]),
            json!({"a": {"z": 3}}),
        );
        let mut working = json!({"a": {"x": 1, "y": 2}, "b": 4});

        let action = &child.layering_definition().unwrap().actions[0];
        apply_action(action, &child, &mut working).unwrap();
        assert_eq!(working, json!({"a": {"x": 1, "y": 2, "z": 3}, "b": 4}));
    }

    #[test]
    fn test_replace_action_at_subpath() {
        let child = site_doc(
            "s",
            json!({}),
            json!([{"path": ".a", "method": "replace"}]),
            json!({"a": {"z": 5}}),
        );
        let mut working = json!({"a": {"x": 1, "y": 2}, "b": 4});

        let action = &child.layering_definition().unwrap().actions[0];
        apply_action(action, &child, &mut working).unwrap();
        assert_eq!(working, json!({"a": {"z": 5}, "b": 4}));
    }

    #[test]
    fn test_delete_action() {
        let child = site_doc(
            "s",
            json!({}),
            json!([{"path": ".a", "method": "delete"}]),
            json!({}),
        );
        let mut working = json!({"a": {"x": 1}, "b": 4});

        let action = &child.layering_definition().unwrap().actions[0];
        apply_action(action, &child, &mut working).unwrap();
        assert_eq!(working, json!({"b": 4}));
    }

    #[test]
    fn test_delete_root_reinstates_empty_data() {
        let child = site_doc(
            "s",
            json!({}),
            json!([{"path": ".", "method": "delete"}]),
            json!({}),
        );
        let mut working = json!({"a": 1});

        let action = &child.layering_definition().unwrap().actions[0];
        apply_action(action, &child, &mut working).unwrap();
        assert_eq!(working, json!({}));
    }

    #[test]
    fn test_missing_key_errors() {
        let child = site_doc(
            "s",
            json!({}),
            json!([{"path": ".nope", "method": "replace"}]),
            json!({"other": 1}),
        );
        let mut working = json!({"a": 1});

        let action = &child.layering_definition().unwrap().actions[0];
        let err = apply_action(action, &child, &mut working).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingKey);
    }

    #[test]
    fn test_invalid_action_method() {
        let child = site_doc(
            "s",
            json!({}),
            json!([{"path": ".", "method": "transmogrify"}]),
            json!({}),
        );
        let mut working = json!({});

        let action = &child.layering_definition().unwrap().actions[0];
        let err = apply_action(action, &child, &mut working).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidAction);
    }

    #[test]
    fn test_merge_child_wins_on_scalar_conflict() {
        let child = site_doc(
            "s",
            json!({}),
            json!([{"path": ".", "method": "merge"}]),
            json!({"b": {"nested": true}}),
        );
        let mut working = json!({"a": 1, "b": 4});

        let action = &child.layering_definition().unwrap().actions[0];
        apply_action(action, &child, &mut working).unwrap();
        assert_eq!(working, json!({"a": 1, "b": {"nested": true}}));
    }
}
