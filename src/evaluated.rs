//! Evaluated-property tracking for `unevaluatedProperties`.
//!
//! Stateless: the set depends on the value, so nothing is cached.

use std::collections::BTreeSet;

use regex::Regex;
use serde_json::Value;
use tracing::warn;

use crate::compose::{active_conditional_branch, triggered_schemas};
use crate::resolver::{internal_ref, RefResolver};
use crate::types::DocumentId;
use crate::validator::ValidatorCapability;

/// Keys of `value` that `schema` accounts for.
///
/// A key counts when it is declared in `properties`, matches a
/// `patternProperties` regex, or is picked up by a present
/// `additionalProperties` that is `true` or a schema. Subschemas that apply
/// to this value contribute their keys too: every `allOf` branch, the active
/// `then`/`else`, triggered `dependentSchemas`/`dependencies`, and the
/// `anyOf`/`oneOf` branches the value satisfies.
///
/// `$ref` subschemas are not followed; see [`EvaluationTracker::with_refs`].
pub fn evaluated_properties(
    schema: &Value,
    value: &Value,
    validator: &dyn ValidatorCapability,
) -> BTreeSet<String> {
    EvaluationTracker::new(validator).evaluated(schema, value)
}

/// Collects evaluated keys, optionally following in-document refs.
#[derive(Clone, Copy)]
pub struct EvaluationTracker<'a> {
    validator: &'a dyn ValidatorCapability,
    refs: Option<(&'a RefResolver, DocumentId)>,
}

impl<'a> EvaluationTracker<'a> {
    pub fn new(validator: &'a dyn ValidatorCapability) -> Self {
        Self {
            validator,
            refs: None,
        }
    }

    /// Follow `$ref` subschemas against `doc`.
    pub fn with_refs(mut self, resolver: &'a RefResolver, doc: DocumentId) -> Self {
        self.refs = Some((resolver, doc));
        self
    }

    /// Keys of `value` that `schema` accounts for. See [`evaluated_properties`].
    pub fn evaluated(&self, schema: &Value, value: &Value) -> BTreeSet<String> {
        let mut keys = BTreeSet::new();
        self.collect(schema, value, &mut keys, &mut Vec::new());
        keys
    }

    fn collect(
        &self,
        schema: &Value,
        value: &Value,
        keys: &mut BTreeSet<String>,
        refs_on_path: &mut Vec<String>,
    ) {
        if let (Some((resolver, doc)), Some(pointer)) = (self.refs, internal_ref(schema)) {
            if refs_on_path.iter().any(|p| p == pointer) {
                return;
            }
            let target = resolver.resolve_schema(doc, schema);
            refs_on_path.push(pointer.to_string());
            self.collect(&target, value, keys, refs_on_path);
            refs_on_path.pop();
            return;
        }

        let (Value::Object(map), Value::Object(fields)) = (schema, value) else {
            return;
        };

        let mut covered: BTreeSet<&str> = BTreeSet::new();

        if let Some(Value::Object(props)) = map.get("properties") {
            covered.extend(fields.keys().filter(|k| props.contains_key(*k)).map(String::as_str));
        }

        if let Some(Value::Object(patterns)) = map.get("patternProperties") {
            for pattern in patterns.keys() {
                match Regex::new(pattern) {
                    Ok(re) => covered.extend(
                        fields
                            .keys()
                            .filter(|k| re.is_match(k))
                            .map(String::as_str),
                    ),
                    Err(e) => {
                        warn!(pattern = %pattern, error = %e, "ignoring invalid patternProperties regex")
                    }
                }
            }
        }

        let additional_open = matches!(
            map.get("additionalProperties"),
            Some(Value::Bool(true)) | Some(Value::Object(_))
        );
        if additional_open {
            covered.extend(fields.keys().map(String::as_str));
        }

        keys.extend(covered.into_iter().map(String::from));

        if let Some(Value::Array(branches)) = map.get("allOf") {
            for branch in branches {
                self.collect(branch, value, keys, refs_on_path);
            }
        }

        if let Some(overlay) = active_conditional_branch(schema, value, self.validator) {
            self.collect(overlay, value, keys, refs_on_path);
        }

        for overlay in triggered_schemas(schema, value) {
            self.collect(overlay, value, keys, refs_on_path);
        }

        for union in ["anyOf", "oneOf"] {
            if let Some(Value::Array(branches)) = map.get(union) {
                for branch in branches {
                    let applies = self.validator.is_valid(branch, value).unwrap_or_else(|e| {
                        warn!(keyword = union, error = %e, "cannot evaluate branch, skipping");
                        false
                    });
                    if applies {
                        self.collect(branch, value, keys, refs_on_path);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::RefResolver;
    use crate::validator::ValidatorCache;
    use serde_json::json;

    fn evaluated(schema: Value, value: Value) -> Vec<String> {
        let mut resolver = RefResolver::new();
        let doc = resolver.load_document(schema.clone());
        let cache = ValidatorCache::default();
        let validator = cache.bind(doc, &schema);
        evaluated_properties(&schema, &value, &validator)
            .into_iter()
            .collect()
    }

    #[test]
    fn declared_properties_present_in_value() {
        let keys = evaluated(
            json!({ "properties": { "a": {}, "b": {} } }),
            json!({ "a": 1, "c": 3 }),
        );
        assert_eq!(keys, vec!["a"]);
    }

    #[test]
    fn pattern_properties_match_and_invalid_patterns_are_ignored() {
        let keys = evaluated(
            json!({ "patternProperties": { "^x-": {}, "([": {} } }),
            json!({ "x-trace": 1, "name": "n" }),
        );
        assert_eq!(keys, vec!["x-trace"]);
    }

    #[test]
    fn open_additional_properties_covers_everything() {
        let value = json!({ "a": 1, "b": 2, "c": 3 });
        assert_eq!(
            evaluated(json!({ "additionalProperties": true }), value.clone()),
            vec!["a", "b", "c"]
        );
        assert_eq!(
            evaluated(json!({ "additionalProperties": { "type": "integer" } }), value.clone()),
            vec!["a", "b", "c"]
        );
        assert!(evaluated(json!({ "additionalProperties": false }), value).is_empty());
    }

    #[test]
    fn all_of_branches_union() {
        let keys = evaluated(
            json!({
                "allOf": [
                    { "properties": { "a": {} } },
                    { "properties": { "b": {} } }
                ]
            }),
            json!({ "a": 1, "b": 2, "z": 0 }),
        );
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn active_conditional_branch_counts() {
        let schema = json!({
            "properties": { "kind": {} },
            "if": { "properties": { "kind": { "const": "card" } } },
            "then": { "properties": { "number": {} } },
            "else": { "properties": { "iban": {} } }
        });
        let value = json!({ "kind": "card", "number": "4111", "iban": "NL00" });
        assert_eq!(evaluated(schema.clone(), value), vec!["kind", "number"]);

        let value = json!({ "kind": "bank", "number": "4111", "iban": "NL00" });
        assert_eq!(evaluated(schema, value), vec!["iban", "kind"]);
    }

    #[test]
    fn triggered_dependent_schemas_count() {
        let schema = json!({
            "properties": { "card": {} },
            "dependentSchemas": { "card": { "properties": { "cvv": {} } } },
            "dependencies": { "card": { "properties": { "expiry": {} } } }
        });
        let keys = evaluated(schema.clone(), json!({ "card": 1, "cvv": 2, "expiry": 3 }));
        assert_eq!(keys, vec!["card", "cvv", "expiry"]);

        let keys = evaluated(schema, json!({ "cvv": 2 }));
        assert!(keys.is_empty());
    }

    #[test]
    fn matching_union_branches_count() {
        let schema = json!({
            "oneOf": [
                { "properties": { "cat": { "const": true } }, "required": ["cat"] },
                { "properties": { "dog": { "const": true } }, "required": ["dog"] }
            ]
        });
        assert_eq!(evaluated(schema, json!({ "dog": true, "x": 1 })), vec!["dog"]);
    }

    #[test]
    fn ref_branches_contribute_their_keys() {
        let schema = json!({
            "$defs": { "base": { "properties": { "id": {} } } },
            "allOf": [{ "$ref": "#/$defs/base" }],
            "properties": { "name": {} },
            "unevaluatedProperties": false
        });
        let value = json!({ "id": "1", "name": "n" });
        assert_eq!(evaluated(schema.clone(), value.clone()), vec!["name"]);

        let mut resolver = RefResolver::new();
        let doc = resolver.load_document(schema.clone());
        let cache = ValidatorCache::default();
        let validator = cache.bind(doc, &schema);
        let keys: Vec<String> = EvaluationTracker::new(&validator)
            .with_refs(&resolver, doc)
            .evaluated(&schema, &value)
            .into_iter()
            .collect();
        assert_eq!(keys, vec!["id", "name"]);
    }

    #[test]
    fn recursive_refs_terminate() {
        let schema = json!({
            "$defs": { "node": { "allOf": [{ "$ref": "#/$defs/node" }], "properties": { "v": {} } } },
            "$ref": "#/$defs/node"
        });
        let mut resolver = RefResolver::new();
        let doc = resolver.load_document(schema.clone());
        let cache = ValidatorCache::default();
        let validator = cache.bind(doc, &schema);
        let keys = EvaluationTracker::new(&validator)
            .with_refs(&resolver, doc)
            .evaluated(&schema, &json!({ "v": 1, "w": 2 }));
        assert_eq!(keys.into_iter().collect::<Vec<_>>(), vec!["v"]);
    }

    #[test]
    fn non_object_values_have_no_keys() {
        assert!(evaluated(json!({ "additionalProperties": true }), json!([1, 2])).is_empty());
    }
}
