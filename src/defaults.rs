//! Default value extraction for form prefill.

use serde_json::{Map, Value};

use crate::resolver::{internal_ref, RefResolver};
use crate::types::{DocumentId, TypeDecl};

/// Extract the default value a schema suggests, without following refs.
///
/// See [`DefaultExtractor::extract`].
pub fn extract_default(schema: &Value) -> Option<Value> {
    DefaultExtractor::new().extract(schema)
}

/// Walks a schema and synthesizes its default value.
#[derive(Clone, Copy, Default)]
pub struct DefaultExtractor<'a> {
    refs: Option<(&'a RefResolver, DocumentId)>,
}

impl<'a> DefaultExtractor<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Follow in-document `$ref`s against `doc`.
    pub fn with_refs(mut self, resolver: &'a RefResolver, doc: DocumentId) -> Self {
        self.refs = Some((resolver, doc));
        self
    }

    /// The default for `schema`, or `None` when it suggests nothing.
    ///
    /// Per node, first hit wins:
    ///
    /// 1. an explicit `default`
    /// 2. the first `examples` entry
    /// 3. for objects, the defaults of each property (only those defined),
    ///    shallow-merged with each `allOf` branch's default in order
    /// 4. the first `oneOf`, then `anyOf`, branch with a default
    ///
    /// Arrays are never built from `items`; only an array-level `default`
    /// counts.
    pub fn extract(&self, schema: &Value) -> Option<Value> {
        self.extract_node(schema, &mut Vec::new())
    }

    fn extract_node(&self, schema: &Value, refs_on_path: &mut Vec<String>) -> Option<Value> {
        let map = schema.as_object()?;

        if let Some(default) = map.get("default") {
            return Some(default.clone());
        }

        if matches!(TypeDecl::of(schema), Some(TypeDecl::Single(ref t)) if t == "array") {
            return None;
        }

        if let Some(Value::Array(examples)) = map.get("examples") {
            if let Some(first) = examples.first() {
                return Some(first.clone());
            }
        }

        if let (Some((resolver, doc)), Some(pointer)) = (self.refs, internal_ref(schema)) {
            if refs_on_path.iter().any(|p| p == pointer) {
                return None;
            }
            let target = resolver.resolve_schema(doc, schema);
            refs_on_path.push(pointer.to_string());
            let extracted = self.extract_node(&target, refs_on_path);
            refs_on_path.pop();
            return extracted;
        }

        let mut extracted = self.extract_properties(map, refs_on_path);

        if let Some(Value::Array(branches)) = map.get("allOf") {
            for branch in branches {
                if let Some(next) = self.extract_node(branch, refs_on_path) {
                    extracted = Some(match (extracted, next) {
                        (Some(Value::Object(mut acc)), Value::Object(more)) => {
                            acc.extend(more);
                            Value::Object(acc)
                        }
                        (_, next) => next,
                    });
                }
            }
        }

        if extracted.is_some() {
            return extracted;
        }

        ["oneOf", "anyOf"].into_iter().find_map(|union| {
            map.get(union)?
                .as_array()?
                .iter()
                .find_map(|branch| self.extract_node(branch, refs_on_path))
        })
    }

    fn extract_properties(
        &self,
        map: &Map<String, Value>,
        refs_on_path: &mut Vec<String>,
    ) -> Option<Value> {
        let Some(Value::Object(props)) = map.get("properties") else {
            return None;
        };

        let mut object = Map::new();
        for (name, prop) in props {
            if let Some(value) = self.extract_node(prop, refs_on_path) {
                object.insert(name.clone(), value);
            }
        }

        (!object.is_empty()).then_some(Value::Object(object))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn only_defined_properties_are_included() {
        let schema = json!({
            "type": "object",
            "properties": {
                "a": { "type": "string", "default": "x" },
                "b": { "type": "string" }
            }
        });
        assert_eq!(extract_default(&schema), Some(json!({ "a": "x" })));
    }

    #[test]
    fn default_beats_examples() {
        let schema = json!({ "type": "integer", "default": 1, "examples": [2, 3] });
        assert_eq!(extract_default(&schema), Some(json!(1)));

        let schema = json!({ "type": "integer", "examples": [2, 3] });
        assert_eq!(extract_default(&schema), Some(json!(2)));

        let schema = json!({ "type": "integer", "examples": [] });
        assert_eq!(extract_default(&schema), None);
    }

    #[test]
    fn default_short_circuits_children() {
        let schema = json!({
            "default": { "a": 1 },
            "properties": { "b": { "default": 2 } }
        });
        assert_eq!(extract_default(&schema), Some(json!({ "a": 1 })));
    }

    #[test]
    fn arrays_are_never_synthesized() {
        let schema = json!({ "type": "array", "items": { "type": "string", "default": "x" } });
        assert_eq!(extract_default(&schema), None);

        let schema = json!({ "type": "array", "examples": [["a"]] });
        assert_eq!(extract_default(&schema), None);

        let schema = json!({ "type": "array", "default": ["a"] });
        assert_eq!(extract_default(&schema), Some(json!(["a"])));
    }

    #[test]
    fn booleans_and_bare_primitives_are_undefined() {
        assert_eq!(extract_default(&json!(true)), None);
        assert_eq!(extract_default(&json!({ "type": "string" })), None);
        assert_eq!(extract_default(&json!({ "type": "object", "properties": {} })), None);
    }

    #[test]
    fn all_of_shallow_merges_later_wins() {
        let schema = json!({
            "properties": { "a": { "default": 1 } },
            "allOf": [
                { "properties": { "b": { "default": 2 } } },
                { "properties": { "a": { "default": 3 } } }
            ]
        });
        assert_eq!(extract_default(&schema), Some(json!({ "a": 3, "b": 2 })));
    }

    #[test]
    fn unions_take_first_defined_branch() {
        let schema = json!({
            "oneOf": [
                { "type": "string" },
                { "type": "integer", "default": 7 },
                { "type": "boolean", "default": true }
            ]
        });
        assert_eq!(extract_default(&schema), Some(json!(7)));

        let schema = json!({ "anyOf": [{ "examples": ["e"] }] });
        assert_eq!(extract_default(&schema), Some(json!("e")));
    }

    #[test]
    fn refs_are_followed_when_configured() {
        let root = json!({
            "$defs": { "name": { "type": "string", "default": "anon" } },
            "properties": { "name": { "$ref": "#/$defs/name" } }
        });
        assert_eq!(extract_default(&root), None);

        let mut resolver = RefResolver::new();
        let doc = resolver.load_document(root.clone());
        let extractor = DefaultExtractor::new().with_refs(&resolver, doc);
        assert_eq!(extractor.extract(&root), Some(json!({ "name": "anon" })));
    }

    #[test]
    fn recursive_refs_terminate() {
        let root = json!({
            "$defs": {
                "node": {
                    "type": "object",
                    "properties": {
                        "label": { "default": "root" },
                        "child": { "$ref": "#/$defs/node" }
                    }
                }
            },
            "$ref": "#/$defs/node"
        });
        let mut resolver = RefResolver::new();
        let doc = resolver.load_document(root.clone());
        let extractor = DefaultExtractor::new().with_refs(&resolver, doc);
        assert_eq!(extractor.extract(&root), Some(json!({ "label": "root" })));
    }
}
