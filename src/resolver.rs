//! In-document `$ref` resolution with per-document caches.
//!
//! Documents are registered with [`RefResolver::load_document`] and addressed
//! by the returned [`DocumentId`]. Two caches are kept per document:
//!
//! | Cache | Key | Value |
//! |-------|-----|-------|
//! | pointer | `(doc, "#/…")` | target node, or `None` if it does not resolve |
//! | node | `(doc, location)` | fully resolved node at that location |
//!
//! A node's identity is its location inside the document, so two structurally
//! identical subschemas at different locations never share a node entry.
//! Unloading a document drops every entry keyed by its handle.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::loader::navigate_pointer;
use crate::types::DocumentId;

/// Non-fatal problem met while following a `$ref` chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RefDiagnostic {
    /// The pointer does not resolve inside the document.
    Unresolved { pointer: String },
    /// The chain came back to a pointer it already followed.
    Cycle { pointer: String },
    /// The handle does not name a loaded document.
    UnknownDocument { document: DocumentId },
}

impl std::fmt::Display for RefDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefDiagnostic::Unresolved { pointer } => write!(f, "unresolved $ref {}", pointer),
            RefDiagnostic::Cycle { pointer } => write!(f, "cyclic $ref chain at {}", pointer),
            RefDiagnostic::UnknownDocument { document } => {
                write!(f, "no document loaded for {}", document)
            }
        }
    }
}

/// Result of resolving one node.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    /// The resolved schema, or the last node reached when resolution stopped early.
    pub schema: Value,
    pub diagnostic: Option<RefDiagnostic>,
}

impl Resolved {
    fn clean(schema: Value) -> Self {
        Self {
            schema,
            diagnostic: None,
        }
    }
}

type CacheKey = (DocumentId, String);

/// Owns loaded documents and resolves in-document `$ref`s against them.
#[derive(Debug, Default)]
pub struct RefResolver {
    documents: HashMap<DocumentId, Arc<Value>>,
    next_id: u64,
    pointer_cache: Mutex<HashMap<CacheKey, Option<Value>>>,
    node_cache: Mutex<HashMap<CacheKey, Resolved>>,
}

impl RefResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a root document and return its handle.
    pub fn load_document(&mut self, root: Value) -> DocumentId {
        let id = DocumentId(self.next_id);
        self.next_id += 1;
        self.documents.insert(id, Arc::new(root));
        id
    }

    /// The root document behind a handle.
    pub fn document(&self, doc: DocumentId) -> Option<Arc<Value>> {
        self.documents.get(&doc).cloned()
    }

    /// Drop a document and every cache entry scoped to it.
    pub fn unload_document(&mut self, doc: DocumentId) {
        self.documents.remove(&doc);
        lock(&self.pointer_cache).retain(|(d, _), _| *d != doc);
        lock(&self.node_cache).retain(|(d, _), _| *d != doc);
    }

    /// Drop all cached resolutions. Loaded documents are kept.
    pub fn clear(&self) {
        lock(&self.pointer_cache).clear();
        lock(&self.node_cache).clear();
    }

    /// Number of cached entries across both caches.
    pub fn cached_entries(&self) -> usize {
        lock(&self.pointer_cache).len() + lock(&self.node_cache).len()
    }

    /// Resolve the node found at `location` inside the document.
    ///
    /// Results are memoized per `(doc, location)`.
    pub fn resolve_at(&self, doc: DocumentId, location: &str) -> Resolved {
        let key = (doc, location.to_string());
        if let Some(hit) = lock(&self.node_cache).get(&key) {
            return hit.clone();
        }

        let Some(root) = self.documents.get(&doc) else {
            return Resolved {
                schema: Value::Null,
                diagnostic: Some(RefDiagnostic::UnknownDocument { document: doc }),
            };
        };
        let resolved = match navigate_pointer(root, location) {
            Some(node) => self.resolve(doc, node),
            None => {
                warn!(document = %doc, location, "location not found in document");
                Resolved {
                    schema: Value::Null,
                    diagnostic: Some(RefDiagnostic::Unresolved {
                        pointer: location.to_string(),
                    }),
                }
            }
        };

        debug!(document = %doc, location, "caching resolved node");
        lock(&self.node_cache).insert(key, resolved.clone());
        resolved
    }

    /// Resolve `node` against the document's root.
    ///
    /// Follows `$ref` chains that start with `#`, merging sibling keywords of
    /// each `$ref` over its target (siblings win). External refs, and nodes
    /// without `$ref`, come back unchanged. A cycle or a dangling pointer stops
    /// the walk and returns the last node reached with a diagnostic.
    pub fn resolve(&self, doc: DocumentId, node: &Value) -> Resolved {
        if internal_ref(node).is_none() {
            return Resolved::clean(node.clone());
        }
        if !self.documents.contains_key(&doc) {
            return Resolved {
                schema: node.clone(),
                diagnostic: Some(RefDiagnostic::UnknownDocument { document: doc }),
            };
        }

        let mut visited: HashSet<String> = HashSet::new();
        let mut overlays: Vec<Map<String, Value>> = Vec::new();
        let mut current = node.clone();
        let mut diagnostic = None;

        while let Some(pointer) = internal_ref(&current).map(String::from) {
            if !visited.insert(pointer.clone()) {
                warn!(document = %doc, pointer = %pointer, "cyclic $ref chain");
                diagnostic = Some(RefDiagnostic::Cycle { pointer });
                break;
            }

            let Some(target) = self.lookup_pointer(doc, &pointer) else {
                warn!(document = %doc, pointer = %pointer, "unresolved $ref");
                diagnostic = Some(RefDiagnostic::Unresolved { pointer });
                break;
            };

            if let Value::Object(map) = &current {
                let siblings: Map<String, Value> = map
                    .iter()
                    .filter(|(k, _)| k.as_str() != "$ref")
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                if !siblings.is_empty() {
                    overlays.push(siblings);
                }
            }
            current = target;
        }

        // Innermost siblings first, so the outermost $ref's siblings win.
        let schema = overlays.into_iter().rev().fold(current, overlay);
        Resolved { schema, diagnostic }
    }

    /// Resolve `node`, the `index`-th item of the array at `location`.
    ///
    /// With a location the result goes through the per-location cache of
    /// [`resolve_at`](Self::resolve_at); without one this is [`resolve`](Self::resolve).
    pub fn resolve_item(
        &self,
        doc: DocumentId,
        location: Option<&str>,
        index: usize,
        node: &Value,
    ) -> Resolved {
        match location {
            Some(location) => self.resolve_at(doc, &format!("{}/{}", location, index)),
            None => self.resolve(doc, node),
        }
    }

    /// Shorthand for `resolve(doc, node).schema`.
    pub fn resolve_schema(&self, doc: DocumentId, node: &Value) -> Value {
        self.resolve(doc, node).schema
    }

    fn lookup_pointer(&self, doc: DocumentId, pointer: &str) -> Option<Value> {
        let key = (doc, pointer.to_string());
        if let Some(hit) = lock(&self.pointer_cache).get(&key) {
            return hit.clone();
        }

        let target = self
            .documents
            .get(&doc)
            .and_then(|root| navigate_pointer(root, pointer))
            .cloned();
        debug!(document = %doc, pointer, found = target.is_some(), "caching pointer target");
        lock(&self.pointer_cache).insert(key, target.clone());
        target
    }
}

/// The `$ref` of a node when it points inside the same document.
pub(crate) fn internal_ref(node: &Value) -> Option<&str> {
    node.get("$ref")
        .and_then(Value::as_str)
        .filter(|r| r.starts_with('#'))
}

/// Shallow-merge `siblings` over `target`. A boolean target is replaced.
fn overlay(target: Value, siblings: Map<String, Value>) -> Value {
    match target {
        Value::Object(mut map) => {
            for (k, v) in siblings {
                map.insert(k, v);
            }
            Value::Object(map)
        }
        _ => Value::Object(siblings),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resolver_with(root: Value) -> (RefResolver, DocumentId) {
        let mut resolver = RefResolver::new();
        let doc = resolver.load_document(root);
        (resolver, doc)
    }

    #[test]
    fn non_ref_node_is_returned_unchanged() {
        let (resolver, doc) = resolver_with(json!({}));
        let node = json!({ "type": "string" });
        let first = resolver.resolve(doc, &node);
        assert_eq!(first.schema, node);
        assert!(first.diagnostic.is_none());

        let again = resolver.resolve(doc, &first.schema);
        assert_eq!(again, first);
    }

    #[test]
    fn follows_pointer_chain() {
        let (resolver, doc) = resolver_with(json!({
            "$defs": {
                "a": { "$ref": "#/$defs/b" },
                "b": { "type": "integer", "minimum": 1 }
            }
        }));
        let resolved = resolver.resolve(doc, &json!({ "$ref": "#/$defs/a" }));
        assert_eq!(resolved.schema, json!({ "type": "integer", "minimum": 1 }));
        assert!(resolved.diagnostic.is_none());
    }

    #[test]
    fn unescapes_pointer_segments() {
        let (resolver, doc) = resolver_with(json!({
            "$defs": { "a/b": { "const": 1 }, "c~d": { "const": 2 } }
        }));
        assert_eq!(
            resolver.resolve_schema(doc, &json!({ "$ref": "#/$defs/a~1b" })),
            json!({ "const": 1 })
        );
        assert_eq!(
            resolver.resolve_schema(doc, &json!({ "$ref": "#/$defs/c~0d" })),
            json!({ "const": 2 })
        );
    }

    #[test]
    fn siblings_win_over_target() {
        let (resolver, doc) = resolver_with(json!({
            "$defs": { "name": { "type": "string", "title": "Name", "maxLength": 10 } }
        }));
        let node = json!({ "$ref": "#/$defs/name", "title": "Display name" });
        let resolved = resolver.resolve_schema(doc, &node);
        assert_eq!(resolved["title"], "Display name");
        assert_eq!(resolved["maxLength"], 10);
        assert!(resolved.get("$ref").is_none());
    }

    #[test]
    fn outer_siblings_win_over_inner_siblings() {
        let (resolver, doc) = resolver_with(json!({
            "$defs": {
                "a": { "$ref": "#/$defs/b", "title": "inner" },
                "b": { "type": "string" }
            }
        }));
        let resolved = resolver.resolve_schema(doc, &json!({ "$ref": "#/$defs/a", "title": "outer" }));
        assert_eq!(resolved, json!({ "type": "string", "title": "outer" }));
    }

    #[test]
    fn cycle_terminates_with_diagnostic() {
        let (resolver, doc) = resolver_with(json!({
            "$defs": {
                "a": { "$ref": "#/$defs/b" },
                "b": { "$ref": "#/$defs/a" }
            }
        }));
        let resolved = resolver.resolve(doc, &json!({ "$ref": "#/$defs/a" }));
        assert_eq!(
            resolved.diagnostic,
            Some(RefDiagnostic::Cycle {
                pointer: "#/$defs/a".into()
            })
        );
        assert_eq!(resolved.schema, json!({ "$ref": "#/$defs/a" }));
    }

    #[test]
    fn self_reference_terminates() {
        let (resolver, doc) = resolver_with(json!({ "$ref": "#" }));
        let resolved = resolver.resolve(doc, &json!({ "$ref": "#" }));
        assert!(matches!(resolved.diagnostic, Some(RefDiagnostic::Cycle { .. })));
    }

    #[test]
    fn dangling_pointer_returns_last_node() {
        let (resolver, doc) = resolver_with(json!({ "$defs": {} }));
        let node = json!({ "$ref": "#/$defs/missing" });
        let resolved = resolver.resolve(doc, &node);
        assert_eq!(resolved.schema, node);
        assert_eq!(
            resolved.diagnostic,
            Some(RefDiagnostic::Unresolved {
                pointer: "#/$defs/missing".into()
            })
        );
    }

    #[test]
    fn external_refs_pass_through() {
        let (resolver, doc) = resolver_with(json!({}));
        let node = json!({ "$ref": "https://example.com/pet.json" });
        let resolved = resolver.resolve(doc, &node);
        assert_eq!(resolved.schema, node);
        assert!(resolved.diagnostic.is_none());
        assert_eq!(resolver.cached_entries(), 0);
    }

    #[test]
    fn resolve_at_memoizes_by_location() {
        let (resolver, doc) = resolver_with(json!({
            "properties": {
                "a": { "$ref": "#/$defs/x" },
                "b": { "$ref": "#/$defs/x" }
            },
            "$defs": { "x": { "type": "boolean" } }
        }));
        let a = resolver.resolve_at(doc, "/properties/a");
        let b = resolver.resolve_at(doc, "/properties/b");
        assert_eq!(a.schema, json!({ "type": "boolean" }));
        assert_eq!(a, b);
        // one pointer entry shared, two distinct node entries
        assert_eq!(resolver.cached_entries(), 3);
    }

    #[test]
    fn resolve_item_uses_location_cache() {
        let (resolver, doc) = resolver_with(json!({
            "$defs": { "x": { "type": "boolean" } },
            "oneOf": [{ "$ref": "#/$defs/x" }, { "type": "null" }]
        }));
        let branch = json!({ "$ref": "#/$defs/x" });

        let first = resolver.resolve_item(doc, Some("/oneOf"), 0, &branch);
        assert_eq!(first.schema, json!({ "type": "boolean" }));
        let entries = resolver.cached_entries();
        assert_eq!(resolver.resolve_item(doc, Some("/oneOf"), 0, &branch), first);
        assert_eq!(resolver.cached_entries(), entries);

        // without a location nothing is cached per node
        let plain = resolver.resolve_item(doc, None, 1, &json!({ "type": "null" }));
        assert_eq!(plain.schema, json!({ "type": "null" }));
        assert_eq!(resolver.cached_entries(), entries);
    }

    #[test]
    fn unload_drops_document_entries_only() {
        let mut resolver = RefResolver::new();
        let first = resolver.load_document(json!({ "$defs": { "x": { "const": 1 } } }));
        let second = resolver.load_document(json!({ "$defs": { "x": { "const": 2 } } }));
        let node = json!({ "$ref": "#/$defs/x" });

        assert_eq!(resolver.resolve_schema(first, &node), json!({ "const": 1 }));
        assert_eq!(resolver.resolve_schema(second, &node), json!({ "const": 2 }));
        assert_eq!(resolver.cached_entries(), 2);

        resolver.unload_document(first);
        assert_eq!(resolver.cached_entries(), 1);
        assert!(resolver.document(first).is_none());
        assert!(matches!(
            resolver.resolve(first, &node).diagnostic,
            Some(RefDiagnostic::UnknownDocument { .. })
        ));

        // handles are never reused
        let third = resolver.load_document(json!({}));
        assert_ne!(third, first);
    }

    #[test]
    fn clear_keeps_documents() {
        let (resolver, doc) = resolver_with(json!({ "$defs": { "x": { "const": 1 } } }));
        resolver.resolve(doc, &json!({ "$ref": "#/$defs/x" }));
        resolver.clear();
        assert_eq!(resolver.cached_entries(), 0);
        assert_eq!(
            resolver.resolve_schema(doc, &json!({ "$ref": "#/$defs/x" })),
            json!({ "const": 1 })
        );
    }
}
