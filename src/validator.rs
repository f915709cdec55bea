//! Validator capability and its compile cache.
//!
//! The engine never validates by itself; it asks a [`ValidatorCapability`]
//! yes/no questions (does this value satisfy `if`, this branch, this `not`).
//! [`ValidatorCache`] wraps a [`SchemaCompiler`] so each subschema is compiled
//! once per document.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use jsonschema::{Draft, Resource};
use serde_json::Value;
use tracing::debug;

use crate::error::{CompileError, SchemaError};
use crate::types::{DocumentId, DATA_KEYWORDS, SCHEMA_MAP_KEYWORDS};

/// A compiled yes/no test for one schema.
pub trait SchemaCheck: Send + Sync {
    /// Check a value, returning every failure on mismatch.
    fn check(&self, value: &Value) -> Result<(), Vec<SchemaError>>;

    fn is_valid(&self, value: &Value) -> bool {
        self.check(value).is_ok()
    }
}

/// Turns a schema into a [`SchemaCheck`].
///
/// `root` is the document the schema was taken from, for resolving
/// in-document references.
pub trait SchemaCompiler {
    fn compile(&self, schema: &Value, root: &Value) -> Result<Arc<dyn SchemaCheck>, CompileError>;
}

/// Yes/no questions the engine asks while composing and detecting.
pub trait ValidatorCapability {
    /// Whether `value` satisfies `schema`.
    ///
    /// # Errors
    ///
    /// Returns `CompileError` when `schema` cannot be compiled. Callers
    /// recover locally (heuristic fallback or "no match").
    fn is_valid(&self, schema: &Value, value: &Value) -> Result<bool, CompileError>;
}

/// [`SchemaCompiler`] backed by the `jsonschema` crate.
#[derive(Debug, Clone, Default)]
pub struct JsonSchemaCompiler {
    draft: Option<Draft>,
}

impl JsonSchemaCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin the draft instead of detecting it from `$schema`.
    pub fn with_draft(mut self, draft: Draft) -> Self {
        self.draft = Some(draft);
        self
    }
}

struct JsonSchemaCheck {
    validator: jsonschema::Validator,
}

impl SchemaCheck for JsonSchemaCheck {
    fn check(&self, value: &Value) -> Result<(), Vec<SchemaError>> {
        let errors: Vec<SchemaError> = self
            .validator
            .iter_errors(value)
            .map(|e| SchemaError {
                path: e.instance_path.to_string(),
                message: e.to_string(),
            })
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn is_valid(&self, value: &Value) -> bool {
        self.validator.is_valid(value)
    }
}

impl SchemaCompiler for JsonSchemaCompiler {
    fn compile(&self, schema: &Value, root: &Value) -> Result<Arc<dyn SchemaCheck>, CompileError> {
        let resource = match self.draft {
            Some(draft) => draft.create_resource(root.clone()),
            None => Resource::from_contents(root.clone())
                .map_err(|e| CompileError::new(e.to_string()))?,
        };
        let subject = anchor_to_root(schema, root);

        let mut options = jsonschema::options();
        options.with_resource(ROOT_URI, resource);
        if let Some(draft) = self.draft {
            options.with_draft(draft);
        }
        let validator = options
            .build(&subject)
            .map_err(|e| CompileError::new(e.to_string()))?;
        Ok(Arc::new(JsonSchemaCheck { validator }))
    }
}

/// Base URI the root document is registered under while compiling a subschema.
const ROOT_URI: &str = "json-schema:///schema-compose/root.json";

/// Rewrite in-document refs of a subschema to point into the registered root,
/// so `#` and every `#/...` pointer mean the same thing they mean in the root.
/// The root's `$schema` is carried over when the subschema has none.
fn anchor_to_root(schema: &Value, root: &Value) -> Value {
    let mut subject = schema.clone();
    rewrite_refs(&mut subject);
    if let (Value::Object(map), Some(dialect)) = (&mut subject, root.get("$schema")) {
        map.entry("$schema").or_insert_with(|| dialect.clone());
    }
    subject
}

fn rewrite_refs(node: &mut Value) {
    match node {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                if DATA_KEYWORDS.contains(&key.as_str()) {
                    continue;
                }
                if key == "$ref" {
                    if let Value::String(reference) = child {
                        if reference.starts_with('#') {
                            *reference = format!("{}{}", ROOT_URI, reference);
                        }
                    }
                } else if SCHEMA_MAP_KEYWORDS.contains(&key.as_str()) {
                    if let Value::Object(named) = child {
                        named.values_mut().for_each(rewrite_refs);
                    }
                } else {
                    rewrite_refs(child);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(rewrite_refs),
        _ => {}
    }
}

type CheckKey = (DocumentId, String);

/// Memoizes compiled checks per document.
///
/// The cache instance stands for one compiler (engine handle). Entries are
/// keyed by the document handle plus the subschema's serialized form, so a
/// document unload drops exactly its own entries.
pub struct ValidatorCache<C> {
    compiler: C,
    checks: Mutex<HashMap<CheckKey, Arc<dyn SchemaCheck>>>,
}

impl<C: SchemaCompiler> ValidatorCache<C> {
    pub fn new(compiler: C) -> Self {
        Self {
            compiler,
            checks: Mutex::new(HashMap::new()),
        }
    }

    /// Compile `schema` (taken from `root`, loaded as `doc`) or return the memoized check.
    pub fn compile(
        &self,
        doc: DocumentId,
        root: &Value,
        schema: &Value,
    ) -> Result<Arc<dyn SchemaCheck>, CompileError> {
        let key = (doc, schema.to_string());
        if let Some(hit) = lock(&self.checks).get(&key) {
            return Ok(Arc::clone(hit));
        }

        debug!(document = %doc, "compiling subschema");
        let check = self.compiler.compile(schema, root)?;
        lock(&self.checks).insert(key, Arc::clone(&check));
        Ok(check)
    }

    /// Bind the cache to one document, yielding a [`ValidatorCapability`].
    pub fn bind<'a>(&'a self, doc: DocumentId, root: &'a Value) -> BoundValidator<'a, C> {
        BoundValidator {
            cache: self,
            doc,
            root,
        }
    }

    pub fn clear(&self) {
        lock(&self.checks).clear();
    }

    pub fn unload_document(&self, doc: DocumentId) {
        lock(&self.checks).retain(|(d, _), _| *d != doc);
    }

    pub fn len(&self) -> usize {
        lock(&self.checks).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ValidatorCache<JsonSchemaCompiler> {
    fn default() -> Self {
        Self::new(JsonSchemaCompiler::new())
    }
}

/// A [`ValidatorCache`] bound to one document.
pub struct BoundValidator<'a, C> {
    cache: &'a ValidatorCache<C>,
    doc: DocumentId,
    root: &'a Value,
}

impl<C: SchemaCompiler> ValidatorCapability for BoundValidator<'_, C> {
    fn is_valid(&self, schema: &Value, value: &Value) -> Result<bool, CompileError> {
        // Boolean schemas need no compiler.
        if let Value::Bool(b) = schema {
            return Ok(*b);
        }
        let check = self.cache.compile(self.doc, self.root, schema)?;
        Ok(check.is_valid(value))
    }
}

/// Validate a value against a standalone schema, collecting every error.
///
/// # Errors
///
/// Returns `CompileError` if the schema cannot be compiled; the inner
/// `Result` carries the validation outcome.
pub fn validate_against_schema(
    schema: &Value,
    value: &Value,
) -> Result<Result<(), Vec<SchemaError>>, CompileError> {
    let check = JsonSchemaCompiler::new().compile(schema, schema)?;
    Ok(check.check(value))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::RefResolver;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingCompiler {
        compiled: AtomicUsize,
    }

    impl SchemaCompiler for CountingCompiler {
        fn compile(
            &self,
            schema: &Value,
            root: &Value,
        ) -> Result<Arc<dyn SchemaCheck>, CompileError> {
            self.compiled.fetch_add(1, Ordering::SeqCst);
            JsonSchemaCompiler::new().compile(schema, root)
        }
    }

    fn doc_with(root: Value) -> (RefResolver, DocumentId) {
        let mut resolver = RefResolver::new();
        let doc = resolver.load_document(root);
        (resolver, doc)
    }

    #[test]
    fn validate_valid_value() {
        let schema = json!({
            "type": "object",
            "properties": { "name": { "type": "string" } },
            "required": ["name"]
        });
        let outcome = validate_against_schema(&schema, &json!({ "name": "rex" })).unwrap();
        assert!(outcome.is_ok());
    }

    #[test]
    fn validate_collects_multiple_errors() {
        let schema = json!({
            "type": "object",
            "properties": {
                "name": { "type": "string" },
                "age": { "type": "number" }
            },
            "required": ["name", "age"]
        });
        let outcome = validate_against_schema(&schema, &json!({})).unwrap();
        assert_eq!(outcome.unwrap_err().len(), 2);
    }

    #[test]
    fn invalid_schema_is_compile_error() {
        let schema = json!({ "type": 12 });
        assert!(validate_against_schema(&schema, &json!(1)).is_err());
    }

    #[test]
    fn cache_compiles_each_subschema_once() {
        let (resolver, doc) = doc_with(json!({}));
        let root = resolver.document(doc).unwrap();
        let cache = ValidatorCache::new(CountingCompiler {
            compiled: AtomicUsize::new(0),
        });
        let schema = json!({ "type": "string" });

        let validator = cache.bind(doc, &root);
        assert!(validator.is_valid(&schema, &json!("a")).unwrap());
        assert!(!validator.is_valid(&schema, &json!(1)).unwrap());
        assert_eq!(cache.compiler.compiled.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
        assert!(validator.is_valid(&schema, &json!("b")).unwrap());
        assert_eq!(cache.compiler.compiled.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unload_drops_only_that_document() {
        let (mut resolver, first) = doc_with(json!({}));
        let second = resolver.load_document(json!({}));
        let cache = ValidatorCache::default();
        let schema = json!({ "minimum": 3 });

        cache.compile(first, &json!({}), &schema).unwrap();
        cache.compile(second, &json!({}), &schema).unwrap();
        assert_eq!(cache.len(), 2);

        cache.unload_document(first);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn branch_refs_resolve_through_root_defs() {
        let root = json!({
            "$defs": { "name": { "type": "string", "minLength": 2 } },
            "oneOf": [{ "properties": { "name": { "$ref": "#/$defs/name" } } }]
        });
        let (resolver, doc) = doc_with(root);
        let root = resolver.document(doc).unwrap();
        let cache = ValidatorCache::default();
        let validator = cache.bind(doc, &root);
        let branch = &root["oneOf"][0];

        assert!(validator.is_valid(branch, &json!({ "name": "Rex" })).unwrap());
        assert!(!validator.is_valid(branch, &json!({ "name": "R" })).unwrap());
    }

    #[test]
    fn hash_ref_means_document_root() {
        let root = json!({
            "type": "object",
            "properties": { "id": { "type": "integer" } },
            "oneOf": [{
                "properties": { "kind": { "const": "a" }, "parent": { "$ref": "#" } }
            }]
        });
        let (resolver, doc) = doc_with(root);
        let root = resolver.document(doc).unwrap();
        let cache = ValidatorCache::default();
        let validator = cache.bind(doc, &root);
        let branch = &root["oneOf"][0];

        let bad_parent = json!({ "kind": "a", "parent": { "kind": "a", "id": "x" } });
        let good_parent = json!({ "kind": "a", "parent": { "kind": "a", "id": 1 } });
        assert!(!validator.is_valid(branch, &bad_parent).unwrap());
        assert!(validator.is_valid(branch, &good_parent).unwrap());
    }

    #[test]
    fn pointers_outside_defs_resolve() {
        let root = json!({
            "components": {
                "schemas": {
                    "US": { "properties": { "country": { "const": "US" } }, "required": ["country"] }
                }
            },
            "if": { "$ref": "#/components/schemas/US" }
        });
        let (resolver, doc) = doc_with(root);
        let root = resolver.document(doc).unwrap();
        let cache = ValidatorCache::default();
        let validator = cache.bind(doc, &root);

        assert!(validator.is_valid(&root["if"], &json!({ "country": "US" })).unwrap());
        assert!(!validator.is_valid(&root["if"], &json!({ "country": "NL" })).unwrap());
    }

    #[test]
    fn refs_inside_instance_data_are_left_alone() {
        let schema = json!({ "properties": { "link": { "const": { "$ref": "#/a" } } } });
        let anchored = anchor_to_root(&schema, &json!({}));
        assert_eq!(anchored, schema);
    }

    #[test]
    fn boolean_schemas_skip_compilation() {
        let cache = ValidatorCache::default();
        let (resolver, doc) = doc_with(json!({}));
        let root = resolver.document(doc).unwrap();
        let validator = cache.bind(doc, &root);
        assert!(validator.is_valid(&json!(true), &json!(1)).unwrap());
        assert!(!validator.is_valid(&json!(false), &json!(1)).unwrap());
        assert!(cache.is_empty());
    }
}
