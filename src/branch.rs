//! Union branch detection for `oneOf` / `anyOf`.
//!
//! With a validator capability every branch is compiled and tested. Without
//! one, a deliberately lenient heuristic is used instead:
//!
//! - `const` must equal the value
//! - `enum` must contain the value
//! - a declared `type` must admit the value's runtime type
//! - for object values, every property declaring a `const` must match when
//!   present in the value
//!
//! Anything the heuristic cannot rule out counts as a match. Ambiguity is
//! reported, never resolved by guessing.

use serde_json::Value;
use tracing::warn;

use crate::resolver::RefResolver;
use crate::types::{instance_type, BranchDetectionResult, DocumentId, SchemaKind, TypeDecl};
use crate::validator::ValidatorCapability;

/// Detects which branches of a union a value belongs to.
#[derive(Clone, Copy, Default)]
pub struct BranchDetector<'a> {
    refs: Option<(&'a RefResolver, DocumentId)>,
    location: Option<&'a str>,
    validator: Option<&'a dyn ValidatorCapability>,
}

impl<'a> BranchDetector<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve in-document `$ref` branches against `doc` before testing them.
    pub fn with_refs(mut self, resolver: &'a RefResolver, doc: DocumentId) -> Self {
        self.refs = Some((resolver, doc));
        self
    }

    /// JSON Pointer of the branch array inside the document, so each branch
    /// is resolved once per location.
    pub fn at(mut self, location: &'a str) -> Self {
        self.location = Some(location);
        self
    }

    /// Test branches with a validator instead of the heuristic.
    pub fn with_validator(mut self, validator: &'a dyn ValidatorCapability) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Test `value` against every branch.
    pub fn detect(&self, branches: &[Value], value: &Value) -> BranchDetectionResult {
        let valid = branches
            .iter()
            .enumerate()
            .filter(|(index, branch)| self.branch_matches(*index, branch, value))
            .map(|(index, _)| index)
            .collect();
        BranchDetectionResult::from_matches(valid)
    }

    /// The unique matching branch, or `None` when zero or several match.
    pub fn auto_select(&self, branches: &[Value], value: &Value) -> Option<usize> {
        self.detect(branches, value).matching_branch
    }

    /// Resolve the `index`-th branch through the configured document, if any.
    pub fn resolve_branch(&self, index: usize, branch: &Value) -> Value {
        match self.refs {
            Some((resolver, doc)) => {
                resolver
                    .resolve_item(doc, self.location, index, branch)
                    .schema
            }
            None => branch.clone(),
        }
    }

    fn branch_matches(&self, index: usize, branch: &Value, value: &Value) -> bool {
        let branch = self.resolve_branch(index, branch);
        if let SchemaKind::Bool(b) = SchemaKind::of(&branch) {
            return b;
        }

        match self.validator {
            Some(validator) => validator.is_valid(&branch, value).unwrap_or_else(|e| {
                warn!(branch = index, error = %e, "branch failed to compile, using heuristic");
                heuristic_match(&branch, value)
            }),
            None => heuristic_match(&branch, value),
        }
    }
}

/// Lenient structural match used when no validator is available.
pub fn heuristic_match(branch: &Value, value: &Value) -> bool {
    let map = match SchemaKind::of(branch) {
        SchemaKind::Bool(b) => return b,
        SchemaKind::Keywords(map) => map,
        SchemaKind::Invalid => return true,
    };

    if let Some(expected) = map.get("const") {
        if expected != value {
            return false;
        }
    }

    if let Some(Value::Array(options)) = map.get("enum") {
        if !options.contains(value) {
            return false;
        }
    }

    if let Some(declared) = TypeDecl::of(branch) {
        if !declared.admits(instance_type(value)) {
            return false;
        }
    }

    if let (Some(Value::Object(props)), Value::Object(fields)) = (map.get("properties"), value) {
        for (name, prop) in props {
            if let (Some(expected), Some(actual)) = (prop.get("const"), fields.get(name)) {
                if expected != actual {
                    return false;
                }
            }
        }
    }

    true
}

/// Human-readable label for a union branch.
///
/// Precedence: `title`, the first `const`-valued property as
/// `"{prop}: {value}"`, a top-level string `const`, the declared types, then
/// `fallback` (or `"Option {index + 1}"`).
pub fn branch_label(branch: &Value, index: usize, fallback: Option<&str>) -> String {
    let map = match SchemaKind::of(branch) {
        SchemaKind::Bool(true) => return "Any Value".to_string(),
        SchemaKind::Bool(false) => return "No Value".to_string(),
        SchemaKind::Keywords(map) => Some(map),
        SchemaKind::Invalid => None,
    };

    if let Some(map) = map {
        if let Some(Value::String(title)) = map.get("title") {
            return title.clone();
        }

        if let Some(Value::Object(props)) = map.get("properties") {
            let first_const = props
                .iter()
                .find_map(|(name, prop)| prop.get("const").map(|c| (name, c)));
            if let Some((name, constant)) = first_const {
                return format!("{}: {}", name, display_value(constant));
            }
        }

        if let Some(Value::String(constant)) = map.get("const") {
            return constant.clone();
        }

        if let Some(declared) = TypeDecl::of(branch) {
            let names = declared.names();
            if !names.is_empty() {
                return names.join(", ");
            }
        }
    }

    match fallback {
        Some(label) => label.to_string(),
        None => format!("Option {}", index + 1),
    }
}

/// Strings print bare; everything else as JSON.
pub(crate) fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
