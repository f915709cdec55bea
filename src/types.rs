//! Core types shared by the composition engine.

use serde::Serialize;
use serde_json::{Map, Value};

/// Keywords whose values are instance data, not subschemas.
pub(crate) const DATA_KEYWORDS: &[&str] = &["const", "enum", "default", "examples"];

/// Keywords whose values map arbitrary names to subschemas.
pub(crate) const SCHEMA_MAP_KEYWORDS: &[&str] = &[
    "properties",
    "patternProperties",
    "$defs",
    "definitions",
    "dependentSchemas",
    "dependencies",
];

/// Returns the JSON type name for messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Returns the JSON Schema type of a runtime value.
///
/// Whole numbers report `integer`, so callers can tell the two numeric
/// types apart. An `integer` value also satisfies a declared `number`.
pub fn instance_type(value: &Value) -> &'static str {
    match value {
        Value::Number(n) => {
            let whole = n.is_i64()
                || n.is_u64()
                || n.as_f64().is_some_and(|f| f.is_finite() && f.fract() == 0.0);
            if whole {
                "integer"
            } else {
                "number"
            }
        }
        other => json_type_name(other),
    }
}

/// Opaque handle for a loaded root document.
///
/// Handles are assigned at load time and never reused, so cache entries
/// keyed by a handle cannot leak into a different document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DocumentId(pub(crate) u64);

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "doc#{}", self.0)
    }
}

/// A schema node viewed as either a boolean schema or a keyword map.
#[derive(Debug, Clone, Copy)]
pub enum SchemaKind<'a> {
    Bool(bool),
    Keywords(&'a Map<String, Value>),
    /// Not a schema at all (number, string, array, null).
    Invalid,
}

impl<'a> SchemaKind<'a> {
    pub fn of(schema: &'a Value) -> Self {
        match schema {
            Value::Bool(b) => SchemaKind::Bool(*b),
            Value::Object(map) => SchemaKind::Keywords(map),
            _ => SchemaKind::Invalid,
        }
    }
}

/// The `type` keyword, which may be a single name or a list of names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeDecl {
    Single(String),
    Many(Vec<String>),
}

impl TypeDecl {
    /// Read the `type` keyword of a schema, if it is declared and well formed.
    pub fn of(schema: &Value) -> Option<Self> {
        Self::parse(schema.get("type")?)
    }

    /// Read a bare `type` keyword value.
    pub fn parse(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(TypeDecl::Single(s.clone())),
            Value::Array(arr) => Some(TypeDecl::Many(
                arr.iter()
                    .filter_map(|t| t.as_str().map(String::from))
                    .collect(),
            )),
            _ => None,
        }
    }

    pub fn names(&self) -> Vec<String> {
        match self {
            TypeDecl::Single(s) => vec![s.clone()],
            TypeDecl::Many(v) => v.clone(),
        }
    }

    /// Build a declaration from a list of names: one name collapses to a string.
    pub fn from_names(mut names: Vec<String>) -> Self {
        if names.len() == 1 {
            TypeDecl::Single(names.remove(0))
        } else {
            TypeDecl::Many(names)
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            TypeDecl::Single(s) => Value::String(s.clone()),
            TypeDecl::Many(v) => Value::Array(v.iter().cloned().map(Value::String).collect()),
        }
    }

    /// Whether a runtime value of type `actual` (from [`instance_type`]) is allowed.
    pub fn admits(&self, actual: &str) -> bool {
        match self {
            TypeDecl::Single(s) => type_admits(s, actual),
            TypeDecl::Many(v) => v.iter().any(|s| type_admits(s, actual)),
        }
    }
}

impl std::fmt::Display for TypeDecl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TypeDecl::Single(s) => f.write_str(s),
            TypeDecl::Many(v) => f.write_str(&v.join("|")),
        }
    }
}

fn type_admits(declared: &str, actual: &str) -> bool {
    declared == actual || (declared == "number" && actual == "integer")
}

/// One entry of draft-07 `dependencies`: a required-key list or a schema.
#[derive(Debug, Clone, Copy)]
pub enum Dependency<'a> {
    Required(&'a [Value]),
    Schema(&'a Value),
}

impl<'a> Dependency<'a> {
    pub fn of(entry: &'a Value) -> Self {
        match entry {
            Value::Array(keys) => Dependency::Required(keys),
            other => Dependency::Schema(other),
        }
    }
}

/// A detected incompatibility between allOf branches.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    /// Key path to the conflicting keyword or property.
    pub path: Vec<String>,
    pub message: String,
    pub conflicting_values: Vec<Value>,
}

/// A `not` subschema that the value matches.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotViolation {
    pub path: Vec<String>,
    pub message: String,
    pub not_schema: Value,
}

/// Outcome of matching a value against the branches of a union.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchDetectionResult {
    /// The unique matching branch, if exactly one matched.
    pub matching_branch: Option<usize>,
    pub valid_branches: Vec<usize>,
    pub is_ambiguous: bool,
    pub has_no_match: bool,
}

impl BranchDetectionResult {
    pub fn from_matches(valid_branches: Vec<usize>) -> Self {
        let matching_branch = match valid_branches.as_slice() {
            [only] => Some(*only),
            _ => None,
        };
        Self {
            matching_branch,
            is_ambiguous: valid_branches.len() > 1,
            has_no_match: valid_branches.is_empty(),
            valid_branches,
        }
    }
}

/// Extend a key path with one more segment.
pub(crate) fn extend_path(base: &[String], segment: impl Into<String>) -> Vec<String> {
    let mut path = base.to_vec();
    path.push(segment.into());
    path
}
