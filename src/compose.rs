//! Conditional composition of object schemas.
//!
//! Given a schema and the value currently being edited, computes the single
//! effective schema that applies right now:
//!
//! - `if` is tested against the value; `then` or `else` becomes an overlay
//! - `dependentRequired` and array-valued draft-07 `dependencies` add
//!   required keys when their trigger key is present
//! - `dependentSchemas` and schema-valued `dependencies` become overlays when
//!   their trigger key is present
//! - the schema's own `allOf` branches are folded in
//!
//! Everything is merged with [`merge_all_of`], so overlay conflicts are
//! reported the same way allOf conflicts are. With
//! [`ConditionalComposer::with_refs`], `$ref` branches and overlays are
//! resolved first.

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

use crate::merge::merge_all_of;
use crate::resolver::{internal_ref, RefResolver};
use crate::types::{extend_path, Conflict, Dependency, DocumentId, NotViolation};
use crate::validator::ValidatorCapability;

/// Keywords consumed by composition and absent from the effective schema.
const CONDITIONAL_KEYWORDS: &[&str] = &[
    "allOf",
    "if",
    "then",
    "else",
    "dependentRequired",
    "dependentSchemas",
    "dependencies",
];

/// Output of [`compose_conditional`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposedSchema {
    pub effective: Value,
    pub conflicts: Vec<Conflict>,
}

/// Whether the schema carries keywords whose effect depends on the value.
///
/// Plain `allOf`/`oneOf`/`anyOf` do not count.
pub fn has_conditional_features(schema: &Value) -> bool {
    ["if", "dependentRequired", "dependentSchemas", "dependencies"]
        .iter()
        .any(|k| schema.get(*k).is_some())
}

/// Compute the effective schema of `base` for the current `value`.
///
/// In-document `$ref`s are not followed; see [`ConditionalComposer::with_refs`].
pub fn compose_conditional(
    base: &Value,
    value: &Value,
    validator: &dyn ValidatorCapability,
    base_path: &[String],
) -> ComposedSchema {
    ConditionalComposer::new(validator).compose(base, value, base_path)
}

/// Computes effective schemas and `not` violations for a value.
#[derive(Clone, Copy)]
pub struct ConditionalComposer<'a> {
    validator: &'a dyn ValidatorCapability,
    refs: Option<(&'a RefResolver, DocumentId)>,
}

impl<'a> ConditionalComposer<'a> {
    pub fn new(validator: &'a dyn ValidatorCapability) -> Self {
        Self {
            validator,
            refs: None,
        }
    }

    /// Resolve `$ref` branches and overlays against `doc` before merging them.
    pub fn with_refs(mut self, resolver: &'a RefResolver, doc: DocumentId) -> Self {
        self.refs = Some((resolver, doc));
        self
    }

    /// The effective schema of `base` for the current `value`.
    pub fn compose(&self, base: &Value, value: &Value, base_path: &[String]) -> ComposedSchema {
        self.compose_node(base, value, base_path, &mut Vec::new())
    }

    /// `not` subschemas that `value` matches, at the root and in present properties.
    pub fn not_violations(
        &self,
        schema: &Value,
        value: &Value,
        base_path: &[String],
    ) -> Vec<NotViolation> {
        let mut violations = Vec::new();
        self.collect_not_violations(schema, value, base_path, None, &mut violations);
        violations
    }

    fn compose_node(
        &self,
        base: &Value,
        value: &Value,
        base_path: &[String],
        refs_on_path: &mut Vec<String>,
    ) -> ComposedSchema {
        if let (Some((resolver, doc)), Some(pointer)) = (self.refs, internal_ref(base)) {
            // A ref back into its own expansion adds nothing new.
            if refs_on_path.iter().any(|p| p == pointer) {
                return ComposedSchema {
                    effective: Value::Object(Map::new()),
                    conflicts: Vec::new(),
                };
            }
            let target = resolver.resolve(doc, base);
            if target.diagnostic.is_some() {
                return ComposedSchema {
                    effective: target.schema,
                    conflicts: Vec::new(),
                };
            }
            refs_on_path.push(pointer.to_string());
            let composed = self.compose_node(&target.schema, value, base_path, refs_on_path);
            refs_on_path.pop();
            return composed;
        }

        let Value::Object(map) = base else {
            return ComposedSchema {
                effective: base.clone(),
                conflicts: Vec::new(),
            };
        };

        let stripped: Map<String, Value> = map
            .iter()
            .filter(|(k, _)| !CONDITIONAL_KEYWORDS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut overlays: Vec<&Value> = Vec::new();
        let mut extra_required: Vec<String> = Vec::new();

        if let Some(Value::Array(all_of)) = map.get("allOf") {
            overlays.extend(all_of);
        }

        if let Some(overlay) = active_conditional_branch(base, value, self.validator) {
            overlays.push(overlay);
        }

        if let Some(Value::Object(deps)) = map.get("dependentRequired") {
            for (trigger, keys) in deps {
                if has_key(value, trigger) {
                    push_required(&mut extra_required, keys.as_array().map(Vec::as_slice));
                }
            }
        }

        overlays.extend(triggered_schemas(base, value));

        if let Some(Value::Object(deps)) = map.get("dependencies") {
            for (trigger, entry) in deps {
                if let Dependency::Required(keys) = Dependency::of(entry) {
                    if has_key(value, trigger) {
                        push_required(&mut extra_required, Some(keys));
                    }
                }
            }
        }

        // Overlays may carry their own conditions, evaluated against the same value.
        let mut conflicts = Vec::new();
        let mut branches = vec![Value::Object(stripped)];
        for overlay in overlays {
            let expands = has_conditional_features(overlay)
                || overlay.get("allOf").is_some()
                || (self.refs.is_some() && internal_ref(overlay).is_some());
            if expands {
                let nested = self.compose_node(overlay, value, base_path, refs_on_path);
                conflicts.extend(nested.conflicts);
                branches.push(nested.effective);
            } else {
                branches.push(overlay.clone());
            }
        }

        let merged = merge_all_of(&branches, base_path);
        conflicts.extend(merged.conflicts);
        let mut effective = merged.merged_schema;

        if let Value::Object(out) = &mut effective {
            if !extra_required.is_empty() {
                let mut required = match out.get("required") {
                    Some(Value::Array(existing)) => existing.clone(),
                    _ => Vec::new(),
                };
                for key in extra_required {
                    let key = Value::String(key);
                    if !required.contains(&key) {
                        required.push(key);
                    }
                }
                out.insert("required".to_string(), Value::Array(required));
            }
        }

        ComposedSchema {
            effective,
            conflicts,
        }
    }

    fn collect_not_violations(
        &self,
        schema: &Value,
        value: &Value,
        path: &[String],
        property: Option<&str>,
        out: &mut Vec<NotViolation>,
    ) {
        let resolved;
        let schema = match self.refs {
            Some((resolver, doc)) if internal_ref(schema).is_some() => {
                resolved = resolver.resolve_schema(doc, schema);
                &resolved
            }
            _ => schema,
        };

        if let Some(not_schema) = schema.get("not") {
            let matched = self.validator.is_valid(not_schema, value).unwrap_or_else(|e| {
                warn!(error = %e, "cannot evaluate not schema, skipping");
                false
            });
            if matched {
                let message = match property {
                    Some(name) => {
                        format!("Property \"{}\" must not match the \"not\" schema", name)
                    }
                    None => "Value must not match the \"not\" schema".to_string(),
                };
                out.push(NotViolation {
                    path: path.to_vec(),
                    message,
                    not_schema: not_schema.clone(),
                });
            }
        }

        let (Some(Value::Object(props)), Value::Object(fields)) =
            (schema.get("properties"), value)
        else {
            return;
        };
        for (name, field) in fields {
            if let Some(prop_schema) = props.get(name) {
                let child_path = extend_path(path, name);
                self.collect_not_violations(prop_schema, field, &child_path, Some(name), out);
            }
        }
    }
}

/// The `then` or `else` schema selected by testing `if` against `value`.
///
/// A compile failure of `if` counts as "no match" and is logged.
pub(crate) fn active_conditional_branch<'a>(
    schema: &'a Value,
    value: &Value,
    validator: &dyn ValidatorCapability,
) -> Option<&'a Value> {
    let condition = schema.get("if")?;
    let matched = validator.is_valid(condition, value).unwrap_or_else(|e| {
        warn!(error = %e, "cannot evaluate if condition, treating as unmatched");
        false
    });
    if matched {
        schema.get("then")
    } else {
        schema.get("else")
    }
}

/// `dependentSchemas` and schema-valued `dependencies` whose trigger key is present.
pub(crate) fn triggered_schemas<'a>(schema: &'a Value, value: &Value) -> Vec<&'a Value> {
    let mut overlays = Vec::new();
    if let Some(Value::Object(deps)) = schema.get("dependentSchemas") {
        overlays.extend(
            deps.iter()
                .filter(|(trigger, _)| has_key(value, trigger))
                .map(|(_, s)| s),
        );
    }
    if let Some(Value::Object(deps)) = schema.get("dependencies") {
        for (trigger, entry) in deps {
            if let Dependency::Schema(s) = Dependency::of(entry) {
                if has_key(value, trigger) {
                    overlays.push(s);
                }
            }
        }
    }
    overlays
}

/// Find `not` subschemas that `value` matches, at the root and in present properties.
pub fn find_not_violations(
    schema: &Value,
    value: &Value,
    validator: &dyn ValidatorCapability,
    base_path: &[String],
) -> Vec<NotViolation> {
    ConditionalComposer::new(validator).not_violations(schema, value, base_path)
}

fn has_key(value: &Value, key: &str) -> bool {
    value.as_object().is_some_and(|m| m.contains_key(key))
}

fn push_required(acc: &mut Vec<String>, keys: Option<&[Value]>) {
    for key in keys.unwrap_or_default().iter().filter_map(Value::as_str) {
        if !acc.iter().any(|k| k == key) {
            acc.push(key.to_string());
        }
    }
}
