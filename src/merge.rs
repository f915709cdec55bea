//! allOf merging with conflict detection.
//!
//! Branches are folded left to right into one object schema. Each keyword
//! has a fixed policy:
//!
//! | Keyword | Policy | Conflict when |
//! |---------|--------|---------------|
//! | `type` | intersect (`integer` narrows `number`) | intersection empty; merged value is the union |
//! | `properties` | merge per key, recursing into compatible definitions | definitions disagree; later definition kept |
//! | `required` | union, de-duplicated | never |
//! | `additionalProperties` | last wins | two different values |
//! | `minProperties` / `maxProperties` | both retained | min exceeds max |
//! | anything else | last wins | never |
//!
//! Conflicts are returned, never raised; the merge always completes.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::types::{extend_path, Conflict, SchemaKind, TypeDecl};

/// Output of [`merge_all_of`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeResult {
    pub merged_schema: Value,
    pub conflicts: Vec<Conflict>,
}

/// Merge allOf branches into one schema.
///
/// An empty list merges to `{}` and a single branch is returned as-is.
/// `base_path` prefixes every conflict path.
pub fn merge_all_of(branches: &[Value], base_path: &[String]) -> MergeResult {
    match branches {
        [] => MergeResult {
            merged_schema: Value::Object(Map::new()),
            conflicts: Vec::new(),
        },
        [only] => MergeResult {
            merged_schema: only.clone(),
            conflicts: Vec::new(),
        },
        _ => {
            let mut merger = Merger::new(base_path.to_vec());
            let mut acc = Map::new();
            let mut unsatisfiable = false;
            for branch in branches {
                match SchemaKind::of(branch) {
                    SchemaKind::Keywords(map) => merger.fold(&mut acc, map),
                    SchemaKind::Bool(false) => unsatisfiable = true,
                    SchemaKind::Bool(true) | SchemaKind::Invalid => {}
                }
            }
            let merged_schema = if unsatisfiable {
                Value::Bool(false)
            } else {
                Value::Object(acc)
            };
            MergeResult {
                merged_schema,
                conflicts: merger.conflicts,
            }
        }
    }
}

struct Merger {
    base_path: Vec<String>,
    conflicts: Vec<Conflict>,
}

impl Merger {
    fn new(base_path: Vec<String>) -> Self {
        Self {
            base_path,
            conflicts: Vec::new(),
        }
    }

    fn conflict(&mut self, path: Vec<String>, message: String, values: Vec<Value>) {
        self.conflicts.push(Conflict {
            path,
            message,
            conflicting_values: values,
        });
    }

    fn fold(&mut self, acc: &mut Map<String, Value>, branch: &Map<String, Value>) {
        for (key, value) in branch {
            match key.as_str() {
                "type" => self.fold_type(acc, value),
                "properties" => self.fold_properties(acc, value),
                "required" => fold_required(acc, value),
                "additionalProperties" => {
                    if let Some(existing) = acc.get("additionalProperties") {
                        if existing != value {
                            self.conflict(
                                extend_path(&self.base_path, "additionalProperties"),
                                format!(
                                    "Conflicting additionalProperties values in allOf: {} vs {}",
                                    existing, value
                                ),
                                vec![existing.clone(), value.clone()],
                            );
                        }
                    }
                    acc.insert(key.clone(), value.clone());
                }
                "minProperties" => self.fold_property_count(acc, value, "minProperties", "maxProperties"),
                "maxProperties" => self.fold_property_count(acc, value, "maxProperties", "minProperties"),
                _ => {
                    acc.insert(key.clone(), value.clone());
                }
            }
        }
    }

    fn fold_type(&mut self, acc: &mut Map<String, Value>, value: &Value) {
        let incoming = TypeDecl::parse(value);
        let existing = acc.get("type").and_then(TypeDecl::parse);

        let (Some(existing), Some(incoming)) = (existing, incoming) else {
            acc.insert("type".to_string(), value.clone());
            return;
        };

        let (ours, theirs) = (existing.names(), incoming.names());
        let common = intersect_types(&ours, &theirs);
        if !common.is_empty() {
            acc.insert("type".to_string(), TypeDecl::from_names(common).to_value());
            return;
        }

        let message = if ours.len() == 1 && theirs.len() == 1 {
            format!("Incompatible types in allOf: {}, {}", ours[0], theirs[0])
        } else {
            "Incompatible types in allOf (no common types)".to_string()
        };
        self.conflict(
            extend_path(&self.base_path, "type"),
            message,
            vec![existing.to_value(), incoming.to_value()],
        );

        let mut union = ours;
        for t in theirs {
            if !union.contains(&t) {
                union.push(t);
            }
        }
        acc.insert("type".to_string(), TypeDecl::from_names(union).to_value());
    }

    fn fold_properties(&mut self, acc: &mut Map<String, Value>, value: &Value) {
        let Some(incoming) = value.as_object() else {
            acc.insert("properties".to_string(), value.clone());
            return;
        };

        let mut merged = match acc.get("properties") {
            Some(Value::Object(existing)) => existing.clone(),
            _ => Map::new(),
        };
        for (name, definition) in incoming {
            let combined = match merged.get(name) {
                Some(existing) => self.merge_property(name, existing, definition),
                None => definition.clone(),
            };
            merged.insert(name.clone(), combined);
        }
        acc.insert("properties".to_string(), Value::Object(merged));
    }

    fn fold_property_count(
        &mut self,
        acc: &mut Map<String, Value>,
        value: &Value,
        keyword: &str,
        other_keyword: &str,
    ) {
        if let (Some(new), Some(other)) = (
            value.as_f64(),
            acc.get(other_keyword).and_then(Value::as_f64),
        ) {
            let violated = if keyword == "minProperties" {
                new > other
            } else {
                new < other
            };
            if violated {
                let other_value = acc.get(other_keyword).cloned().unwrap_or(Value::Null);
                self.conflict(
                    extend_path(&self.base_path, keyword),
                    format!(
                        "{} {} conflicts with existing {} {}",
                        keyword, value, other_keyword, other_value
                    ),
                    vec![value.clone(), other_value],
                );
            }
        }
        acc.insert(keyword.to_string(), value.clone());
    }

    /// Merge two definitions of the same property, keeping `later` on conflict.
    fn merge_property(&mut self, name: &str, earlier: &Value, later: &Value) -> Value {
        let path = extend_path(&self.base_path, name);

        match (SchemaKind::of(earlier), SchemaKind::of(later)) {
            (SchemaKind::Bool(a), SchemaKind::Bool(b)) => {
                if a != b {
                    self.boolean_conflict(path, name, earlier, later);
                }
                later.clone()
            }
            (SchemaKind::Bool(true), _) => later.clone(),
            (_, SchemaKind::Bool(true)) => earlier.clone(),
            (SchemaKind::Bool(false), _) | (_, SchemaKind::Bool(false)) => {
                self.boolean_conflict(path, name, earlier, later);
                later.clone()
            }
            (SchemaKind::Keywords(a), SchemaKind::Keywords(b)) => {
                if self.definitions_conflict(&path, name, earlier, later) {
                    return later.clone();
                }
                let mut nested = Merger::new(path);
                let mut acc = Map::new();
                nested.fold(&mut acc, a);
                nested.fold(&mut acc, b);
                self.conflicts.append(&mut nested.conflicts);
                Value::Object(acc)
            }
            _ => {
                if earlier != later {
                    self.conflict(
                        path,
                        format!(
                            "Property \"{}\" has conflicting definitions in allOf branches",
                            name
                        ),
                        vec![earlier.clone(), later.clone()],
                    );
                }
                later.clone()
            }
        }
    }

    fn boolean_conflict(&mut self, path: Vec<String>, name: &str, earlier: &Value, later: &Value) {
        self.conflict(
            path,
            format!(
                "Property \"{}\" has conflicting boolean schema definitions in allOf branches",
                name
            ),
            vec![earlier.clone(), later.clone()],
        );
    }

    /// Record the first disagreement between two object definitions, if any.
    fn definitions_conflict(
        &mut self,
        path: &[String],
        name: &str,
        earlier: &Value,
        later: &Value,
    ) -> bool {
        let (ta, tb) = (TypeDecl::of(earlier), TypeDecl::of(later));
        if let (Some(ta), Some(tb)) = (&ta, &tb) {
            if intersect_types(&ta.names(), &tb.names()).is_empty() {
                self.conflict(
                    path.to_vec(),
                    format!(
                        "Property \"{}\" has conflicting types: {} vs {}",
                        name, ta, tb
                    ),
                    vec![ta.to_value(), tb.to_value()],
                );
                return true;
            }
        }

        if let Some((min, max)) = crossed_bounds(earlier, later, "minLength", "maxLength") {
            self.conflict(
                path.to_vec(),
                format!(
                    "Property \"{}\" has conflicting string constraints: minLength {} > maxLength {}",
                    name, min, max
                ),
                vec![min, max],
            );
            return true;
        }

        if let Some((min, max)) = crossed_bounds(earlier, later, "minimum", "maximum") {
            self.conflict(
                path.to_vec(),
                format!(
                    "Property \"{}\" has conflicting numeric constraints: minimum {} > maximum {}",
                    name, min, max
                ),
                vec![min, max],
            );
            return true;
        }

        if ta.is_none() && tb.is_none() && earlier != later {
            self.conflict(
                path.to_vec(),
                format!(
                    "Property \"{}\" has conflicting definitions in allOf branches",
                    name
                ),
                vec![earlier.clone(), later.clone()],
            );
            return true;
        }

        false
    }
}

fn fold_required(acc: &mut Map<String, Value>, value: &Value) {
    let Some(incoming) = value.as_array() else {
        acc.insert("required".to_string(), value.clone());
        return;
    };
    let mut required = match acc.get("required") {
        Some(Value::Array(existing)) => existing.clone(),
        _ => Vec::new(),
    };
    for key in incoming {
        if !required.contains(key) {
            required.push(key.clone());
        }
    }
    acc.insert("required".to_string(), Value::Array(required));
}

/// Intersect two type lists, treating `integer` as a subtype of `number`.
fn intersect_types(ours: &[String], theirs: &[String]) -> Vec<String> {
    let mut common: Vec<String> = Vec::new();
    for t in ours {
        let narrowed = if theirs.contains(t) {
            Some(t.as_str())
        } else if (t == "number" && theirs.iter().any(|x| x == "integer"))
            || (t == "integer" && theirs.iter().any(|x| x == "number"))
        {
            Some("integer")
        } else {
            None
        };
        if let Some(n) = narrowed {
            if !common.iter().any(|c| c == n) {
                common.push(n.to_string());
            }
        }
    }
    common
}

/// The tightest lower and upper bound across two schemas, when they cross.
fn crossed_bounds(a: &Value, b: &Value, lower: &str, upper: &str) -> Option<(Value, Value)> {
    let min = tightest(a, b, lower, true)?;
    let max = tightest(a, b, upper, false)?;
    if min.as_f64()? > max.as_f64()? {
        Some((min.clone(), max.clone()))
    } else {
        None
    }
}

fn tightest<'a>(a: &'a Value, b: &'a Value, key: &str, greatest: bool) -> Option<&'a Value> {
    [a.get(key), b.get(key)]
        .into_iter()
        .flatten()
        .filter(|v| v.as_f64().is_some())
        .reduce(|x, y| {
            let (fx, fy) = (x.as_f64().unwrap_or_default(), y.as_f64().unwrap_or_default());
            if (fy > fx) == greatest {
                y
            } else {
                x
            }
        })
}
