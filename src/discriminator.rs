//! Discriminator shortcuts for union branch selection.
//!
//! Two configurations are understood:
//!
//! - OpenAPI: `"discriminator": { "propertyName": "kind", "mapping": { "cat": "#/$defs/Cat" } }`,
//!   where mapping targets are matched against each branch's `$ref`.
//! - Custom: `"x-discriminator": { "key": "kind", "mapping": { "cat": 0 } }`,
//!   where mapping targets are branch indexes.
//!
//! Without a usable mapping entry, branches are scanned for the one whose
//! discriminator property is pinned to the value (`const`, a single-value
//! `enum`, or a root `const` object). The first hit wins.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tracing::warn;

use crate::branch::display_value;
use crate::resolver::RefResolver;
use crate::types::DocumentId;

/// Vendor key for the index-based discriminator.
pub const CUSTOM_DISCRIMINATOR_KEY: &str = "x-discriminator";

/// Discriminator configuration read off a union schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscriminatorConfig {
    OpenApi {
        property_name: String,
        mapping: Option<BTreeMap<String, String>>,
    },
    Custom {
        key: String,
        mapping: Option<BTreeMap<String, usize>>,
    },
}

impl DiscriminatorConfig {
    /// The property carrying the discriminator value.
    pub fn property(&self) -> &str {
        match self {
            DiscriminatorConfig::OpenApi { property_name, .. } => property_name,
            DiscriminatorConfig::Custom { key, .. } => key,
        }
    }
}

/// Read the discriminator configuration of a union schema.
///
/// The OpenAPI form wins when both are present. Mapping entries of the wrong
/// shape are skipped.
pub fn discriminator_config(schema: &Value) -> Option<DiscriminatorConfig> {
    if let Some(Value::Object(d)) = schema.get("discriminator") {
        let property_name = d.get("propertyName")?.as_str()?.to_string();
        let mapping = d.get("mapping").and_then(Value::as_object).map(|m| {
            m.iter()
                .filter_map(|(k, v)| Some((k.clone(), v.as_str()?.to_string())))
                .collect()
        });
        return Some(DiscriminatorConfig::OpenApi {
            property_name,
            mapping,
        });
    }

    let d = schema.get(CUSTOM_DISCRIMINATOR_KEY)?.as_object()?;
    let key = d.get("key")?.as_str()?.to_string();
    let mapping = d.get("mapping").and_then(Value::as_object).map(|m| {
        m.iter()
            .filter_map(|(k, v)| Some((k.clone(), usize::try_from(v.as_u64()?).ok()?)))
            .collect()
    });
    Some(DiscriminatorConfig::Custom { key, mapping })
}

/// A discriminator bound to the branches of one union.
#[derive(Clone, Copy)]
pub struct Discriminator<'a> {
    config: &'a DiscriminatorConfig,
    refs: Option<(&'a RefResolver, DocumentId)>,
    location: Option<&'a str>,
}

impl<'a> Discriminator<'a> {
    pub fn new(config: &'a DiscriminatorConfig) -> Self {
        Self {
            config,
            refs: None,
            location: None,
        }
    }

    /// Look through in-document `$ref` branches when reading pinned values.
    pub fn with_refs(mut self, resolver: &'a RefResolver, doc: DocumentId) -> Self {
        self.refs = Some((resolver, doc));
        self
    }

    /// JSON Pointer of the branch array inside the document, so branch
    /// resolutions are memoized per location.
    pub fn at(mut self, location: &'a str) -> Self {
        self.location = Some(location);
        self
    }

    /// Pick the branch for `current` by its discriminator value.
    ///
    /// Returns `None` when the value carries no discriminator or no branch is
    /// pinned to it.
    pub fn select_one_of_branch(&self, branches: &[Value], current: &Value) -> Option<usize> {
        let wanted = current.get(self.config.property())?;

        if let Some(index) = self.mapped_branch(branches, wanted) {
            return Some(index);
        }

        branches
            .iter()
            .enumerate()
            .position(|(index, branch)| self.pinned_value(index, branch).as_ref() == Some(wanted))
    }

    /// The minimal object selecting branch `index`, e.g. `{"kind": "cat"}`.
    pub fn create_discriminator_value(&self, branches: &[Value], index: usize) -> Option<Value> {
        let branch = branches.get(index)?;
        let value = self
            .pinned_value(index, branch)
            .or_else(|| self.reverse_mapping(branch, index))?;

        let mut object = Map::new();
        object.insert(self.config.property().to_string(), value);
        Some(Value::Object(object))
    }

    /// Statically check that every branch pins a distinct discriminator value.
    ///
    /// Returns one message per violation; empty means the configuration is sound.
    pub fn validate_discriminator_configuration(&self, branches: &[Value]) -> Vec<String> {
        let property = self.config.property();
        let mut errors = Vec::new();
        let mut seen: Vec<(Value, usize)> = Vec::new();

        for (index, branch) in branches.iter().enumerate() {
            let resolved = self.resolve(index, branch);
            let declared = resolved
                .get("properties")
                .and_then(|p| p.get(property))
                .is_some();

            match pinned_in(&resolved, property) {
                Some(value) => {
                    if let Some((_, first)) = seen.iter().find(|(v, _)| *v == value) {
                        errors.push(format!(
                            "Branch {} reuses discriminator value {} of branch {}",
                            index, value, first
                        ));
                    } else {
                        seen.push((value, index));
                    }
                }
                None if declared => errors.push(format!(
                    "Branch {} discriminator property \"{}\" must have a const or single-value enum",
                    index, property
                )),
                None => errors.push(format!(
                    "Branch {} is missing discriminator property \"{}\"",
                    index, property
                )),
            }
        }

        match self.config {
            DiscriminatorConfig::Custom {
                mapping: Some(mapping),
                ..
            } => {
                for (value, target) in mapping {
                    if *target >= branches.len() {
                        errors.push(format!(
                            "Mapping \"{}\" points to branch {}, but only {} branches exist",
                            value,
                            target,
                            branches.len()
                        ));
                    }
                }
            }
            DiscriminatorConfig::OpenApi {
                mapping: Some(mapping),
                ..
            } => {
                for (value, target) in mapping {
                    let found = branches
                        .iter()
                        .any(|b| b.get("$ref").and_then(Value::as_str) == Some(target.as_str()));
                    if !found {
                        errors.push(format!(
                            "Mapping \"{}\" references {}, which is not a branch",
                            value, target
                        ));
                    }
                }
            }
            _ => {}
        }

        errors
    }

    fn mapped_branch(&self, branches: &[Value], wanted: &Value) -> Option<usize> {
        let key = display_value(wanted);
        match self.config {
            DiscriminatorConfig::OpenApi {
                mapping: Some(mapping),
                ..
            } => {
                let target = mapping.get(&key)?;
                branches
                    .iter()
                    .position(|b| b.get("$ref").and_then(Value::as_str) == Some(target.as_str()))
            }
            DiscriminatorConfig::Custom {
                mapping: Some(mapping),
                ..
            } => {
                let index = *mapping.get(&key)?;
                if index < branches.len() {
                    Some(index)
                } else {
                    warn!(
                        value = %key,
                        index,
                        branches = branches.len(),
                        "discriminator mapping index out of range"
                    );
                    None
                }
            }
            _ => None,
        }
    }

    fn reverse_mapping(&self, branch: &Value, index: usize) -> Option<Value> {
        let key = match self.config {
            DiscriminatorConfig::OpenApi {
                mapping: Some(mapping),
                ..
            } => {
                let reference = branch.get("$ref")?.as_str()?;
                mapping
                    .iter()
                    .find(|(_, target)| target.as_str() == reference)
                    .map(|(k, _)| k)
            }
            DiscriminatorConfig::Custom {
                mapping: Some(mapping),
                ..
            } => mapping.iter().find(|(_, i)| **i == index).map(|(k, _)| k),
            _ => None,
        }?;
        Some(Value::String(key.clone()))
    }

    /// The discriminator value a branch pins, if any.
    fn pinned_value(&self, index: usize, branch: &Value) -> Option<Value> {
        pinned_in(&self.resolve(index, branch), self.config.property())
    }

    fn resolve(&self, index: usize, branch: &Value) -> Value {
        match self.refs {
            Some((resolver, doc)) => {
                resolver
                    .resolve_item(doc, self.location, index, branch)
                    .schema
            }
            None => branch.clone(),
        }
    }
}

/// The discriminator value a resolved branch pins for `property`.
fn pinned_in(branch: &Value, property: &str) -> Option<Value> {
    if let Some(prop) = branch.get("properties").and_then(|p| p.get(property)) {
        if let Some(constant) = prop.get("const") {
            return Some(constant.clone());
        }
        if let Some(Value::Array(options)) = prop.get("enum") {
            if let [only] = options.as_slice() {
                return Some(only.clone());
            }
        }
    }

    branch.get("const").and_then(|c| c.get(property)).cloned()
}
