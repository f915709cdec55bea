//! JSON Schema composition engine
//!
//! Answers the questions a schema-driven form or editor keeps asking about
//! the value it is editing:
//!
//! - what does this `allOf` look like as one schema, and does it contradict itself?
//! - which `if`/`then`/`else` and dependency overlays apply right now?
//! - which keys has the schema accounted for (`unevaluatedProperties`)?
//! - which `oneOf`/`anyOf` branch is the value in?
//! - what should a fresh value look like?
//!
//! # Example
//!
//! ```
//! use schema_compose::{compose_conditional, RefResolver, ValidatorCache};
//! use serde_json::json;
//!
//! let schema = json!({
//!     "type": "object",
//!     "properties": {
//!         "featureA": { "type": "boolean" },
//!         "detailsA": { "type": "string" }
//!     },
//!     "dependentRequired": { "featureA": ["detailsA"] }
//! });
//!
//! let mut resolver = RefResolver::new();
//! let doc = resolver.load_document(schema.clone());
//! let cache = ValidatorCache::default();
//! let validator = cache.bind(doc, &schema);
//!
//! let composed = compose_conditional(&schema, &json!({ "featureA": true }), &validator, &[]);
//! assert_eq!(composed.effective["required"], json!(["detailsA"]));
//! assert!(composed.conflicts.is_empty());
//! ```
//!
//! # Failure model
//!
//! Engine operations never return `Err`. Conflicts, `not` violations and
//! branch ambiguity come back as data; unresolved or cyclic refs and branch
//! compile failures are logged through `tracing` and recovered locally.
//!
//! | Module | Entry points |
//! |--------|--------------|
//! | resolver | [`RefResolver::resolve`], [`RefResolver::resolve_at`], [`RefResolver::resolve_item`] |
//! | merge | [`merge_all_of`] |
//! | compose | [`compose_conditional`], [`find_not_violations`], [`ConditionalComposer`] |
//! | evaluated | [`evaluated_properties`], [`EvaluationTracker`] |
//! | branch | [`BranchDetector`], [`branch_label`], [`Discriminator`] |
//! | defaults | [`extract_default`], [`DefaultExtractor`] |
//! | validator | [`ValidatorCache`], [`ValidatorCapability`] |

mod branch;
mod compose;
mod defaults;
mod discriminator;
mod error;
mod evaluated;
mod linter;
mod loader;
mod merge;
mod resolver;
mod types;
mod validator;

pub use branch::{branch_label, heuristic_match, BranchDetector};
pub use compose::{
    compose_conditional, find_not_violations, has_conditional_features, ComposedSchema,
    ConditionalComposer,
};
pub use defaults::{extract_default, DefaultExtractor};
pub use discriminator::{
    discriminator_config, Discriminator, DiscriminatorConfig, CUSTOM_DISCRIMINATOR_KEY,
};
pub use error::{CompileError, LoadError, SchemaError};
pub use evaluated::{evaluated_properties, EvaluationTracker};
pub use linter::{lint, lint_file, Diagnostic, FileResult, FileStatus, LintResult, Severity};
pub use loader::{
    escape_pointer_segment, is_url, load_schema, load_schema_auto, load_schema_str,
    navigate_pointer, parse_pointer, select_pointer,
};
pub use merge::{merge_all_of, MergeResult};
pub use resolver::{RefDiagnostic, RefResolver, Resolved};
pub use types::{
    instance_type, json_type_name, BranchDetectionResult, Conflict, Dependency, DocumentId,
    NotViolation, SchemaKind, TypeDecl,
};
pub use validator::{
    validate_against_schema, BoundValidator, JsonSchemaCompiler, SchemaCheck, SchemaCompiler,
    ValidatorCache, ValidatorCapability,
};

#[cfg(feature = "remote")]
pub use loader::load_schema_url;
