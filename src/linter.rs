//! Schema linting - static analysis of composition problems in schema files.
//!
//! Checks schema files for:
//! - JSON syntax errors and unreadable files
//! - Dangling and cyclic in-document `$ref`s
//! - `allOf` branches that cannot be merged cleanly
//! - Unsound discriminator configurations
//! - Invalid `patternProperties` regexes
//! - External `$ref`s, which are passed through unchecked

use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::discriminator::{discriminator_config, Discriminator};
use crate::loader::{escape_pointer_segment, load_schema};
use crate::merge::merge_all_of;
use crate::error::LoadError;
use crate::resolver::{RefDiagnostic, RefResolver};
use crate::types::{DocumentId, DATA_KEYWORDS, SCHEMA_MAP_KEYWORDS};

/// Severity level for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// A single diagnostic message from linting.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: String,
    pub file: PathBuf,
    /// JSON Pointer to the issue (e.g., "/properties/pet/allOf")
    pub path: String,
    pub message: String,
}

/// Result of linting a single file.
#[derive(Debug, Clone, Serialize)]
pub struct FileResult {
    pub file: PathBuf,
    pub status: FileStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
}

/// Status of a linted file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Ok,
    Error,
    Warning,
}

/// Result of linting a directory or set of files.
#[derive(Debug, Clone, Serialize)]
pub struct LintResult {
    pub path: PathBuf,
    pub files_checked: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub warnings: usize,
    pub results: Vec<FileResult>,
}

impl LintResult {
    /// Returns true if no file failed.
    pub fn is_ok(&self) -> bool {
        self.failed == 0
    }
}

/// Lint a file or directory.
///
/// If path is a directory, recursively finds all .json files.
/// If `strict` is true, files with warnings count as failed.
pub fn lint(path: &Path, strict: bool) -> LintResult {
    let files = collect_schema_files(path);
    let results: Vec<FileResult> = files.iter().map(|file| lint_file(file, path)).collect();

    let count = |severity: Severity| {
        results
            .iter()
            .flat_map(|r| &r.diagnostics)
            .filter(|d| d.severity == severity)
            .count()
    };
    let errors = count(Severity::Error);
    let warnings = count(Severity::Warning);

    let failed = results
        .iter()
        .filter(|r| {
            if strict {
                r.status != FileStatus::Ok
            } else {
                r.status == FileStatus::Error
            }
        })
        .count();

    LintResult {
        path: path.to_path_buf(),
        files_checked: files.len(),
        passed: files.len() - failed,
        failed,
        errors,
        warnings,
        results,
    }
}

/// Lint a single schema file. Reported paths are relative to `base_path`.
pub fn lint_file(file: &Path, base_path: &Path) -> FileResult {
    let display = file.strip_prefix(base_path).unwrap_or(file).to_path_buf();

    let schema = match load_schema(file) {
        Ok(s) => s,
        Err(e) => {
            let (code, message) = match &e {
                LoadError::InvalidJson { .. } => ("E001", format!("syntax error: {}", e)),
                _ => ("E002", format!("read error: {}", e)),
            };
            return FileResult {
                file: display,
                status: FileStatus::Error,
                diagnostics: vec![Diagnostic {
                    severity: Severity::Error,
                    code: code.to_string(),
                    file: file.to_path_buf(),
                    path: "/".to_string(),
                    message,
                }],
            };
        }
    };

    let mut resolver = RefResolver::new();
    let doc = resolver.load_document(schema.clone());
    let mut linter = FileLinter {
        file,
        resolver: &resolver,
        doc,
        diagnostics: Vec::new(),
    };
    linter.check(&schema, "");
    let diagnostics = linter.diagnostics;

    let has_errors = diagnostics.iter().any(|d| d.severity == Severity::Error);
    let has_warnings = diagnostics.iter().any(|d| d.severity == Severity::Warning);

    let status = if has_errors {
        FileStatus::Error
    } else if has_warnings {
        FileStatus::Warning
    } else {
        FileStatus::Ok
    };

    FileResult {
        file: display,
        status,
        diagnostics,
    }
}

struct FileLinter<'a> {
    file: &'a Path,
    resolver: &'a RefResolver,
    doc: DocumentId,
    diagnostics: Vec<Diagnostic>,
}

impl FileLinter<'_> {
    fn check(&mut self, value: &Value, path: &str) {
        match value {
            Value::Object(map) => {
                if let Some(Value::String(reference)) = map.get("$ref") {
                    self.check_ref(reference, path);
                }
                if let Some(Value::Array(branches)) = map.get("allOf") {
                    self.check_all_of(branches, path);
                }
                self.check_discriminator(value, path);
                if let Some(Value::Object(patterns)) = map.get("patternProperties") {
                    self.check_patterns(patterns.keys(), path);
                }

                for (key, child) in map {
                    if DATA_KEYWORDS.contains(&key.as_str()) {
                        continue;
                    }
                    let child_path = format!("{}/{}", path, escape_pointer_segment(key));
                    match child {
                        // Member names are user data, never keywords.
                        Value::Object(members) if SCHEMA_MAP_KEYWORDS.contains(&key.as_str()) => {
                            for (name, member) in members {
                                let member_path =
                                    format!("{}/{}", child_path, escape_pointer_segment(name));
                                self.check(member, &member_path);
                            }
                        }
                        _ => self.check(child, &child_path),
                    }
                }
            }
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    self.check(item, &format!("{}/{}", path, i));
                }
            }
            _ => {}
        }
    }

    fn check_ref(&mut self, reference: &str, path: &str) {
        if !reference.starts_with('#') {
            self.push(
                Severity::Warning,
                "W006",
                path,
                format!("external $ref not checked: {}", reference),
            );
            return;
        }

        match self.resolver.resolve_at(self.doc, path).diagnostic {
            Some(RefDiagnostic::Unresolved { pointer }) => self.push(
                Severity::Error,
                "E003",
                path,
                format!("$ref target not found: {}", pointer),
            ),
            Some(RefDiagnostic::Cycle { pointer }) => self.push(
                Severity::Warning,
                "W004",
                path,
                format!("cyclic $ref chain through {}", pointer),
            ),
            _ => {}
        }
    }

    fn check_all_of(&mut self, branches: &[Value], path: &str) {
        let location = format!("{}/allOf", path);
        let resolved: Vec<Value> = branches
            .iter()
            .enumerate()
            .map(|(i, b)| {
                self.resolver
                    .resolve_item(self.doc, Some(&location), i, b)
                    .schema
            })
            .collect();
        for conflict in merge_all_of(&resolved, &[]).conflicts {
            let message = if conflict.path.is_empty() {
                conflict.message
            } else {
                format!("{} (at {})", conflict.message, conflict.path.join("."))
            };
            self.push(Severity::Error, "E006", &location, message);
        }
    }

    fn check_discriminator(&mut self, node: &Value, path: &str) {
        let Some(config) = discriminator_config(node) else {
            return;
        };
        let union = ["oneOf", "anyOf"]
            .into_iter()
            .find_map(|k| Some((k, node.get(k)?.as_array()?)));
        let Some((keyword, branches)) = union else {
            self.push(
                Severity::Error,
                "E007",
                path,
                "discriminator without oneOf or anyOf".to_string(),
            );
            return;
        };

        let location = format!("{}/{}", path, keyword);
        let errors = Discriminator::new(&config)
            .with_refs(self.resolver, self.doc)
            .at(&location)
            .validate_discriminator_configuration(branches);
        for message in errors {
            self.push(Severity::Error, "E007", &location, message);
        }
    }

    fn check_patterns<'k>(&mut self, patterns: impl Iterator<Item = &'k String>, path: &str) {
        for pattern in patterns {
            if let Err(e) = Regex::new(pattern) {
                let location = format!(
                    "{}/patternProperties/{}",
                    path,
                    escape_pointer_segment(pattern)
                );
                self.push(
                    Severity::Warning,
                    "W005",
                    &location,
                    format!("invalid patternProperties regex \"{}\": {}", pattern, e),
                );
            }
        }
    }

    fn push(&mut self, severity: Severity, code: &str, path: &str, message: String) {
        self.diagnostics.push(Diagnostic {
            severity,
            code: code.to_string(),
            file: self.file.to_path_buf(),
            path: if path.is_empty() { "/".to_string() } else { path.to_string() },
            message,
        });
    }
}

/// Collect all .json files in a path (file or directory).
fn collect_schema_files(path: &Path) -> Vec<PathBuf> {
    if path.is_file() {
        if path.extension().map(|e| e == "json").unwrap_or(false) {
            return vec![path.to_path_buf()];
        }
        return vec![];
    }

    let mut files = Vec::new();
    collect_files_recursive(path, &mut files);
    files.sort();
    files
}

fn collect_files_recursive(dir: &Path, files: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files_recursive(&path, files);
        } else if path.extension().map(|e| e == "json").unwrap_or(false) {
            files.push(path);
        }
    }
}
