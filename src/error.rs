//! Error types for schema loading and validator compilation.
//!
//! Engine operations (merge, compose, detect, extract) never fail: problems
//! they find are returned as data. These errors cover the two boundaries
//! where something outside the engine can go wrong.

use std::path::PathBuf;
use thiserror::Error;

/// Errors while loading a schema or value document.
#[derive(Debug, Error)]
pub enum LoadError {
    // IO errors (exit code 3)
    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("cannot read {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[cfg(feature = "remote")]
    #[error("failed to fetch {url}: {source}")]
    NetworkError {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    // Parse errors (exit code 2)
    #[error("invalid JSON: {source}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
    },

    #[error("pointer {pointer} does not resolve in document")]
    PointerNotFound { pointer: String },
}

impl LoadError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            LoadError::FileNotFound { .. } | LoadError::ReadError { .. } => 3,
            #[cfg(feature = "remote")]
            LoadError::NetworkError { .. } => 3,
            _ => 2,
        }
    }
}

/// The validator capability could not turn a subschema into a test.
#[derive(Debug, Error)]
#[error("cannot compile schema: {message}")]
pub struct CompileError {
    pub message: String,
}

impl CompileError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Single validation failure with path context.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SchemaError {
    /// JSON Pointer (RFC 6901) to the invalid part of the value.
    pub path: String,
    /// Human-readable error message.
    pub message: String,
}

impl std::fmt::Display for SchemaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_error_exit_codes() {
        let err = LoadError::FileNotFound {
            path: PathBuf::from("schema.json"),
        };
        assert_eq!(err.exit_code(), 3);

        let err = LoadError::PointerNotFound {
            pointer: "/$defs/missing".into(),
        };
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn compile_error_display() {
        let err = CompileError::new("unknown format");
        assert_eq!(err.to_string(), "cannot compile schema: unknown format");
    }

    #[test]
    fn schema_error_display() {
        let err = SchemaError {
            path: "/pet/kind".into(),
            message: "\"fish\" is not one of [\"cat\",\"dog\"]".into(),
        };
        assert_eq!(
            err.to_string(),
            "/pet/kind: \"fish\" is not one of [\"cat\",\"dog\"]"
        );
    }
}
