//! Error taxonomy for the definition store.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    /// Field name as it appears in the admin payload
    pub field: String,
    /// Human-readable reason
    pub message: String,
}

/// All validation failures found in one definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(Vec<FieldError>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure on `field`.
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.push(FieldError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> &[FieldError] {
        &self.0
    }

    /// `Ok(())` when nothing was recorded.
    pub fn into_result(self) -> Result<(), StoreError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(StoreError::Validation(self))
        }
    }

    pub(crate) fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", e.field, e.message)?;
        }
        Ok(())
    }
}

/// Failures of the durable snapshot.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("snapshot {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

/// Errors returned by the definition store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Malformed definition input
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),
    /// Unknown definition id or scenario name
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    /// Durable write or read failure
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl StoreError {
    pub(crate) fn definition_not_found(id: &str) -> Self {
        Self::NotFound {
            kind: "mock definition",
            id: id.to_string(),
        }
    }

    pub(crate) fn scenario_not_found(name: &str) -> Self {
        Self::NotFound {
            kind: "scenario",
            id: name.to_string(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
