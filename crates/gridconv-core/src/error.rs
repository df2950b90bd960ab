//! Unified error types for gridconv
//!
//! [`GridError`] covers every failure the canonical model can report: I/O,
//! malformed source rows, unresolved cross-references, duplicate registry
//! entries and aggregated validation failures. The reader and writer crates
//! wrap it in `anyhow` at their API boundaries.
//!
//! # Example
//!
//! ```ignore
//! use gridconv_core::{GridError, GridResult};
//!
//! fn load(path: &str) -> GridResult<System> {
//!     let system = read_system(path)?;
//!     validate_system(&system)?;
//!     Ok(system)
//! }
//! ```

use thiserror::Error;

use crate::validate::ValidationIssue;

/// Unified error type for all gridconv operations.
#[derive(Error, Debug)]
pub enum GridError {
    /// I/O errors (file access, directory creation, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parsing/deserialization errors
    #[error("Parse error: {0}")]
    Parse(String),

    /// A source row lacks a mandatory column
    #[error("Missing required field '{field}' while mapping {context}")]
    MissingField { field: String, context: String },

    /// A source row carries a mandatory column without a value
    #[error("Null required field '{field}' while mapping {context}")]
    NullField { field: String, context: String },

    /// A bus or equipment name did not resolve in the registry
    #[error("Missing {kind} '{name}' while mapping {context}")]
    UnresolvedReference {
        kind: String,
        name: String,
        context: String,
    },

    /// A component with the same kind and name is already registered
    #[error("{kind} '{name}' is already registered")]
    DuplicateComponent { kind: String, name: String },

    /// A mapper failed on one source row
    #[error("Failed parsing {kind} row {row}{}", format_row_name(.name))]
    Mapping {
        kind: String,
        row: usize,
        name: Option<String>,
        #[source]
        source: Box<GridError>,
    },

    /// Post-construction validation failures, reported together
    #[error("{}", format_validation(.0))]
    Validation(Vec<ValidationIssue>),

    /// A reader or writer kind that is not registered
    #[error("Unknown {role} '{name}'. Available: [{}]", .available.join(", "))]
    UnknownFormat {
        role: String,
        name: String,
        available: Vec<String>,
    },

    /// Session lookup of a system name that was never created
    #[error("No system loaded with name '{name}'. Available systems: {}", .available.join(", "))]
    NoSuchSystem { name: String, available: Vec<String> },

    /// Generic errors (for wrapping external errors)
    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Results using GridError.
pub type GridResult<T> = Result<T, GridError>;

impl GridError {
    pub fn missing_field(field: &str, context: impl Into<String>) -> Self {
        GridError::MissingField {
            field: field.to_string(),
            context: context.into(),
        }
    }

    pub fn null_field(field: &str, context: impl Into<String>) -> Self {
        GridError::NullField {
            field: field.to_string(),
            context: context.into(),
        }
    }

    pub fn unresolved(kind: impl ToString, name: &str, context: impl Into<String>) -> Self {
        GridError::UnresolvedReference {
            kind: kind.to_string(),
            name: name.to_string(),
            context: context.into(),
        }
    }
}

fn format_row_name(name: &Option<String>) -> String {
    name.as_ref()
        .map(|n| format!(" (name={n})"))
        .unwrap_or_default()
}

fn format_validation(issues: &[ValidationIssue]) -> String {
    let mut out = format!("{} validation error(s):", issues.len());
    for issue in issues {
        out.push_str("\n  - ");
        out.push_str(&issue.to_string());
    }
    out
}

// Conversion from anyhow::Error
impl From<anyhow::Error> for GridError {
    fn from(err: anyhow::Error) -> Self {
        GridError::Other(err.to_string())
    }
}

// Conversion from string-like types for convenience
impl From<String> for GridError {
    fn from(s: String) -> Self {
        GridError::Other(s)
    }
}

impl From<&str> for GridError {
    fn from(s: &str) -> Self {
        GridError::Other(s.to_string())
    }
}

// JSON parsing errors
impl From<serde_json::Error> for GridError {
    fn from(err: serde_json::Error) -> Self {
        GridError::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_field_display() {
        let err = GridError::missing_field("bus_1", "MatrixImpedanceBranch 'L1'");
        assert_eq!(
            err.to_string(),
            "Missing required field 'bus_1' while mapping MatrixImpedanceBranch 'L1'"
        );
    }

    #[test]
    fn test_unresolved_reference_display() {
        let err = GridError::unresolved("DistributionBus", "n7", "DistributionLoad 'ld1'");
        assert_eq!(
            err.to_string(),
            "Missing DistributionBus 'n7' while mapping DistributionLoad 'ld1'"
        );
    }

    #[test]
    fn test_mapping_error_wraps_source() {
        let err = GridError::Mapping {
            kind: "DistributionTransformer".into(),
            row: 3,
            name: Some("t1".into()),
            source: Box::new(GridError::null_field("bus_2", "DistributionTransformer 't1'")),
        };
        assert_eq!(
            err.to_string(),
            "Failed parsing DistributionTransformer row 3 (name=t1)"
        );
        let source = std::error::Error::source(&err).unwrap();
        assert!(source.to_string().contains("Null required field 'bus_2'"));
    }

    #[test]
    fn test_unknown_format_lists_available() {
        let err = GridError::UnknownFormat {
            role: "reader".into(),
            name: "psse".into(),
            available: vec!["opendss".into(), "cyme".into()],
        };
        assert_eq!(
            err.to_string(),
            "Unknown reader 'psse'. Available: [opendss, cyme]"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let grid_err: GridError = io_err.into();
        assert!(matches!(grid_err, GridError::Io(_)));
    }

    #[test]
    fn test_question_mark_operator() {
        fn inner() -> GridResult<()> {
            Err(GridError::missing_field("KVA", "TRANSFORMER 'T1'"))
        }

        fn outer() -> GridResult<()> {
            inner()?;
            Ok(())
        }

        assert!(outer().is_err());
    }
}
