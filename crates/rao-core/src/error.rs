//! Unified error types for the RAO ecosystem
//!
//! This module provides a common error type [`RaoError`] that can represent
//! errors from any part of the system. Per-leaf and per-iteration failures
//! during optimization are *not* errors: they travel as status enums in
//! `rao-algo`. `RaoError` is reserved for configuration-time invariant
//! violations and unrecoverable conditions raised before any optimization
//! starts.
//!
//! # Example
//!
//! ```ignore
//! use rao_core::{RaoError, RaoResult};
//!
//! fn check_catalog(crac: &Crac) -> RaoResult<()> {
//!     crac.validate()?;
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// Unified error type for all RAO operations.
#[derive(Error, Debug)]
pub enum RaoError {
    /// Unsupported catalog shape (e.g. remedial actions on an outage state)
    #[error("Unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    /// Data validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Parsing/deserialization errors
    #[error("Parse error: {0}")]
    Parse(String),

    /// Linear solver errors outside the per-leaf status flow
    #[error("Solver error: {0}")]
    Solver(String),

    /// Sensitivity computation errors outside the per-state status flow
    #[error("Sensitivity error: {0}")]
    Sensitivity(String),

    /// Network variant errors (unknown variant, removal of base variant)
    #[error("Network error: {0}")]
    Network(String),

    /// Generic errors (for wrapping external errors)
    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Results using RaoError.
pub type RaoResult<T> = Result<T, RaoError>;

// Conversion from anyhow::Error
impl From<anyhow::Error> for RaoError {
    fn from(err: anyhow::Error) -> Self {
        RaoError::Other(err.to_string())
    }
}

// Conversion from string-like types for convenience
impl From<String> for RaoError {
    fn from(s: String) -> Self {
        RaoError::Other(s)
    }
}

impl From<&str> for RaoError {
    fn from(s: &str) -> Self {
        RaoError::Other(s.to_string())
    }
}

// JSON parsing errors
impl From<serde_json::Error> for RaoError {
    fn from(err: serde_json::Error) -> Self {
        RaoError::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RaoError::UnsupportedConfiguration("outage state has remedial actions".into());
        assert!(err.to_string().contains("Unsupported configuration"));
        assert!(err.to_string().contains("outage state"));
    }

    #[test]
    fn test_question_mark_operator() {
        fn inner() -> RaoResult<()> {
            Err(RaoError::Validation("test".into()))
        }

        fn outer() -> RaoResult<()> {
            inner()?;
            Ok(())
        }

        assert!(outer().is_err());
    }

    #[test]
    fn test_string_conversion() {
        let err: RaoError = "something went wrong".into();
        assert!(matches!(err, RaoError::Other(_)));
    }
}
