//! Typed error hierarchy for forge-context.
//!
//! Two top-level enums cover the two failure domains:
//! - `BudgetError`: invalid budget configuration (caught at load time, never at runtime)
//! - `ContextError`: persistence and session failures of the engine operations
//!
//! Degraded measurement, missing artifacts, unknown ids and generator failures are
//! not errors; they are recovered inside the components.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from budget construction.
#[derive(Debug, Error, PartialEq)]
pub enum BudgetError {
    #[error("max_tokens must be greater than zero")]
    InvalidMaxTokens,

    #[error("Threshold '{name}' must be in (0, 1], got {value}")]
    ThresholdOutOfRange { name: &'static str, value: f64 },

    #[error(
        "Thresholds must be ascending (warning < critical < emergency), got {warning} / {critical} / {emergency}"
    )]
    ThresholdOrder {
        warning: f64,
        critical: f64,
        emergency: f64,
    },
}

/// Errors from the compaction engine, snapshot store and handoff builder.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Invalid session scope '{scope}': must be a single non-empty path segment")]
    InvalidScope { scope: String },

    #[error("Session '{scope}' is locked by another operation")]
    SessionBusy { scope: String },

    #[error("I/O failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to (de)serialize {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Budget(#[from] BudgetError),
}

impl ContextError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ContextError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn serialize(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        ContextError::Serialize {
            path: path.into(),
            source,
        }
    }
}

pub type ContextResult<T> = std::result::Result<T, ContextError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_error_threshold_order_carries_values() {
        let err = BudgetError::ThresholdOrder {
            warning: 0.9,
            critical: 0.8,
            emergency: 0.95,
        };
        let msg = err.to_string();
        assert!(msg.contains("0.9"));
        assert!(msg.contains("0.8"));
    }

    #[test]
    fn context_error_io_carries_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = ContextError::io("/tmp/history.json", io_err);
        match &err {
            ContextError::Io { path, source } => {
                assert_eq!(path, &PathBuf::from("/tmp/history.json"));
                assert_eq!(source.kind(), std::io::ErrorKind::PermissionDenied);
            }
            _ => panic!("Expected Io variant"),
        }
    }

    #[test]
    fn context_error_converts_from_budget_error() {
        let err: ContextError = BudgetError::InvalidMaxTokens.into();
        assert!(matches!(
            err,
            ContextError::Budget(BudgetError::InvalidMaxTokens)
        ));
    }

    #[test]
    fn session_busy_names_scope() {
        let err = ContextError::SessionBusy {
            scope: "001-auth".into(),
        };
        assert!(err.to_string().contains("001-auth"));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&BudgetError::InvalidMaxTokens);
        assert_std_error(&ContextError::InvalidScope { scope: "..".into() });
    }
}
