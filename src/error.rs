//! Error types for berthq

use thiserror::Error;

/// Errors that can occur during computation
///
/// Per-record and per-vessel problems (malformed positions, missing history,
/// out-of-range waiting times) are not errors: they are counted into summaries.
/// Only dataset-level failures surface here.
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("Failed to parse input: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("No usable temporal folds: {0}")]
    SplitUnavailable(String),

    #[error("No labeled rows available: {0}")]
    NoLabeledRows(String),

    #[error("Unknown terminal: {0}")]
    UnknownTerminal(String),
}
