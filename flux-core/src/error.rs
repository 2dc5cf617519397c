//! Domain error taxonomy shared by all pipeline crates.

use thiserror::Error;

/// Every failure mode the core can produce.
///
/// Library code returns these; the command layer adds file/site context
/// with anyhow. `InsufficientData` is the only variant routinely downgraded
/// to a warning (the variable is left all-missing and processing goes on).
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed header: {0}")]
    MalformedHeader(String),

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("unable to parse value '{value}' at row {row}, column {column}")]
    NumericParse {
        value: String,
        row: usize,
        column: usize,
    },

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("insufficient data: {0}")]
    InsufficientData(String),
}

/// Shorthand used throughout the library crates.
pub type Result<T> = std::result::Result<T, PipelineError>;
