use thiserror::Error;

/// Errors raised while loading or merging a safety policy.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("policy I/O error: {0}")]
    Io(String),

    #[error("invalid policy document: {0}")]
    Invalid(String),
}
