use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("payload is not valid UTF-8: {0}")]
    InvalidUtf8(String),
}
