use crate::adapter::AdapterError;

/// Errors produced by journal operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JournalError {
    /// The stream already holds an entry at this version. Reload the stream
    /// and retry with a fresh version.
    #[error("concurrency conflict: stream {stream_name} already has version {version}")]
    ConcurrencyConflict { stream_name: String, version: u32 },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("cannot append an empty batch to stream {0}")]
    EmptyBatch(String),

    #[error("integrity violation in stream {stream_name} at version {version}: {reason}")]
    IntegrityViolation {
        stream_name: String,
        version: u32,
        reason: String,
    },

    /// The writer task has shut down.
    #[error("journal is closed")]
    Closed,

    #[error("configuration error: {0}")]
    Config(String),
}

impl JournalError {
    /// Returns `true` for an optimistic-concurrency rejection.
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}

/// Convenience alias used throughout the journal crate.
pub type JournalResult<T> = std::result::Result<T, JournalError>;
