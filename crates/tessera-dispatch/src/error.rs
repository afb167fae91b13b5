/// Errors produced by dispatchers and the dispatch coordinator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// The dispatcher refused the dispatchable.
    #[error("dispatch rejected: {0}")]
    Rejected(String),

    /// The dispatcher's downstream is temporarily unavailable.
    #[error("dispatcher unavailable: {0}")]
    Unavailable(String),

    /// The dispatch control has been stopped.
    #[error("dispatch control is stopped")]
    Stopped,

    /// Internal lock was poisoned by a panicking thread.
    #[error("{0} lock poisoned")]
    LockPoisoned(&'static str),
}

/// Convenience alias used throughout the dispatch crate.
pub type DispatchResult<T> = std::result::Result<T, DispatchError>;
