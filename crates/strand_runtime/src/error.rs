//! Error types for the threading runtime.

use thiserror::Error;

/// Failures surfaced to the caller as values.
///
/// Contract violations (joining yourself, releasing a lock you do not own)
/// are not represented here: they panic on the offending thread.
#[derive(Debug, Error)]
pub enum ThreadError {
    #[error("failed to create native thread `{name}`: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid thread name {0:?}: names may not contain NUL bytes")]
    InvalidName(String),

    #[error("thread identifiers exhausted")]
    IdExhausted,
}

/// Result type for threading operations.
pub type ThreadResult<T> = Result<T, ThreadError>;
