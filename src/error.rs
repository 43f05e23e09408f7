use thiserror::Error;

/// Crate-wide error type.
///
/// Expected failure modes of external checks (nonzero exit, timeout, spawn
/// failure, unparseable output) are never errors; they are captured as
/// values by the subprocess and parser layers. Errors here abort a single
/// operation before it mutates any session state.
#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
