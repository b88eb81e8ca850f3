use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0} not found")]
    NotFound(String),

    /// The snapshot could not be recorded, so the mutation must not run.
    #[error("Ledger write failed: {0}")]
    LedgerWrite(String),

    #[error("Rollback unrecoverable: {0}")]
    RollbackUnrecoverable(String),

    #[error("Classification timed out after {0}s")]
    ClassificationTimeout(u64),

    #[error("Classifier error: {0}")]
    Classifier(String),

    #[error("Job {0} is already rolled back")]
    AlreadyRolledBack(i64),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Per-file errors worth a second attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Io(_))
    }
}
