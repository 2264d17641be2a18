use thiserror::Error;

/// Errors that can occur when interacting with the staging cache.
#[derive(Debug, Error)]
pub enum StagingError {
    /// The cache could not be reached.
    #[error("Staging cache unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StagingError {
    /// Returns true if retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StagingError::Unavailable(_) => true,
            StagingError::Database(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            ),
            StagingError::Serialization(_) => false,
        }
    }
}

/// Result type for staging cache operations.
pub type Result<T> = std::result::Result<T, StagingError>;
