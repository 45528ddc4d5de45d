//! Error types for Solaris progression.

use thiserror::Error;

/// Invalid input rejected at the progression boundary. Never mutates state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProgressionError {
    #[error("points delta must be non-negative, got {0}")]
    NegativeDelta(i64),

    #[error("level {level} is out of range (max {max})")]
    LevelOutOfRange { level: u32, max: u32 },

    #[error("invalid level table: {0}")]
    InvalidTable(String),
}

/// Progression store failures.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Store task failed: {0}")]
    Task(String),

    #[error("Corrupt record for member {member}: {reason}")]
    Corrupt { member: u64, reason: String },

    #[error("Rejected: {0}")]
    Rejected(#[from] ProgressionError),
}

impl StoreError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Sqlite(e) => matches!(
                e.sqlite_error_code(),
                Some(rusqlite::ErrorCode::DatabaseBusy)
                    | Some(rusqlite::ErrorCode::DatabaseLocked)
                    | Some(rusqlite::ErrorCode::SystemIoFailure)
            ),
            StoreError::Task(_) => true,
            StoreError::Corrupt { .. } | StoreError::Rejected(_) => false,
        }
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(e: tokio::task::JoinError) -> Self {
        StoreError::Task(e.to_string())
    }
}
