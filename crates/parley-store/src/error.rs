use parley_shared::BackendError;
use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A query expected exactly one row but found none.
    #[error("Record not found")]
    NotFound,

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// A row or query referenced a column the table does not have, or
    /// carried a value of the wrong shape.
    #[error("Invalid request: {0}")]
    Invalid(String),

    /// A uniqueness rule enforced outside SQLite constraints.
    #[error("{0}")]
    Conflict(String),

    /// The caller is not signed in, or the credentials do not match.
    #[error("{0}")]
    Unauthorized(String),

    /// UUID parsing error.
    #[error("UUID error: {0}")]
    Uuid(#[from] uuid::Error),

    /// Chrono parsing error.
    #[error("Timestamp parse error: {0}")]
    ChronoParse(#[from] chrono::ParseError),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for BackendError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(code, ref msg))
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                let detail = msg.clone().unwrap_or_else(|| code.to_string());
                match code.extended_code {
                    rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                        BackendError::Duplicate(format!("Duplicate value: {detail}"))
                    }
                    _ => BackendError::Rejected(detail),
                }
            }
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(code, _))
                if code.code == rusqlite::ErrorCode::DatabaseBusy
                    || code.code == rusqlite::ErrorCode::DatabaseLocked =>
            {
                BackendError::Unavailable(err.to_string())
            }
            StoreError::Invalid(msg) => BackendError::Rejected(msg),
            StoreError::Conflict(msg) => BackendError::Duplicate(msg),
            StoreError::Unauthorized(msg) => BackendError::Unauthorized(msg),
            StoreError::NotFound => BackendError::Rejected("Record not found".into()),
            StoreError::Uuid(_) | StoreError::ChronoParse(_) | StoreError::Json(_) => {
                BackendError::Malformed(err.to_string())
            }
            other => BackendError::Unavailable(other.to_string()),
        }
    }
}
