//! Core error types.

use thiserror::Error;

/// Core database errors.
#[derive(Debug, Error)]
pub enum Error {
    /// The database exists but could not be reached or opened.
    #[error("connection unavailable: {0}")]
    ConnectionUnavailable(String),

    /// A statement violated a data-integrity constraint (NOT NULL, UNIQUE, FK, CHECK).
    #[error("integrity violation: {0}")]
    Integrity(String),

    /// Any other database error.
    #[error("database error: {0}")]
    Database(String),

    /// The connection string uses a scheme no backend handles.
    #[error("unsupported database scheme: {0}")]
    UnsupportedScheme(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid data format.
    #[error("invalid data: {0}")]
    InvalidData(String),
}

impl Error {
    /// Whether this error is a data-integrity violation.
    pub fn is_integrity(&self) -> bool {
        matches!(self, Error::Integrity(_))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        match err.sqlite_error_code() {
            Some(ErrorCode::ConstraintViolation) => Error::Integrity(err.to_string()),
            Some(ErrorCode::CannotOpen)
            | Some(ErrorCode::NotADatabase)
            | Some(ErrorCode::PermissionDenied)
            | Some(ErrorCode::DatabaseCorrupt) => Error::ConnectionUnavailable(err.to_string()),
            _ => Error::Database(err.to_string()),
        }
    }
}
