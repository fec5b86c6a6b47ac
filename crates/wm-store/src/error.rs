//! Error types for wm-store.
//!
//! Every error maps to a signed result code via [`Error::code`]: negative
//! codes are application-level failures (see [`codes`]), non-negative codes
//! are passed through from SQLite unchanged.

use std::path::PathBuf;

use wm_types::{ParseError, RecordId};

use crate::models::Table;

/// Result type for wm-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-level result codes.
pub mod codes {
    /// Operation succeeded.
    pub const OK: i32 = 0;
    /// Storage engine failure without a SQLite result code.
    pub const ENGINE: i32 = -1;
    /// Record does not exist.
    pub const NOT_FOUND: i32 = -2;
    /// Caller passed an invalid argument.
    pub const INVALID_ARGUMENT: i32 = -3;
    /// Stored or incoming data could not be converted.
    pub const PARSE: i32 = -4;
    /// Filesystem failure.
    pub const IO: i32 = -5;
    /// Serialization failure (JSON/CSV).
    pub const SERIALIZATION: i32 = -6;
    /// Operation not supported on this table.
    pub const UNSUPPORTED: i32 = -7;
}

/// Errors that can occur in wm-store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database error from SQLite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to create database directory.
    #[error("Failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Record not found in the given table.
    #[error("Record {id} not found in {table}")]
    NotFound { table: Table, id: RecordId },

    /// Invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation does not apply to the table.
    #[error("Operation '{operation}' is not supported on {table}")]
    Unsupported {
        operation: &'static str,
        table: Table,
    },

    /// Stored data could not be converted back into a record.
    #[error("Invalid stored data: {0}")]
    Parse(#[from] ParseError),

    /// Invalid timestamp.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// CSV export error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Signed result code for this error.
    ///
    /// ```
    /// use wm_store::{Error, Table, codes};
    ///
    /// let err = Error::NotFound { table: Table::Locations, id: 9 };
    /// assert_eq!(err.code(), codes::NOT_FOUND);
    /// ```
    pub fn code(&self) -> i32 {
        match self {
            Error::Database(rusqlite::Error::SqliteFailure(e, _)) => e.extended_code,
            Error::Database(rusqlite::Error::QueryReturnedNoRows) => codes::NOT_FOUND,
            Error::Database(_) => codes::ENGINE,
            Error::NotFound { .. } => codes::NOT_FOUND,
            Error::InvalidArgument(_) => codes::INVALID_ARGUMENT,
            Error::Unsupported { .. } => codes::UNSUPPORTED,
            Error::Parse(_) | Error::InvalidTimestamp(_) => codes::PARSE,
            Error::Serialization(_) | Error::Csv(_) => codes::SERIALIZATION,
            Error::CreateDirectory { .. } | Error::Io(_) => codes::IO,
        }
    }

    /// Whether this is an expected "no such row" outcome.
    pub fn is_not_found(&self) -> bool {
        self.code() == codes::NOT_FOUND
    }
}
