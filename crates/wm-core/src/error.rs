//! Error types for wm-core.
//!
//! Most failures in the sync engine are not errors in the `Result` sense:
//! connectivity is modeled as state, storage outcomes are reported through
//! [`crate::StoreResult`] and unexpected state-machine triggers are logged
//! and dropped. [`Error`] covers what is left.
//!
//! # Recovery
//!
//! | Error | Strategy |
//! |-------|----------|
//! | [`Error::Storage`] | Inspect `code`; the local cache keeps its last good state |
//! | [`Error::Remote`] | Wait for the next connectivity change, the coordinator re-requests |
//! | [`Error::NoActiveLocation`] | Ask the user to move into a fence before submitting |
//! | [`Error::ChannelInUse`] | Pick another channel or replace the existing fence |
//! | [`Error::InvalidConfig`] | Fix configuration and restart |
//! | [`Error::Closed`] | The session is over; build a new coordinator |

use thiserror::Error;

use wm_types::{ParseError, RecordId};

use crate::bus::Channel;

/// Errors that can occur in the synchronization engine.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The local record store reported a failure.
    #[error("Storage failure (code {code}): {message}")]
    Storage {
        /// Signed result code, see `wm_store::codes`.
        code: i32,
        /// Description from the store.
        message: String,
    },

    /// Record data could not be converted.
    #[error("Invalid record data: {0}")]
    Parse(#[from] ParseError),

    /// A geofence is already registered on this channel.
    #[error("Channel {0} already has a geofence")]
    ChannelInUse(Channel),

    /// No handler filled the reply slot of a request.
    #[error("No responder for request '{0}'")]
    NoResponder(&'static str),

    /// A request's reply slot was filled twice.
    #[error("Reply already sent")]
    AlreadyReplied,

    /// An observation was submitted outside any location fence.
    #[error("No active location: enter a location fence before submitting")]
    NoActiveLocation,

    /// The referenced location is not in the session's collection.
    #[error("Unknown location {0}")]
    UnknownLocation(RecordId),

    /// The remote dataset could not be reached or rejected the request.
    #[error("Remote dataset error: {0}")]
    Remote(String),

    /// HTTP transport error.
    #[cfg(feature = "http")]
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON payload error.
    #[error("Invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    /// Caller passed an invalid argument.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// The coordinator has shut down.
    #[error("Sync coordinator is closed")]
    Closed,

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a storage error from a store error.
    pub fn storage(err: &wm_store::Error) -> Self {
        Self::Storage {
            code: err.code(),
            message: err.to_string(),
        }
    }

    /// Create a remote dataset error.
    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote(message.into())
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }
}

impl From<wm_store::Error> for Error {
    fn from(err: wm_store::Error) -> Self {
        Self::storage(&err)
    }
}

/// Result type alias using wm-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
