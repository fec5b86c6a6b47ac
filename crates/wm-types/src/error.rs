//! Error types for data parsing in wm-types.

use thiserror::Error;

/// Errors that can occur when converting features, geometry blobs and
/// measurement sets into the typed data model.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// Generic invalid data.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Not enough bytes to decode a geometry blob.
    #[error("Insufficient bytes: expected {expected}, got {actual}")]
    InsufficientBytes {
        /// Number of bytes required.
        expected: usize,
        /// Number of bytes available.
        actual: usize,
    },

    /// Geometry blob carries an unknown tag byte.
    #[error("Unknown geometry tag: 0x{0:02X}")]
    UnknownGeometryTag(u8),

    /// A required attribute is missing from a feature.
    #[error("Missing field: {0}")]
    MissingField(String),

    /// An attribute exists but holds a value of the wrong type.
    #[error("Field '{field}' has wrong type (expected {expected})")]
    WrongFieldType {
        /// Attribute name.
        field: String,
        /// Expected type description.
        expected: &'static str,
    },

    /// Observations carry between one and three raw measurements.
    #[error("Expected 1 to 3 measurements, got {0}")]
    MeasurementCount(usize),

    /// A measurement is NaN or infinite.
    #[error("Measurement {index} is not a finite number")]
    NonFiniteMeasurement {
        /// Position of the offending measurement.
        index: usize,
    },

    /// Unknown enumeration label (status, kind, ...).
    #[error("Unknown {kind} value: {value}")]
    UnknownVariant {
        /// Which enumeration was being parsed.
        kind: &'static str,
        /// The label that was not recognised.
        value: String,
    },
}

impl ParseError {
    /// Create an invalid data error with a custom message.
    pub fn invalid_data(message: impl Into<String>) -> Self {
        ParseError::InvalidData(message.into())
    }
}

/// Result type alias using wm-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
