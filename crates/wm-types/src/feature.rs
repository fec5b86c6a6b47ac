//! Feature tables: the remote dataset shape and its column type system.
//!
//! A [`FeatureTable`] is what the remote dataset adapter hands back. Each
//! field carries a [`FieldType`], which maps onto a SQLite storage class
//! through a fixed conversion table:
//!
//! | FieldType | SQL |
//! |-----------|-----|
//! | `Int16`, `Int32`, `Int64`, `Oid` | `INTEGER` |
//! | `Float32`, `Float64` | `REAL` |
//! | `Date`, `Text`, `Guid` | `TEXT` |
//! | `Blob`, `Geometry` | `BLOB` |

use std::collections::BTreeMap;
use std::fmt;

use time::OffsetDateTime;
use uuid::Uuid;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{ParseError, ParseResult};
use crate::geometry::Geometry;

/// Column type of a feature table field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FieldType {
    /// Object id assigned by the provider.
    Oid,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    /// Timestamp, stored as RFC 3339 text.
    Date,
    Text,
    /// Globally unique id, stored hyphenated.
    Guid,
    Blob,
    /// Encoded [`Geometry`].
    Geometry,
}

/// SQLite storage class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    Integer,
    Real,
    Text,
    Blob,
}

impl SqlType {
    /// SQL keyword for the storage class.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            SqlType::Integer => "INTEGER",
            SqlType::Real => "REAL",
            SqlType::Text => "TEXT",
            SqlType::Blob => "BLOB",
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FieldType {
    /// Storage class used for this field in the local cache.
    ///
    /// ```
    /// use wm_types::{FieldType, SqlType};
    ///
    /// assert_eq!(FieldType::Int16.sql_type(), SqlType::Integer);
    /// assert_eq!(FieldType::Float32.sql_type(), SqlType::Real);
    /// assert_eq!(FieldType::Guid.sql_type(), SqlType::Text);
    /// assert_eq!(FieldType::Geometry.sql_type(), SqlType::Blob);
    /// ```
    #[must_use]
    pub const fn sql_type(self) -> SqlType {
        match self {
            FieldType::Oid | FieldType::Int16 | FieldType::Int32 | FieldType::Int64 => {
                SqlType::Integer
            }
            FieldType::Float32 | FieldType::Float64 => SqlType::Real,
            FieldType::Date | FieldType::Text | FieldType::Guid => SqlType::Text,
            FieldType::Blob | FieldType::Geometry => SqlType::Blob,
        }
    }
}

/// Name and type of one field.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FieldDef {
    pub name: String,
    pub field_type: FieldType,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }
}

/// A single attribute value.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum FieldValue {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    Date(OffsetDateTime),
    Guid(Uuid),
    Blob(Vec<u8>),
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

impl From<OffsetDateTime> for FieldValue {
    fn from(v: OffsetDateTime) -> Self {
        FieldValue::Date(v)
    }
}

impl From<Uuid> for FieldValue {
    fn from(v: Uuid) -> Self {
        FieldValue::Guid(v)
    }
}

/// One row of a remote feature table.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Feature {
    /// Provider-assigned object id.
    pub object_id: i64,
    #[cfg_attr(feature = "serde", serde(default))]
    pub geometry: Option<Geometry>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub attributes: BTreeMap<String, FieldValue>,
}

impl Feature {
    /// A feature with no attributes.
    pub fn new(object_id: i64, geometry: Option<Geometry>) -> Self {
        Self {
            object_id,
            geometry,
            attributes: BTreeMap::new(),
        }
    }

    /// Builder-style attribute setter.
    #[must_use]
    pub fn with(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.attributes.insert(name.to_string(), value.into());
        self
    }

    fn field(&self, name: &str) -> ParseResult<&FieldValue> {
        self.attributes
            .get(name)
            .ok_or_else(|| ParseError::MissingField(name.to_string()))
    }

    /// Integer attribute.
    pub fn get_i64(&self, name: &str) -> ParseResult<i64> {
        match self.field(name)? {
            FieldValue::Int(v) => Ok(*v),
            _ => Err(ParseError::WrongFieldType {
                field: name.to_string(),
                expected: "integer",
            }),
        }
    }

    /// Numeric attribute; integers are widened.
    pub fn get_f64(&self, name: &str) -> ParseResult<f64> {
        match self.field(name)? {
            FieldValue::Float(v) => Ok(*v),
            FieldValue::Int(v) => Ok(*v as f64),
            _ => Err(ParseError::WrongFieldType {
                field: name.to_string(),
                expected: "number",
            }),
        }
    }

    /// Optional numeric attribute; missing and null both yield `None`.
    pub fn get_opt_f64(&self, name: &str) -> ParseResult<Option<f64>> {
        match self.attributes.get(name) {
            None | Some(FieldValue::Null) => Ok(None),
            Some(_) => self.get_f64(name).map(Some),
        }
    }

    /// Text attribute.
    pub fn get_str(&self, name: &str) -> ParseResult<&str> {
        match self.field(name)? {
            FieldValue::Text(v) => Ok(v),
            _ => Err(ParseError::WrongFieldType {
                field: name.to_string(),
                expected: "text",
            }),
        }
    }

    /// Timestamp attribute; RFC 3339 text is accepted too.
    pub fn get_date(&self, name: &str) -> ParseResult<OffsetDateTime> {
        match self.field(name)? {
            FieldValue::Date(v) => Ok(*v),
            FieldValue::Text(s) => OffsetDateTime::parse(
                s,
                &time::format_description::well_known::Rfc3339,
            )
            .map_err(|e| ParseError::invalid_data(format!("{name}: {e}"))),
            _ => Err(ParseError::WrongFieldType {
                field: name.to_string(),
                expected: "date",
            }),
        }
    }

    /// GUID attribute; hyphenated text is accepted too.
    pub fn get_guid(&self, name: &str) -> ParseResult<Uuid> {
        match self.field(name)? {
            FieldValue::Guid(v) => Ok(*v),
            FieldValue::Text(s) => Uuid::parse_str(s.trim_matches(['{', '}']))
                .map_err(|e| ParseError::invalid_data(format!("{name}: {e}"))),
            _ => Err(ParseError::WrongFieldType {
                field: name.to_string(),
                expected: "guid",
            }),
        }
    }
}

/// A named feature collection with its schema.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FeatureTable {
    pub name: String,
    pub fields: Vec<FieldDef>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub features: Vec<Feature>,
}

impl FeatureTable {
    pub fn new(name: impl Into<String>, fields: Vec<FieldDef>) -> Self {
        Self {
            name: name.into(),
            fields,
            features: Vec::new(),
        }
    }

    /// Look up a feature by object id.
    #[must_use]
    pub fn feature(&self, object_id: i64) -> Option<&Feature> {
        self.features.iter().find(|f| f.object_id == object_id)
    }

    /// Number of features.
    #[must_use]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// Whether the table has no features.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}
