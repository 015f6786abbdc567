//! Value types carried by read responses and data-change notifications.

use bytes::Bytes;
use chrono::{DateTime, Utc};

use super::StatusCode;

/// OPC UA variant.
///
/// Only the built-in scalar kinds the client can classify are spelled out;
/// arrays keep their elements so that a double array is never mistaken for
/// a scalar double.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Variant {
    /// No value
    #[default]
    Empty,
    Boolean(bool),
    SByte(i8),
    Byte(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float(f32),
    Double(f64),
    String(String),
    DateTime(DateTime<Utc>),
    ByteString(Bytes),
    Array(Vec<Variant>),
}

impl Variant {
    /// OPC UA built-in type name.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Empty => "Null",
            Self::Boolean(_) => "Boolean",
            Self::SByte(_) => "SByte",
            Self::Byte(_) => "Byte",
            Self::Int16(_) => "Int16",
            Self::UInt16(_) => "UInt16",
            Self::Int32(_) => "Int32",
            Self::UInt32(_) => "UInt32",
            Self::Int64(_) => "Int64",
            Self::UInt64(_) => "UInt64",
            Self::Float(_) => "Float",
            Self::Double(_) => "Double",
            Self::String(_) => "String",
            Self::DateTime(_) => "DateTime",
            Self::ByteString(_) => "ByteString",
            Self::Array(_) => "Array",
        }
    }

    /// Check if the variant holds a scalar (non-empty, non-array) value.
    #[inline]
    pub const fn is_scalar(&self) -> bool {
        !matches!(self, Self::Empty | Self::Array(_))
    }
}

impl From<f64> for Variant {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<f32> for Variant {
    fn from(value: f32) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for Variant {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<i32> for Variant {
    fn from(value: i32) -> Self {
        Self::Int32(value)
    }
}

impl From<&str> for Variant {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

/// Value with status and timestamps, as delivered by the server.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataValue {
    /// The value
    pub value: Variant,
    /// Status of the value
    pub status: StatusCode,
    /// Timestamp assigned by the data source
    pub source_timestamp: Option<DateTime<Utc>>,
    /// Timestamp assigned by the server
    pub server_timestamp: Option<DateTime<Utc>>,
}

impl DataValue {
    /// Create a good data value without timestamps.
    pub fn new(value: impl Into<Variant>) -> Self {
        Self {
            value: value.into(),
            ..Default::default()
        }
    }

    /// Set the source timestamp.
    pub fn with_source_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.source_timestamp = Some(timestamp);
        self
    }

    /// Set the server timestamp.
    pub fn with_server_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.server_timestamp = Some(timestamp);
        self
    }

    /// Set the status.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Best available timestamp: source, then server.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.source_timestamp.or(self.server_timestamp)
    }
}
