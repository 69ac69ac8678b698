//! # Value and Column Types
//!
//! Three layers of typing run through the crate:
//!
//! | Layer | Type | Where it lives |
//! |-------|------|----------------|
//! | Logical | [`LogicalType`], [`FieldValue`] | column declarations, extractor output |
//! | Declared | [`ColumnType`] | DDL, resolved once per table |
//! | Bound | [`StoredValue`] | statement parameters and result rows |
//!
//! A column mapping (see `mapping`) turns a logical type into a declared
//! column type plus a conversion from [`FieldValue`] to [`StoredValue`].
//! Accessors on [`StoredValue`] fail with an error on kind mismatch
//! instead of panicking; drivers with loose affinity (SQLite) may return
//! integers for boolean columns, which `as_bool` tolerates.

use eyre::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Database column kinds this crate can declare. The per-dialect DDL
/// spelling of each kind lives in `mapping::TypeProfile`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Boolean,
    Int,
    Long,
    String255,
    String,
    ByteArray,
}

/// Logical kind of a column, used to resolve a mapping rule. `Float64`
/// has no default rule and exists so resolution can reject it early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalType {
    Boolean,
    Int32,
    Int64,
    Text255,
    Text,
    Bytes,
    Enum,
    Message,
    Timestamp,
    Float64,
}

impl LogicalType {
    pub fn name(self) -> &'static str {
        match self {
            LogicalType::Boolean => "Boolean",
            LogicalType::Int32 => "Int32",
            LogicalType::Int64 => "Int64",
            LogicalType::Text255 => "Text255",
            LogicalType::Text => "Text",
            LogicalType::Bytes => "Bytes",
            LogicalType::Enum => "Enum",
            LogicalType::Message => "Message",
            LogicalType::Timestamp => "Timestamp",
            LogicalType::Float64 => "Float64",
        }
    }
}

/// A point in time as whole seconds plus a nanosecond remainder. Stored
/// as a single nanosecond count in a `Long` column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanos: i32,
}

impl Timestamp {
    pub fn new(seconds: i64, nanos: i32) -> Self {
        Timestamp { seconds, nanos }
    }

    /// Collapses to a single nanosecond count. Callers own the range;
    /// values beyond ~292 years from the epoch wrap.
    pub fn to_nanos(self) -> i64 {
        self.seconds.wrapping_mul(1_000_000_000).wrapping_add(self.nanos as i64)
    }
}

/// Runtime value produced by a column extractor, before mapping.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    I32(i32),
    I64(i64),
    Text(String),
    Bytes(Vec<u8>),
    /// Enumerated value as its ordinal.
    Enum(i32),
    /// Nested structured message, stored as canonical JSON text.
    Message(serde_json::Value),
    Time(Timestamp),
    F64(f64),
}

impl FieldValue {
    pub fn kind_name(&self) -> &'static str {
        match self {
            FieldValue::Null => "Null",
            FieldValue::Bool(_) => "Bool",
            FieldValue::I32(_) => "I32",
            FieldValue::I64(_) => "I64",
            FieldValue::Text(_) => "Text",
            FieldValue::Bytes(_) => "Bytes",
            FieldValue::Enum(_) => "Enum",
            FieldValue::Message(_) => "Message",
            FieldValue::Time(_) => "Time",
            FieldValue::F64(_) => "F64",
        }
    }
}

/// The tagged union actually bound into statements and read back from
/// result rows.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredValue {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    Bytes(Vec<u8>),
}

impl StoredValue {
    pub fn kind_name(&self) -> &'static str {
        match self {
            StoredValue::Null => "Null",
            StoredValue::Bool(_) => "Bool",
            StoredValue::Int(_) => "Int",
            StoredValue::Text(_) => "Text",
            StoredValue::Bytes(_) => "Bytes",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, StoredValue::Null)
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            StoredValue::Bool(b) => Ok(*b),
            StoredValue::Int(0) => Ok(false),
            StoredValue::Int(1) => Ok(true),
            other => bail!("expected a boolean column value, got {other}"),
        }
    }

    pub fn as_i64(&self) -> Result<i64> {
        match self {
            StoredValue::Int(v) => Ok(*v),
            other => bail!("expected an integer column value, got {other}"),
        }
    }

    pub fn as_i32(&self) -> Result<i32> {
        let wide = self.as_i64()?;
        i32::try_from(wide).map_err(|_| eyre::eyre!("integer column value {wide} overflows i32"))
    }

    pub fn as_text(&self) -> Result<&str> {
        match self {
            StoredValue::Text(s) => Ok(s),
            other => bail!("expected a text column value, got {other}"),
        }
    }

    pub fn as_bytes(&self) -> Result<&[u8]> {
        match self {
            StoredValue::Bytes(b) => Ok(b),
            other => bail!("expected a byte-array column value, got {other}"),
        }
    }

    pub fn into_text(self) -> Result<String> {
        match self {
            StoredValue::Text(s) => Ok(s),
            other => bail!("expected a text column value, got {other}"),
        }
    }

    pub fn into_bytes(self) -> Result<Vec<u8>> {
        match self {
            StoredValue::Bytes(b) => Ok(b),
            other => bail!("expected a byte-array column value, got {other}"),
        }
    }
}

impl fmt::Display for StoredValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoredValue::Null => write!(f, "NULL"),
            StoredValue::Bool(b) => write!(f, "{b}"),
            StoredValue::Int(v) => write!(f, "{v}"),
            StoredValue::Text(s) => write!(f, "'{s}'"),
            StoredValue::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bool_accessor_tolerates_integer_affinity() {
        assert!(StoredValue::Bool(true).as_bool().unwrap());
        assert!(StoredValue::Int(1).as_bool().unwrap());
        assert!(!StoredValue::Int(0).as_bool().unwrap());
        assert!(StoredValue::Int(2).as_bool().is_err());
        assert!(StoredValue::Text("true".into()).as_bool().is_err());
    }

    #[test]
    fn test_accessors_fail_on_kind_mismatch() {
        assert!(StoredValue::Text("7".into()).as_i64().is_err());
        assert!(StoredValue::Int(7).as_text().is_err());
        assert!(StoredValue::Null.as_bytes().is_err());
    }

    #[test]
    fn test_i32_accessor_checks_range() {
        assert_eq!(StoredValue::Int(42).as_i32().unwrap(), 42);
        assert!(StoredValue::Int(i64::from(i32::MAX) + 1).as_i32().is_err());
    }

    #[test]
    fn test_timestamp_to_nanos() {
        let ts = Timestamp::new(2, 5);
        assert_eq!(ts.to_nanos(), 2_000_000_005);
        assert_eq!(Timestamp::default().to_nanos(), 0);
    }
}
