//! # Column Type Mapping
//!
//! A [`ColumnMapping`] decides, per logical type, which database column
//! type a derived column declares and how an extracted [`FieldValue`]
//! becomes the [`StoredValue`] actually bound into statements. Mappings
//! are resolved once per table at construction and cached inside the
//! table specification; they hold no mutable state and are shared freely
//! across tables and threads.
//!
//! ## Default rules
//!
//! | Logical | Column | Stored as |
//! |---------|--------|-----------|
//! | Boolean | BOOLEAN | bool |
//! | Int32 | INT | integer |
//! | Int64 | BIGINT | integer |
//! | Text255 | VARCHAR(255) | text |
//! | Text | TEXT | text |
//! | Bytes | BLOB | byte array |
//! | Enum | INT | ordinal integer |
//! | Message | TEXT | canonical compact JSON |
//! | Timestamp | BIGINT | nanosecond count |
//! | Float64 | rejected at resolution time |
//!
//! Floating point deliberately has no default rule; resolving it fails
//! with [`ConfigurationError::UnsupportedColumnType`] when the table is
//! built, not when a record is written. A [`CustomMapping`] can supply a
//! rule for it (or override any other rule) per table.
//!
//! ## Dialects
//!
//! [`TypeProfile`] is the small explicit per-product DDL name table:
//! a MySQL-flavored base, a PostgreSQL variant (BYTEA), and a SQLite
//! variant for the bundled backend. `TypeProfile::select` picks by
//! product name and falls back to the MySQL table for unknown products.

use crate::error::ConfigurationError;
use crate::types::{ColumnType, FieldValue, LogicalType, StoredValue};
use eyre::{Result, WrapErr};
use hashbrown::HashMap;
use std::sync::Arc;

/// Converts one extracted value into its bound form. Conversions accept
/// `FieldValue::Null` and pass it through as `StoredValue::Null`.
pub type Converter = Arc<dyn Fn(FieldValue) -> Result<StoredValue> + Send + Sync>;

/// Strategy turning logical column types into declared types plus value
/// conversions. Implementations must be pure; resolution happens once
/// per table and the results are cached.
pub trait ColumnMapping: Send + Sync {
    /// The column type to declare for this logical type, or a
    /// configuration error if the mapping has no rule for it.
    fn column_type(&self, logical: LogicalType) -> Result<ColumnType>;

    /// The conversion to apply to every extracted value of this logical
    /// type. Resolution fails for unmapped types.
    fn converter(&self, logical: LogicalType) -> Result<Converter>;

    /// The stored form of an absent value.
    fn convert_null(&self) -> StoredValue {
        StoredValue::Null
    }
}

fn mismatch(expected: LogicalType, got: &FieldValue) -> eyre::Report {
    eyre::eyre!(
        "column converter for {} received a {} value",
        expected.name(),
        got.kind_name()
    )
}

/// The built-in mapping. See the module table for its rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultMapping;

impl DefaultMapping {
    pub fn new() -> Self {
        DefaultMapping
    }
}

impl ColumnMapping for DefaultMapping {
    fn column_type(&self, logical: LogicalType) -> Result<ColumnType> {
        match logical {
            LogicalType::Boolean => Ok(ColumnType::Boolean),
            LogicalType::Int32 => Ok(ColumnType::Int),
            LogicalType::Int64 => Ok(ColumnType::Long),
            LogicalType::Text255 => Ok(ColumnType::String255),
            LogicalType::Text => Ok(ColumnType::String),
            LogicalType::Bytes => Ok(ColumnType::ByteArray),
            LogicalType::Enum => Ok(ColumnType::Int),
            LogicalType::Message => Ok(ColumnType::String),
            LogicalType::Timestamp => Ok(ColumnType::Long),
            LogicalType::Float64 => {
                Err(ConfigurationError::UnsupportedColumnType { logical: logical.name() }.into())
            }
        }
    }

    fn converter(&self, logical: LogicalType) -> Result<Converter> {
        let converter: Converter = match logical {
            LogicalType::Boolean => Arc::new(|v| match v {
                FieldValue::Bool(b) => Ok(StoredValue::Bool(b)),
                FieldValue::Null => Ok(StoredValue::Null),
                other => Err(mismatch(LogicalType::Boolean, &other)),
            }),
            LogicalType::Int32 => Arc::new(|v| match v {
                FieldValue::I32(n) => Ok(StoredValue::Int(i64::from(n))),
                FieldValue::Null => Ok(StoredValue::Null),
                other => Err(mismatch(LogicalType::Int32, &other)),
            }),
            LogicalType::Int64 => Arc::new(|v| match v {
                FieldValue::I64(n) => Ok(StoredValue::Int(n)),
                FieldValue::Null => Ok(StoredValue::Null),
                other => Err(mismatch(LogicalType::Int64, &other)),
            }),
            LogicalType::Text255 | LogicalType::Text => Arc::new(move |v| match v {
                FieldValue::Text(s) => Ok(StoredValue::Text(s)),
                FieldValue::Null => Ok(StoredValue::Null),
                other => Err(mismatch(logical, &other)),
            }),
            LogicalType::Bytes => Arc::new(|v| match v {
                FieldValue::Bytes(b) => Ok(StoredValue::Bytes(b)),
                FieldValue::Null => Ok(StoredValue::Null),
                other => Err(mismatch(LogicalType::Bytes, &other)),
            }),
            LogicalType::Enum => Arc::new(|v| match v {
                FieldValue::Enum(ordinal) => Ok(StoredValue::Int(i64::from(ordinal))),
                FieldValue::Null => Ok(StoredValue::Null),
                other => Err(mismatch(LogicalType::Enum, &other)),
            }),
            LogicalType::Message => Arc::new(|v| match v {
                FieldValue::Message(json) => {
                    let text = serde_json::to_string(&json)
                        .wrap_err("serializing message column to canonical text")?;
                    Ok(StoredValue::Text(text))
                }
                FieldValue::Null => Ok(StoredValue::Null),
                other => Err(mismatch(LogicalType::Message, &other)),
            }),
            LogicalType::Timestamp => Arc::new(|v| match v {
                FieldValue::Time(ts) => Ok(StoredValue::Int(ts.to_nanos())),
                FieldValue::Null => Ok(StoredValue::Null),
                other => Err(mismatch(LogicalType::Timestamp, &other)),
            }),
            LogicalType::Float64 => {
                return Err(
                    ConfigurationError::UnsupportedColumnType { logical: logical.name() }.into()
                )
            }
        };
        Ok(converter)
    }
}

/// A base mapping plus per-type override rules. Overrides win over the
/// base; unlisted types fall through. Built once, immutable afterwards.
pub struct CustomMapping {
    base: Arc<dyn ColumnMapping>,
    types: HashMap<LogicalType, ColumnType>,
    converters: HashMap<LogicalType, Converter>,
}

impl CustomMapping {
    pub fn over(base: Arc<dyn ColumnMapping>) -> Self {
        CustomMapping { base, types: HashMap::new(), converters: HashMap::new() }
    }

    /// Installs a rule for one logical type. Replaces a prior rule for
    /// the same type.
    pub fn with_rule(
        mut self,
        logical: LogicalType,
        column_type: ColumnType,
        converter: impl Fn(FieldValue) -> Result<StoredValue> + Send + Sync + 'static,
    ) -> Self {
        self.types.insert(logical, column_type);
        self.converters.insert(logical, Arc::new(converter));
        self
    }
}

impl ColumnMapping for CustomMapping {
    fn column_type(&self, logical: LogicalType) -> Result<ColumnType> {
        match self.types.get(&logical) {
            Some(ty) => Ok(*ty),
            None => self.base.column_type(logical),
        }
    }

    fn converter(&self, logical: LogicalType) -> Result<Converter> {
        match self.converters.get(&logical) {
            Some(conv) => Ok(Arc::clone(conv)),
            None => self.base.converter(logical),
        }
    }
}

/// Per-dialect DDL spellings of the declarable column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeProfile {
    name: &'static str,
    boolean: &'static str,
    int: &'static str,
    long: &'static str,
    string_255: &'static str,
    string: &'static str,
    byte_array: &'static str,
}

impl TypeProfile {
    /// The base table, shared by MySQL 5.7+ and used as the fallback for
    /// unrecognized products.
    pub fn mysql() -> Self {
        TypeProfile {
            name: "mysql",
            boolean: "BOOLEAN",
            int: "INT",
            long: "BIGINT",
            string_255: "VARCHAR(255)",
            string: "TEXT",
            byte_array: "BLOB",
        }
    }

    /// PostgreSQL 10.1+: identical to the base except byte arrays.
    pub fn postgres() -> Self {
        TypeProfile { name: "postgres", byte_array: "BYTEA", ..Self::mysql() }
    }

    /// SQLite accepts the generic names but resolves everything through
    /// affinity; INTEGER covers both integer widths.
    pub fn sqlite() -> Self {
        TypeProfile {
            name: "sqlite",
            boolean: "BOOLEAN",
            int: "INTEGER",
            long: "INTEGER",
            string_255: "TEXT",
            string: "TEXT",
            byte_array: "BLOB",
        }
    }

    /// Picks a profile by database product name, MySQL table as the
    /// fallback for products without a dedicated entry.
    pub fn select(product: &str, major: u32, minor: u32) -> Self {
        let product = product.to_ascii_lowercase();
        if product.contains("postgres") && (major, minor) >= (10, 1) {
            Self::postgres()
        } else if product.contains("sqlite") {
            Self::sqlite()
        } else {
            Self::mysql()
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn ddl_name(&self, column_type: ColumnType) -> &'static str {
        match column_type {
            ColumnType::Boolean => self.boolean,
            ColumnType::Int => self.int,
            ColumnType::Long => self.long,
            ColumnType::String255 => self.string_255,
            ColumnType::String => self.string,
            ColumnType::ByteArray => self.byte_array,
        }
    }
}

impl Default for TypeProfile {
    fn default() -> Self {
        Self::sqlite()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Timestamp;

    #[test]
    fn test_default_mapping_covers_scalar_kinds() {
        let mapping = DefaultMapping::new();
        assert_eq!(mapping.column_type(LogicalType::Boolean).unwrap(), ColumnType::Boolean);
        assert_eq!(mapping.column_type(LogicalType::Int32).unwrap(), ColumnType::Int);
        assert_eq!(mapping.column_type(LogicalType::Int64).unwrap(), ColumnType::Long);
        assert_eq!(mapping.column_type(LogicalType::Text255).unwrap(), ColumnType::String255);
        assert_eq!(mapping.column_type(LogicalType::Bytes).unwrap(), ColumnType::ByteArray);
        assert_eq!(mapping.column_type(LogicalType::Enum).unwrap(), ColumnType::Int);
        assert_eq!(mapping.column_type(LogicalType::Message).unwrap(), ColumnType::String);
        assert_eq!(mapping.column_type(LogicalType::Timestamp).unwrap(), ColumnType::Long);
    }

    #[test]
    fn test_float_fails_at_resolution_time() {
        let mapping = DefaultMapping::new();
        let err = mapping.column_type(LogicalType::Float64).unwrap_err();
        let config = err.downcast_ref::<crate::error::ConfigurationError>();
        assert!(matches!(
            config,
            Some(crate::error::ConfigurationError::UnsupportedColumnType { logical: "Float64" })
        ));
        assert!(mapping.converter(LogicalType::Float64).is_err());
    }

    #[test]
    fn test_converters_produce_bound_values() {
        let mapping = DefaultMapping::new();
        let conv = mapping.converter(LogicalType::Enum).unwrap();
        assert_eq!(conv(FieldValue::Enum(3)).unwrap(), StoredValue::Int(3));

        let conv = mapping.converter(LogicalType::Timestamp).unwrap();
        let ts = Timestamp::new(1, 500);
        assert_eq!(conv(FieldValue::Time(ts)).unwrap(), StoredValue::Int(1_000_000_500));

        let conv = mapping.converter(LogicalType::Message).unwrap();
        let json = serde_json::json!({"a": 1});
        assert_eq!(
            conv(FieldValue::Message(json)).unwrap(),
            StoredValue::Text("{\"a\":1}".into())
        );
    }

    #[test]
    fn test_converters_pass_null_through_and_reject_mismatches() {
        let mapping = DefaultMapping::new();
        let conv = mapping.converter(LogicalType::Int32).unwrap();
        assert_eq!(conv(FieldValue::Null).unwrap(), StoredValue::Null);
        assert!(conv(FieldValue::Text("7".into())).is_err());
    }

    #[test]
    fn test_custom_rules_win_over_base() {
        let custom = CustomMapping::over(Arc::new(DefaultMapping::new())).with_rule(
            LogicalType::Float64,
            ColumnType::String,
            |v| match v {
                FieldValue::F64(x) => Ok(StoredValue::Text(format!("{x}"))),
                FieldValue::Null => Ok(StoredValue::Null),
                other => eyre::bail!("expected F64, got {}", other.kind_name()),
            },
        );
        assert_eq!(custom.column_type(LogicalType::Float64).unwrap(), ColumnType::String);
        let conv = custom.converter(LogicalType::Float64).unwrap();
        assert_eq!(conv(FieldValue::F64(1.5)).unwrap(), StoredValue::Text("1.5".into()));
        assert_eq!(custom.column_type(LogicalType::Int32).unwrap(), ColumnType::Int);
    }

    #[test]
    fn test_profile_selection_and_fallback() {
        assert_eq!(TypeProfile::select("PostgreSQL", 10, 1).name(), "postgres");
        assert_eq!(TypeProfile::select("PostgreSQL", 9, 6).name(), "mysql");
        assert_eq!(TypeProfile::select("SQLite", 3, 40).name(), "sqlite");
        assert_eq!(TypeProfile::select("CockroachDB", 23, 1).name(), "mysql");
    }

    #[test]
    fn test_postgres_renders_bytea() {
        assert_eq!(TypeProfile::postgres().ddl_name(ColumnType::ByteArray), "BYTEA");
        assert_eq!(TypeProfile::mysql().ddl_name(ColumnType::ByteArray), "BLOB");
        assert_eq!(TypeProfile::mysql().ddl_name(ColumnType::String255), "VARCHAR(255)");
    }
}
