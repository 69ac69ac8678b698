//! # Table Specification
//!
//! A [`TableSpec`] is the immutable binding of a record type to its
//! table: name, identifier kind, payload column, and the ordered derived
//! columns with their mapping resolved. Record types declare their
//! schema statically through [`RecordType`]; nothing is discovered at
//! runtime.
//!
//! Specs are built through a [`SpecRegistry`], which memoizes one spec
//! per record type so every table engine for the same type shares a
//! single schema. Building a spec never touches the database; only the
//! engine's `create_if_missing` does.
//!
//! ## Table names
//!
//! The default name is derived from the type's qualified name: lowered,
//! with `.`, `::` and `$` separators replaced by `_`. Auxiliary tables
//! append a role postfix (`_visibility`, `_event_count`). An explicit
//! per-type override from `StorageConfig` wins over derivation. Derived
//! and overridden names alike must match `[a-z_][a-z0-9_]*`.

use crate::config::StorageConfig;
use crate::error::ConfigurationError;
use crate::id::IdKind;
use crate::mapping::{ColumnMapping, Converter};
use crate::types::{ColumnType, FieldValue, LogicalType, StoredValue};
use eyre::Result;
use hashbrown::{HashMap, HashSet};
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

/// Name of the identifier column every table carries.
pub const ID_COLUMN: &str = "id";
/// Name of the opaque payload column on record tables.
pub const PAYLOAD_COLUMN: &str = "payload";

pub(crate) const VISIBILITY_POSTFIX: &str = "_visibility";
pub(crate) const EVENT_COUNT_POSTFIX: &str = "_event_count";

/// One derived column: a name, a logical type, and the extraction from
/// the record. Declared once at table construction, immutable after.
pub struct ColumnDef<R> {
    name: String,
    logical: LogicalType,
    nullable: bool,
    ddl_default: Option<&'static str>,
    extract: Arc<dyn Fn(&R) -> FieldValue + Send + Sync>,
}

impl<R> ColumnDef<R> {
    pub fn new(
        name: impl Into<String>,
        logical: LogicalType,
        extract: impl Fn(&R) -> FieldValue + Send + Sync + 'static,
    ) -> Self {
        ColumnDef {
            name: name.into(),
            logical,
            nullable: false,
            ddl_default: None,
            extract: Arc::new(extract),
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// DDL default literal, rendered verbatim into CREATE TABLE.
    pub fn with_default(mut self, literal: &'static str) -> Self {
        self.ddl_default = Some(literal);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn logical(&self) -> LogicalType {
        self.logical
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn ddl_default(&self) -> Option<&'static str> {
        self.ddl_default
    }

    pub fn extract(&self, record: &R) -> FieldValue {
        (self.extract)(record)
    }
}

impl<R> Clone for ColumnDef<R> {
    fn clone(&self) -> Self {
        ColumnDef {
            name: self.name.clone(),
            logical: self.logical,
            nullable: self.nullable,
            ddl_default: self.ddl_default,
            extract: Arc::clone(&self.extract),
        }
    }
}

impl<R> fmt::Debug for ColumnDef<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnDef")
            .field("name", &self.name)
            .field("logical", &self.logical)
            .field("nullable", &self.nullable)
            .finish()
    }
}

/// Static schema declaration for a storable record type.
pub trait RecordType: Sized + Send + Sync + 'static {
    /// Qualified type name the default table name derives from.
    fn qualified_name() -> &'static str;

    /// Kind of identifier this type's tables are keyed by.
    fn id_kind() -> IdKind;

    /// Derived columns in declaration order. May be empty.
    fn columns() -> Vec<ColumnDef<Self>>;
}

/// A column with its mapping resolved: declared type plus conversion.
pub struct ResolvedColumn<R> {
    def: ColumnDef<R>,
    column_type: ColumnType,
    convert: Converter,
}

impl<R> ResolvedColumn<R> {
    pub fn name(&self) -> &str {
        self.def.name()
    }

    pub fn logical(&self) -> LogicalType {
        self.def.logical()
    }

    pub fn column_type(&self) -> ColumnType {
        self.column_type
    }

    pub fn is_nullable(&self) -> bool {
        self.def.is_nullable()
    }

    pub fn ddl_default(&self) -> Option<&'static str> {
        self.def.ddl_default()
    }

    /// Extracts and converts in one step: the value bound for this
    /// column when the record is written.
    pub fn stored_value(&self, record: &R) -> Result<StoredValue> {
        (self.convert)(self.def.extract(record))
    }
}

impl<R> fmt::Debug for ResolvedColumn<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedColumn")
            .field("name", &self.def.name())
            .field("column_type", &self.column_type)
            .finish()
    }
}

/// The immutable binding of a record type to its table.
pub struct TableSpec<R: RecordType> {
    table_name: String,
    id_kind: IdKind,
    columns: Vec<ResolvedColumn<R>>,
    mapping: Arc<dyn ColumnMapping>,
}

impl<R: RecordType> TableSpec<R> {
    /// Resolves the spec against a configuration: picks the table name
    /// and mapping, then resolves every declared column. Unmappable
    /// column types fail here, before any database work.
    pub fn resolve(config: &StorageConfig) -> Result<Self> {
        let type_id = TypeId::of::<R>();
        let table_name = match config.table_name_override(type_id) {
            Some(name) => {
                validate_table_name(name)?;
                name.to_string()
            }
            None => derived_table_name(R::qualified_name())?,
        };
        let mapping = config
            .mapping_override(type_id)
            .unwrap_or_else(|| config.default_mapping())
            .clone();

        let defs = R::columns();
        let mut names: HashSet<String> = HashSet::with_capacity(defs.len() + 2);
        names.insert(ID_COLUMN.to_string());
        names.insert(PAYLOAD_COLUMN.to_string());
        let mut columns = Vec::with_capacity(defs.len());
        for def in defs {
            validate_column_name(def.name())?;
            if !names.insert(def.name().to_string()) {
                return Err(ConfigurationError::DuplicateColumn {
                    table: table_name,
                    column: def.name().to_string(),
                }
                .into());
            }
            let column_type = mapping.column_type(def.logical())?;
            let convert = mapping.converter(def.logical())?;
            columns.push(ResolvedColumn { def, column_type, convert });
        }

        Ok(TableSpec { table_name, id_kind: R::id_kind(), columns, mapping })
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn id_kind(&self) -> IdKind {
        self.id_kind
    }

    pub fn columns(&self) -> &[ResolvedColumn<R>] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ResolvedColumn<R>> {
        self.columns.iter().find(|c| c.name() == name)
    }

    pub fn mapping(&self) -> &Arc<dyn ColumnMapping> {
        &self.mapping
    }
}

impl<R: RecordType> fmt::Debug for TableSpec<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableSpec")
            .field("table_name", &self.table_name)
            .field("id_kind", &self.id_kind)
            .field("columns", &self.columns)
            .finish()
    }
}

/// Derives the default table name from a qualified type name.
pub fn derived_table_name(qualified: &str) -> Result<String> {
    let name = qualified.to_ascii_lowercase().replace("::", "_").replace(['.', '$'], "_");
    validate_table_name(&name)?;
    Ok(name)
}

pub(crate) fn validate_table_name(name: &str) -> Result<()> {
    if !is_sql_name(name) {
        return Err(ConfigurationError::InvalidTableName { name: name.to_string() }.into());
    }
    Ok(())
}

pub(crate) fn validate_column_name(name: &str) -> Result<()> {
    if !is_sql_name(name) {
        return Err(ConfigurationError::InvalidColumnName { name: name.to_string() }.into());
    }
    Ok(())
}

/// Names land verbatim in composed SQL, so only `[a-z_][a-z0-9_]*`
/// passes.
fn is_sql_name(name: &str) -> bool {
    let mut chars = name.chars();
    let first_ok = matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_');
    first_ok && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

pub(crate) fn with_postfix(base: &str, postfix: &str) -> String {
    format!("{base}{postfix}")
}

/// Frozen configuration plus the per-type spec memo. Share one registry
/// per process so every engine for a record type sees the same spec.
pub struct SpecRegistry {
    config: StorageConfig,
    specs: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl SpecRegistry {
    pub fn new(config: StorageConfig) -> Self {
        SpecRegistry { config, specs: RwLock::new(HashMap::new()) }
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// The spec for `R`, built on first use and shared afterwards.
    /// Concurrent first use builds exactly one spec.
    pub fn spec_for<R: RecordType>(&self) -> Result<Arc<TableSpec<R>>> {
        let key = TypeId::of::<R>();
        {
            let specs = self.specs.read();
            if let Some(entry) = specs.get(&key) {
                return downcast_spec::<R>(entry);
            }
        }
        let mut specs = self.specs.write();
        if let Some(entry) = specs.get(&key) {
            return downcast_spec::<R>(entry);
        }
        let spec = Arc::new(TableSpec::<R>::resolve(&self.config)?);
        specs.insert(key, spec.clone());
        Ok(spec)
    }
}

impl fmt::Debug for SpecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpecRegistry")
            .field("config", &self.config)
            .field("memoized", &self.specs.read().len())
            .finish()
    }
}

fn downcast_spec<R: RecordType>(entry: &Arc<dyn Any + Send + Sync>) -> Result<Arc<TableSpec<R>>> {
    Arc::clone(entry)
        .downcast::<TableSpec<R>>()
        .map_err(|_| eyre::eyre!("spec registry entry does not match its type key"))
}
