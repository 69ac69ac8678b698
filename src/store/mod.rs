//! # Record Storage
//!
//! [`RecordStorage`] is the front door for one record type: the record
//! table, its lifecycle flags, and the cursor bookkeeping behind one
//! handle. Opening it creates the backing tables when missing; closing
//! it force-closes every cursor it ever handed out and makes the handle
//! permanently unusable.
//!
//! ## Flag placement
//!
//! With the default [`FlagsPlacement::SubTable`] the marks live in
//! `<table>_visibility` next to the record table. With
//! [`FlagsPlacement::MainTable`] the record type must declare boolean
//! `archived` and `deleted` columns, checked at open; note that a
//! record write then rewrites the marks from the record's own fields,
//! since the columns are derived like any other.

use crate::backend::Database;
use crate::config::FlagsPlacement;
use crate::cursor::{Cursor, CursorRegistry};
use crate::engine::{FieldMask, JsonCodec, RecordCodec, RecordTable};
use crate::error::{ConfigurationError, ResourceClosedError};
use crate::id::Id;
use crate::lifecycle::{FlagsTable, LifecycleFlags, ARCHIVED_COLUMN, DELETED_COLUMN};
use crate::observe::StorageEvent;
use crate::spec::{RecordType, SpecRegistry, TableSpec};
use crate::types::ColumnType;
use eyre::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Storage front for one record type.
pub struct RecordStorage<R: RecordType> {
    table: RecordTable<R>,
    flags: FlagsTable,
    cursors: CursorRegistry,
    closed: AtomicBool,
}

impl<R: RecordType> RecordStorage<R> {
    /// Opens the storage with an explicit payload codec, creating the
    /// record and flag tables when missing.
    pub fn open(
        db: Arc<dyn Database>,
        registry: &SpecRegistry,
        codec: Arc<dyn RecordCodec<R>>,
    ) -> Result<Self> {
        let table = RecordTable::new(Arc::clone(&db), registry, codec)?;
        let observer = registry.config().observer().clone();
        let flags = match registry.config().flags_placement() {
            FlagsPlacement::SubTable => FlagsTable::sub_table(
                table.table_name(),
                table.spec().id_kind(),
                registry.config().profile(),
                db,
                observer,
            ),
            FlagsPlacement::MainTable => {
                validate_flag_columns(table.spec())?;
                FlagsTable::on_table(table.table_name(), table.spec().id_kind(), db, observer)
            }
        };
        table.create_if_missing()?;
        flags.create_if_missing()?;
        Ok(RecordStorage {
            table,
            flags,
            cursors: CursorRegistry::new(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn table_name(&self) -> &str {
        self.table.table_name()
    }

    pub fn exists(&self, id: &Id) -> Result<bool> {
        self.ensure_open()?;
        self.table.exists(id)
    }

    pub fn read(&self, id: &Id, mask: Option<&FieldMask>) -> Result<Option<R>> {
        self.ensure_open()?;
        self.table.read(id, mask)
    }

    pub fn read_many(&self, ids: &[Id], mask: Option<&FieldMask>) -> Result<Cursor<R>> {
        self.ensure_open()?;
        let cursor = self.table.read_many(ids, mask)?;
        self.cursors.track(&cursor);
        Ok(cursor)
    }

    /// Scans every stored record together with its id.
    pub fn read_all(&self, mask: Option<&FieldMask>) -> Result<Cursor<(Id, R)>> {
        self.ensure_open()?;
        let cursor = self.table.read_all(mask)?;
        self.cursors.track(&cursor);
        Ok(cursor)
    }

    pub fn index(&self) -> Result<Cursor<Id>> {
        self.ensure_open()?;
        let cursor = self.table.index()?;
        self.cursors.track(&cursor);
        Ok(cursor)
    }

    pub fn write(&self, id: &Id, record: &R) -> Result<()> {
        self.ensure_open()?;
        self.table.write(id, record)
    }

    pub fn write_all(&self, entries: &[(Id, R)]) -> Result<()> {
        self.ensure_open()?;
        self.table.write_all(entries)
    }

    /// Deletes the record and its lifecycle marks. `false` when the id
    /// had no record row.
    pub fn delete(&self, id: &Id) -> Result<bool> {
        self.ensure_open()?;
        let removed = self.table.delete(id)?;
        self.flags.clear(id)?;
        Ok(removed)
    }

    /// Empties the record table and its flag rows. Yields the number of
    /// record rows removed.
    pub fn delete_all(&self) -> Result<u64> {
        self.ensure_open()?;
        let removed = self.table.delete_all()?;
        self.flags.clear_all()?;
        Ok(removed)
    }

    /// The lifecycle marks of one id, `None` when never marked or when
    /// both marks are in their default state.
    pub fn read_flags(&self, id: &Id) -> Result<Option<LifecycleFlags>> {
        self.ensure_open()?;
        self.flags.read(id)
    }

    pub fn write_flags(&self, id: &Id, flags: LifecycleFlags) -> Result<()> {
        self.ensure_open()?;
        self.flags.write(id, flags)
    }

    /// Marks the id archived, before or after its record exists.
    pub fn mark_archived(&self, id: &Id) -> Result<()> {
        self.ensure_open()?;
        self.flags.mark_archived(id)
    }

    /// Marks the id deleted, before or after its record exists.
    pub fn mark_deleted(&self, id: &Id) -> Result<()> {
        self.ensure_open()?;
        self.flags.mark_deleted(id)
    }

    /// Closes the storage, force-closing every outstanding cursor.
    /// Failures to close individual cursors are recorded and tolerated.
    /// A second close fails.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(ResourceClosedError::storage().into());
        }
        let observer = self.table.observer();
        let (closed, failed) = self.cursors.close_all(observer);
        if closed > 0 || failed > 0 {
            observer.emit(|| StorageEvent::CursorsForceClosed { closed, failed });
        }
        observer
            .emit(|| StorageEvent::StorageClosed { table: self.table.table_name().to_string() });
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ResourceClosedError::storage().into());
        }
        Ok(())
    }
}

impl<R> RecordStorage<R>
where
    R: RecordType + Serialize + DeserializeOwned,
{
    /// Opens the storage with a JSON payload codec.
    pub fn open_json(db: Arc<dyn Database>, registry: &SpecRegistry) -> Result<Self> {
        RecordStorage::open(db, registry, Arc::new(JsonCodec::new()))
    }
}

impl<R: RecordType> std::fmt::Debug for RecordStorage<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStorage")
            .field("table", &self.table.table_name())
            .field("flags", &self.flags.table_name())
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish()
    }
}

fn validate_flag_columns<R: RecordType>(spec: &TableSpec<R>) -> Result<()> {
    for name in [ARCHIVED_COLUMN, DELETED_COLUMN] {
        let present =
            spec.column(name).is_some_and(|col| col.column_type() == ColumnType::Boolean);
        if !present {
            return Err(ConfigurationError::MissingFlagColumns {
                table: spec.table_name().to_string(),
            }
            .into());
        }
    }
    Ok(())
}
