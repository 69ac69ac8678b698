//! # Record Engine
//!
//! [`RecordTable`] executes every operation against one record type's
//! table: DDL, point reads, scans, conditional writes, deletes. The SQL
//! for the table is composed once at construction from the resolved
//! [`TableSpec`]; payload bytes go through the [`RecordCodec`] and the
//! derived columns come from the spec's extractors.
//!
//! ## Write path
//!
//! `write` runs one transaction: probe for the id, then INSERT when
//! absent or UPDATE when present. Two writers racing the same fresh id
//! can both miss the probe; the loser's INSERT then fails on the
//! primary key and surfaces as a [`crate::error::StorageError`]. Writes
//! to distinct ids never conflict.
//!
//! Reads acquire a connection, drain the result, and release the
//! connection before returning, so cursors never pin database state.

pub(crate) mod sql;

mod codec;

pub use codec::{FieldMask, JsonCodec, RecordCodec};

pub(crate) use codec::field_path;

use crate::backend::{in_transaction, with_connection, BufferedRows, Connection, Database, Row};
use crate::cursor::Cursor;
use crate::id::Id;
use crate::observe::{ObserverHandle, StorageEvent};
use crate::spec::{RecordType, SpecRegistry, TableSpec, ID_COLUMN, PAYLOAD_COLUMN};
use crate::types::{ColumnType, StoredValue};
use eyre::{Result, WrapErr};
use smallvec::SmallVec;
use sql::DdlColumn;
use std::fmt;
use std::sync::Arc;

/// All statements a record table ever runs, composed once.
struct TableSql {
    create: String,
    contains: String,
    select_by_id: String,
    select_all: String,
    select_ids: String,
    insert: String,
    update: String,
    delete: String,
    delete_all: String,
}

impl TableSql {
    fn compose<R: RecordType>(spec: &TableSpec<R>, profile: crate::mapping::TypeProfile) -> Self {
        let table = spec.table_name();

        let mut ddl = Vec::with_capacity(spec.columns().len() + 2);
        ddl.push(
            DdlColumn::new(ID_COLUMN, profile.ddl_name(spec.id_kind().storage_type())).not_null(),
        );
        // payload stays nullable: flag marks may stub a row before the
        // record itself is written
        ddl.push(DdlColumn::new(PAYLOAD_COLUMN, profile.ddl_name(ColumnType::ByteArray)));
        for col in spec.columns() {
            let mut column = DdlColumn::new(col.name(), profile.ddl_name(col.column_type()));
            if !col.is_nullable() {
                column = column.not_null();
            }
            if let Some(default) = col.ddl_default() {
                column = column.with_default(default);
            }
            ddl.push(column);
        }

        let read_columns = [ID_COLUMN, PAYLOAD_COLUMN];
        let mut write_columns: Vec<&str> = vec![ID_COLUMN, PAYLOAD_COLUMN];
        write_columns.extend(spec.columns().iter().map(|c| c.name()));
        let mut set_columns: Vec<&str> = vec![PAYLOAD_COLUMN];
        set_columns.extend(spec.columns().iter().map(|c| c.name()));

        TableSql {
            create: sql::create_table(table, &ddl),
            contains: sql::contains(table),
            select_by_id: sql::select_by_id(table, &read_columns),
            select_all: sql::select_all(table, &read_columns),
            select_ids: sql::select_all(table, &[ID_COLUMN]),
            insert: sql::insert(table, &write_columns),
            update: sql::update(table, &set_columns),
            delete: sql::delete(table),
            delete_all: sql::delete_all(table),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum WriteKind {
    Inserted,
    Updated,
}

/// The operations of one record type's table.
pub struct RecordTable<R: RecordType> {
    spec: Arc<TableSpec<R>>,
    db: Arc<dyn Database>,
    codec: Arc<dyn RecordCodec<R>>,
    observer: ObserverHandle,
    sql: TableSql,
}

impl<R: RecordType> RecordTable<R> {
    pub fn new(
        db: Arc<dyn Database>,
        registry: &SpecRegistry,
        codec: Arc<dyn RecordCodec<R>>,
    ) -> Result<Self> {
        let spec = registry.spec_for::<R>()?;
        let sql = TableSql::compose(&spec, registry.config().profile());
        let observer = registry.config().observer().clone();
        Ok(RecordTable { spec, db, codec, observer, sql })
    }

    pub fn table_name(&self) -> &str {
        self.spec.table_name()
    }

    pub(crate) fn spec(&self) -> &Arc<TableSpec<R>> {
        &self.spec
    }

    pub(crate) fn database(&self) -> &Arc<dyn Database> {
        &self.db
    }

    pub(crate) fn codec(&self) -> &Arc<dyn RecordCodec<R>> {
        &self.codec
    }

    pub(crate) fn observer(&self) -> &ObserverHandle {
        &self.observer
    }

    /// Issues the table's CREATE TABLE IF NOT EXISTS. Safe to call on
    /// every startup.
    pub fn create_if_missing(&self) -> Result<()> {
        with_connection(self.db.as_ref(), true, |conn| {
            conn.prepare(&self.sql.create)?.execute(&[])?;
            Ok(())
        })?;
        self.observer
            .emit(|| StorageEvent::TableCreated { table: self.table_name().to_string() });
        Ok(())
    }

    pub fn exists(&self, id: &Id) -> Result<bool> {
        let key = self.spec.id_kind().normalize(id)?;
        with_connection(self.db.as_ref(), true, |conn| {
            let mut stmt = conn.prepare(&self.sql.contains)?;
            let mut rows = stmt.query(&[key])?;
            Ok(rows.next_row()?.is_some())
        })
    }

    /// Reads one record. Absent ids and rows whose payload was never
    /// written both read as `None`. With a mask, only masked fields
    /// survive into the decoded record.
    pub fn read(&self, id: &Id, mask: Option<&FieldMask>) -> Result<Option<R>> {
        let key = self.spec.id_kind().normalize(id)?;
        let row = with_connection(self.db.as_ref(), true, |conn| {
            let mut stmt = conn.prepare(&self.sql.select_by_id)?;
            let mut rows = stmt.query(&[key])?;
            rows.next_row()
        })?;
        match row {
            Some(row) => {
                let mut decode = self.row_decoder(mask);
                decode(row)
            }
            None => Ok(None),
        }
    }

    /// Reads the records behind a list of ids. Missing ids are simply
    /// absent from the results; result order is the database's. An
    /// empty id list yields an empty cursor without touching the
    /// database.
    pub fn read_many(&self, ids: &[Id], mask: Option<&FieldMask>) -> Result<Cursor<R>> {
        if ids.is_empty() {
            return Ok(Cursor::new(Box::<BufferedRows>::default(), self.row_decoder(mask)));
        }
        let keys = self.spec.id_kind().normalize_many(ids)?;
        let select =
            sql::select_in(self.spec.table_name(), &[ID_COLUMN, PAYLOAD_COLUMN], keys.len());
        let stream = with_connection(self.db.as_ref(), true, |conn| {
            let mut stmt = conn.prepare(&select)?;
            stmt.query(&keys)
        })?;
        self.emit_cursor_opened();
        Ok(Cursor::new(stream, self.row_decoder(mask)))
    }

    /// Scans the whole table, yielding each record with its id. Rows
    /// without a payload are skipped, matching `read`.
    pub fn read_all(&self, mask: Option<&FieldMask>) -> Result<Cursor<(Id, R)>> {
        let stream = with_connection(self.db.as_ref(), true, |conn| {
            let mut stmt = conn.prepare(&self.sql.select_all)?;
            stmt.query(&[])
        })?;
        self.emit_cursor_opened();
        let kind = self.spec.id_kind();
        let mut decode = self.row_decoder(mask);
        Ok(Cursor::new(stream, move |row: Row| {
            let key = row.by_name(ID_COLUMN)?.clone();
            match decode(row)? {
                Some(record) => Ok(Some((kind.denormalize(key)?, record))),
                None => Ok(None),
            }
        }))
    }

    /// Every id in the table, including ids of stub rows that carry
    /// flags but no payload yet.
    pub fn index(&self) -> Result<Cursor<Id>> {
        let stream = with_connection(self.db.as_ref(), true, |conn| {
            let mut stmt = conn.prepare(&self.sql.select_ids)?;
            stmt.query(&[])
        })?;
        self.emit_cursor_opened();
        let kind = self.spec.id_kind();
        Ok(Cursor::new(stream, move |mut row: Row| {
            Ok(Some(kind.denormalize(row.take(ID_COLUMN)?)?))
        }))
    }

    /// Writes one record under its id: INSERT when the id is absent,
    /// UPDATE otherwise, probed and applied in one transaction. Writers
    /// racing the same fresh id leave one INSERT to fail on the primary
    /// key.
    pub fn write(&self, id: &Id, record: &R) -> Result<()> {
        let key = self.spec.id_kind().normalize(id)?;
        let kind = in_transaction(self.db.as_ref(), |conn| self.write_on(conn, key, record))?;
        self.emit_write(kind);
        Ok(())
    }

    /// Writes a batch in one transaction; either every record lands or
    /// none do.
    pub fn write_all(&self, entries: &[(Id, R)]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut keys: SmallVec<[StoredValue; 8]> = SmallVec::with_capacity(entries.len());
        for (id, _) in entries {
            keys.push(self.spec.id_kind().normalize(id)?);
        }
        let kinds = in_transaction(self.db.as_ref(), |conn| {
            let mut kinds = Vec::with_capacity(entries.len());
            for ((_, record), key) in entries.iter().zip(keys) {
                kinds.push(self.write_on(conn, key, record)?);
            }
            Ok(kinds)
        })?;
        for kind in kinds {
            self.emit_write(kind);
        }
        Ok(())
    }

    /// Deletes one record. `false` when the id was not present.
    pub fn delete(&self, id: &Id) -> Result<bool> {
        let key = self.spec.id_kind().normalize(id)?;
        let affected = with_connection(self.db.as_ref(), true, |conn| {
            conn.prepare(&self.sql.delete)?.execute(&[key])
        })?;
        if affected > 0 {
            self.observer
                .emit(|| StorageEvent::RecordDeleted { table: self.table_name().to_string() });
        }
        Ok(affected > 0)
    }

    /// Deletes every row. Yields the number of rows removed.
    pub fn delete_all(&self) -> Result<u64> {
        with_connection(self.db.as_ref(), true, |conn| {
            conn.prepare(&self.sql.delete_all)?.execute(&[])
        })
    }

    fn write_on(
        &self,
        conn: &mut dyn Connection,
        key: StoredValue,
        record: &R,
    ) -> Result<WriteKind> {
        let present = {
            let mut stmt = conn.prepare(&self.sql.contains)?;
            let mut rows = stmt.query(std::slice::from_ref(&key))?;
            rows.next_row()?.is_some()
        };
        let payload = StoredValue::Bytes(self.codec.to_bytes(record)?);
        let mut derived = Vec::with_capacity(self.spec.columns().len());
        for col in self.spec.columns() {
            let value = col.stored_value(record).wrap_err_with(|| {
                format!("deriving column {} for table {}", col.name(), self.table_name())
            })?;
            derived.push(value);
        }
        let mut params = Vec::with_capacity(derived.len() + 2);
        if present {
            params.push(payload);
            params.extend(derived);
            params.push(key);
            conn.prepare(&self.sql.update)?.execute(&params)?;
            Ok(WriteKind::Updated)
        } else {
            params.push(key);
            params.push(payload);
            params.extend(derived);
            conn.prepare(&self.sql.insert)?.execute(&params)?;
            Ok(WriteKind::Inserted)
        }
    }

    pub(crate) fn row_decoder(
        &self,
        mask: Option<&FieldMask>,
    ) -> impl FnMut(Row) -> Result<Option<R>> + Send + 'static {
        let codec = Arc::clone(&self.codec);
        let mask = mask.filter(|m| !m.is_empty()).cloned();
        let table = self.spec.table_name().to_string();
        move |mut row: Row| {
            let bytes = match row.take(PAYLOAD_COLUMN)? {
                StoredValue::Null => return Ok(None),
                other => other.into_bytes()?,
            };
            let bytes = match &mask {
                Some(mask) => codec.apply_mask(&bytes, mask)?,
                None => bytes,
            };
            let record = codec.from_bytes(&bytes).wrap_err_with(|| {
                let id = row
                    .by_name(ID_COLUMN)
                    .map(|v| v.to_string())
                    .unwrap_or_else(|_| "?".to_string());
                format!("decoding record {id} from table {table}")
            })?;
            Ok(Some(record))
        }
    }

    fn emit_write(&self, kind: WriteKind) {
        self.observer.emit(|| match kind {
            WriteKind::Inserted => {
                StorageEvent::RecordInserted { table: self.table_name().to_string() }
            }
            WriteKind::Updated => {
                StorageEvent::RecordUpdated { table: self.table_name().to_string() }
            }
        });
    }

    fn emit_cursor_opened(&self) {
        self.observer
            .emit(|| StorageEvent::CursorOpened { table: self.table_name().to_string() });
    }
}

impl<R: RecordType> fmt::Debug for RecordTable<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordTable").field("table", &self.spec.table_name()).finish()
    }
}
