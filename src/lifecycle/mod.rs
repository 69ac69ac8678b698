//! # Lifecycle Flags
//!
//! Records carry two lifecycle marks, `archived` and `deleted`, stored
//! apart from the payload so a mark never rewrites record bytes. The
//! default placement is a sub-table named `<table>_visibility`, keyed
//! by the same id; [`FlagsPlacement::MainTable`] instead uses boolean
//! `archived` and `deleted` columns the record type itself declares.
//! Both placements run the same statements, only the table differs.
//!
//! Flags in their default state are indistinguishable from absent
//! flags: reading an id whose row is missing and reading a row with
//! both marks false both yield `None`.
//!
//! Marks are allowed before the record exists. Marking an unknown id
//! stores a stub row carrying only the id and the marks; in main-table
//! placement that stub has a NULL payload, so the record type's other
//! derived columns must be nullable for pre-write marks to succeed.
//!
//! [`FlagsPlacement::MainTable`]: crate::config::FlagsPlacement

use crate::backend::{in_transaction, with_connection, Database};
use crate::engine::sql::{self, DdlColumn};
use crate::id::{Id, IdKind};
use crate::mapping::TypeProfile;
use crate::observe::{ObserverHandle, StorageEvent};
use crate::spec::{with_postfix, ID_COLUMN, VISIBILITY_POSTFIX};
use crate::types::{ColumnType, StoredValue};
use eyre::{ensure, Result};
use std::sync::Arc;

pub const ARCHIVED_COLUMN: &str = "archived";
pub const DELETED_COLUMN: &str = "deleted";

/// The two lifecycle marks of one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LifecycleFlags {
    pub archived: bool,
    pub deleted: bool,
}

impl LifecycleFlags {
    pub fn new(archived: bool, deleted: bool) -> Self {
        LifecycleFlags { archived, deleted }
    }

    pub fn archived() -> Self {
        LifecycleFlags { archived: true, deleted: false }
    }

    pub fn deleted() -> Self {
        LifecycleFlags { archived: false, deleted: true }
    }

    /// Both marks in their default state.
    pub fn is_unset(&self) -> bool {
        !self.archived && !self.deleted
    }
}

#[derive(Debug, Clone, Copy)]
enum Flag {
    Archived,
    Deleted,
}

struct FlagsSql {
    create: Option<String>,
    contains: String,
    select: String,
    insert: String,
    update_both: String,
    update_archived: String,
    update_deleted: String,
    delete: String,
    delete_all: String,
}

/// Reads and writes lifecycle marks for one record table.
pub(crate) struct FlagsTable {
    table: String,
    id_kind: IdKind,
    owns_ddl: bool,
    db: Arc<dyn Database>,
    observer: ObserverHandle,
    sql: FlagsSql,
}

impl FlagsTable {
    /// Flags in a dedicated `<base>_visibility` table owned by this
    /// handle.
    pub(crate) fn sub_table(
        base_table: &str,
        id_kind: IdKind,
        profile: TypeProfile,
        db: Arc<dyn Database>,
        observer: ObserverHandle,
    ) -> Self {
        let table = with_postfix(base_table, VISIBILITY_POSTFIX);
        let ddl = [
            DdlColumn::new(ID_COLUMN, profile.ddl_name(id_kind.storage_type())).not_null(),
            DdlColumn::new(ARCHIVED_COLUMN, profile.ddl_name(ColumnType::Boolean))
                .not_null()
                .with_default("FALSE"),
            DdlColumn::new(DELETED_COLUMN, profile.ddl_name(ColumnType::Boolean))
                .not_null()
                .with_default("FALSE"),
        ];
        let create = Some(sql::create_table(&table, &ddl));
        let sql = FlagsSql::compose(&table, create);
        FlagsTable { table, id_kind, owns_ddl: true, db, observer, sql }
    }

    /// Flags in columns of the record table itself. The record table's
    /// DDL owns the columns; this handle only reads and updates them.
    pub(crate) fn on_table(
        table: &str,
        id_kind: IdKind,
        db: Arc<dyn Database>,
        observer: ObserverHandle,
    ) -> Self {
        let sql = FlagsSql::compose(table, None);
        FlagsTable { table: table.to_string(), id_kind, owns_ddl: false, db, observer, sql }
    }

    pub(crate) fn table_name(&self) -> &str {
        &self.table
    }

    pub(crate) fn create_if_missing(&self) -> Result<()> {
        let Some(create) = &self.sql.create else {
            return Ok(());
        };
        with_connection(self.db.as_ref(), true, |conn| {
            conn.prepare(create)?.execute(&[])?;
            Ok(())
        })?;
        self.observer.emit(|| StorageEvent::TableCreated { table: self.table.clone() });
        Ok(())
    }

    /// Reads the marks of one id. `None` when no row exists or both
    /// marks are in their default state.
    pub(crate) fn read(&self, id: &Id) -> Result<Option<LifecycleFlags>> {
        let key = self.id_kind.normalize(id)?;
        let row = with_connection(self.db.as_ref(), true, |conn| {
            let mut stmt = conn.prepare(&self.sql.select)?;
            let mut rows = stmt.query(&[key])?;
            rows.next_row()
        })?;
        let Some(row) = row else {
            return Ok(None);
        };
        let flags = LifecycleFlags {
            archived: flag_value(row.by_name(ARCHIVED_COLUMN)?)?,
            deleted: flag_value(row.by_name(DELETED_COLUMN)?)?,
        };
        Ok((!flags.is_unset()).then_some(flags))
    }

    /// Stores both marks for one id, creating the row when absent.
    pub(crate) fn write(&self, id: &Id, flags: LifecycleFlags) -> Result<()> {
        let key = self.id_kind.normalize(id)?;
        in_transaction(self.db.as_ref(), |conn| {
            let present = {
                let mut stmt = conn.prepare(&self.sql.contains)?;
                let mut rows = stmt.query(std::slice::from_ref(&key))?;
                rows.next_row()?.is_some()
            };
            let affected = if present {
                conn.prepare(&self.sql.update_both)?.execute(&[
                    StoredValue::Bool(flags.archived),
                    StoredValue::Bool(flags.deleted),
                    key,
                ])?
            } else {
                conn.prepare(&self.sql.insert)?.execute(&[
                    key,
                    StoredValue::Bool(flags.archived),
                    StoredValue::Bool(flags.deleted),
                ])?
            };
            ensure!(affected <= 1, "flag write touched {affected} rows in table {}", self.table);
            Ok(())
        })
    }

    pub(crate) fn mark_archived(&self, id: &Id) -> Result<()> {
        self.mark(id, Flag::Archived)
    }

    pub(crate) fn mark_deleted(&self, id: &Id) -> Result<()> {
        self.mark(id, Flag::Deleted)
    }

    /// Removes the marks of one id. Only meaningful for the sub-table
    /// placement; in main-table placement the marks live and die with
    /// the record row.
    pub(crate) fn clear(&self, id: &Id) -> Result<()> {
        if !self.owns_ddl {
            return Ok(());
        }
        let key = self.id_kind.normalize(id)?;
        with_connection(self.db.as_ref(), true, |conn| {
            conn.prepare(&self.sql.delete)?.execute(&[key])?;
            Ok(())
        })
    }

    /// Removes every mark. Like [`FlagsTable::clear`], a no-op for the
    /// main-table placement.
    pub(crate) fn clear_all(&self) -> Result<()> {
        if !self.owns_ddl {
            return Ok(());
        }
        with_connection(self.db.as_ref(), true, |conn| {
            conn.prepare(&self.sql.delete_all)?.execute(&[])?;
            Ok(())
        })
    }

    fn mark(&self, id: &Id, flag: Flag) -> Result<()> {
        let key = self.id_kind.normalize(id)?;
        in_transaction(self.db.as_ref(), |conn| {
            let present = {
                let mut stmt = conn.prepare(&self.sql.contains)?;
                let mut rows = stmt.query(std::slice::from_ref(&key))?;
                rows.next_row()?.is_some()
            };
            let affected = if present {
                let update = match flag {
                    Flag::Archived => &self.sql.update_archived,
                    Flag::Deleted => &self.sql.update_deleted,
                };
                conn.prepare(update)?.execute(&[StoredValue::Bool(true), key])?
            } else {
                let archived = matches!(flag, Flag::Archived);
                conn.prepare(&self.sql.insert)?.execute(&[
                    key,
                    StoredValue::Bool(archived),
                    StoredValue::Bool(!archived),
                ])?
            };
            ensure!(affected <= 1, "flag mark touched {affected} rows in table {}", self.table);
            Ok(())
        })
    }
}

impl FlagsSql {
    fn compose(table: &str, create: Option<String>) -> Self {
        FlagsSql {
            create,
            contains: sql::contains(table),
            select: sql::select_by_id(table, &[ARCHIVED_COLUMN, DELETED_COLUMN]),
            insert: sql::insert(table, &[ID_COLUMN, ARCHIVED_COLUMN, DELETED_COLUMN]),
            update_both: sql::update(table, &[ARCHIVED_COLUMN, DELETED_COLUMN]),
            update_archived: sql::update(table, &[ARCHIVED_COLUMN]),
            update_deleted: sql::update(table, &[DELETED_COLUMN]),
            delete: sql::delete(table),
            delete_all: sql::delete_all(table),
        }
    }
}

impl std::fmt::Debug for FlagsTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlagsTable")
            .field("table", &self.table)
            .field("owns_ddl", &self.owns_ddl)
            .finish()
    }
}

/// Boolean columns come back as integers from SQLite and as booleans
/// from stricter backends; NULL reads as unset.
fn flag_value(value: &StoredValue) -> Result<bool> {
    match value {
        StoredValue::Null => Ok(false),
        other => other.as_bool(),
    }
}
