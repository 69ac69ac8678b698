//! Per-producer event tallies, kept in a `<base>_event_count` side
//! table so they survive without scanning the event table.

use crate::backend::{in_transaction, with_connection, Database};
use crate::engine::sql::{self, DdlColumn};
use crate::mapping::TypeProfile;
use crate::observe::{ObserverHandle, StorageEvent};
use crate::spec::{with_postfix, EVENT_COUNT_POSTFIX, ID_COLUMN};
use crate::types::{ColumnType, StoredValue};
use eyre::{bail, Result};
use std::sync::Arc;

const COUNT_COLUMN: &str = "event_count";

pub(crate) struct CountTable {
    table: String,
    db: Arc<dyn Database>,
    observer: ObserverHandle,
    create: String,
    contains: String,
    select: String,
    insert: String,
    update: String,
}

impl CountTable {
    pub(crate) fn new(
        base_table: &str,
        profile: TypeProfile,
        db: Arc<dyn Database>,
        observer: ObserverHandle,
    ) -> Self {
        let table = with_postfix(base_table, EVENT_COUNT_POSTFIX);
        let ddl = [
            DdlColumn::new(ID_COLUMN, profile.ddl_name(ColumnType::String255)).not_null(),
            DdlColumn::new(COUNT_COLUMN, profile.ddl_name(ColumnType::Long))
                .not_null()
                .with_default("0"),
        ];
        let create = sql::create_table(&table, &ddl);
        let contains = sql::contains(&table);
        let select = sql::select_by_id(&table, &[COUNT_COLUMN]);
        let insert = sql::insert(&table, &[ID_COLUMN, COUNT_COLUMN]);
        let update = sql::update(&table, &[COUNT_COLUMN]);
        CountTable { table, db, observer, create, contains, select, insert, update }
    }

    pub(crate) fn table_name(&self) -> &str {
        &self.table
    }

    pub(crate) fn create_if_missing(&self) -> Result<()> {
        with_connection(self.db.as_ref(), true, |conn| {
            conn.prepare(&self.create)?.execute(&[])?;
            Ok(())
        })?;
        self.observer.emit(|| StorageEvent::TableCreated { table: self.table.clone() });
        Ok(())
    }

    /// The stored tally for one producer, zero when never written.
    pub(crate) fn read(&self, producer_id: &str) -> Result<u64> {
        let key = StoredValue::Text(producer_id.to_string());
        let row = with_connection(self.db.as_ref(), true, |conn| {
            let mut stmt = conn.prepare(&self.select)?;
            let mut rows = stmt.query(&[key])?;
            rows.next_row()
        })?;
        let Some(row) = row else {
            return Ok(0);
        };
        let raw = row.by_name(COUNT_COLUMN)?.as_i64()?;
        match u64::try_from(raw) {
            Ok(count) => Ok(count),
            Err(_) => bail!("negative event count {raw} in table {}", self.table),
        }
    }

    /// Stores the tally for one producer, creating the row when absent.
    pub(crate) fn write(&self, producer_id: &str, count: u64) -> Result<()> {
        let Ok(stored) = i64::try_from(count) else {
            bail!("event count {count} exceeds the storable range");
        };
        let key = StoredValue::Text(producer_id.to_string());
        in_transaction(self.db.as_ref(), |conn| {
            let present = {
                let mut stmt = conn.prepare(&self.contains)?;
                let mut rows = stmt.query(std::slice::from_ref(&key))?;
                rows.next_row()?.is_some()
            };
            if present {
                conn.prepare(&self.update)?.execute(&[StoredValue::Int(stored), key])?;
            } else {
                conn.prepare(&self.insert)?.execute(&[key, StoredValue::Int(stored)])?;
            }
            Ok(())
        })
    }
}

impl std::fmt::Debug for CountTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CountTable").field("table", &self.table).finish()
    }
}
