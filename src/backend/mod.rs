//! # Database Backend
//!
//! The seam between the record engine and whatever executes SQL. The
//! engine composes statements and binds [`StoredValue`] parameters; a
//! backend implements four small traits to run them:
//!
//! | Trait | Role |
//! |-------|------|
//! | [`Database`] | Hands out connections, auto-commit or transactional |
//! | [`Connection`] | Prepares statements, ends its transaction |
//! | [`Statement`] | Executes with bound parameters |
//! | [`RowStream`] | Yields result rows as [`Row`] values |
//!
//! Connections are acquired per operation and released before the
//! operation returns; nothing in the crate holds a connection across
//! calls. Row streams outlive their connection, so a backend that reads
//! lazily must detach results from the statement first (the bundled
//! SQLite backend buffers, see [`BufferedRows`]).
//!
//! ## Transactions
//!
//! `acquire(false)` returns a connection with an open transaction;
//! exactly one of `commit` or `rollback` ends it. On auto-commit
//! connections both are no-ops. Dropping a transactional connection
//! without committing rolls the transaction back.

use crate::types::StoredValue;
use eyre::{bail, Result};
use std::collections::VecDeque;
use std::sync::Arc;

mod sqlite;

pub use sqlite::SqliteDb;

/// A source of connections. Shared across threads behind `Arc`.
pub trait Database: Send + Sync {
    /// Acquires a fresh connection. With `auto_commit` false the
    /// connection has a transaction already open.
    fn acquire(&self, auto_commit: bool) -> Result<Box<dyn Connection>>;
}

/// One live database connection.
pub trait Connection: Send {
    /// Prepares a statement. The statement borrows this connection.
    fn prepare<'c>(&'c mut self, sql: &str) -> Result<Box<dyn Statement + 'c>>;

    /// Commits the open transaction. No-op on auto-commit connections.
    fn commit(&mut self) -> Result<()>;

    /// Rolls back the open transaction. No-op on auto-commit connections.
    fn rollback(&mut self) -> Result<()>;

    /// Releases the connection. An uncommitted transaction is rolled back.
    fn close(self: Box<Self>) -> Result<()>;
}

/// A prepared statement awaiting parameters.
pub trait Statement {
    /// Runs a statement that returns no rows. Yields the affected row count.
    fn execute(&mut self, params: &[StoredValue]) -> Result<u64>;

    /// Runs a query. The returned stream owns its rows and stays valid
    /// after the statement and connection are gone.
    fn query(&mut self, params: &[StoredValue]) -> Result<Box<dyn RowStream>>;
}

/// A sequence of result rows. Exhausted streams keep returning `None`.
pub trait RowStream: Send {
    /// Column names in result order.
    fn columns(&self) -> &[String];

    /// The next row, or `None` when the stream is exhausted.
    fn next_row(&mut self) -> Result<Option<Row>>;

    /// Releases whatever the stream still holds. Idempotent.
    fn close(&mut self) -> Result<()>;
}

/// Runs one operation on a fresh connection and releases it. The
/// operation's error wins over a close error.
pub(crate) fn with_connection<T>(
    db: &dyn Database,
    auto_commit: bool,
    op: impl FnOnce(&mut dyn Connection) -> Result<T>,
) -> Result<T> {
    let mut conn = db.acquire(auto_commit)?;
    let result = op(conn.as_mut());
    let closed = conn.close();
    let value = result?;
    closed?;
    Ok(value)
}

/// Runs one operation inside a transaction: commit on success, best
/// effort rollback on failure.
pub(crate) fn in_transaction<T>(
    db: &dyn Database,
    op: impl FnOnce(&mut dyn Connection) -> Result<T>,
) -> Result<T> {
    with_connection(db, false, |conn| match op(conn) {
        Ok(value) => {
            conn.commit()?;
            Ok(value)
        }
        Err(err) => {
            let _ = conn.rollback();
            Err(err)
        }
    })
}

/// One result row: column names shared across the stream, values owned.
#[derive(Debug, Clone)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<StoredValue>,
}

impl Row {
    pub fn new(columns: Arc<[String]>, values: Vec<StoredValue>) -> Self {
        Row { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn value(&self, idx: usize) -> Result<&StoredValue> {
        match self.values.get(idx) {
            Some(v) => Ok(v),
            None => bail!("row has {} columns, index {idx} is out of range", self.values.len()),
        }
    }

    pub fn by_name(&self, name: &str) -> Result<&StoredValue> {
        self.value(self.index_of(name)?)
    }

    /// Moves a value out of the row, leaving `Null` behind. Used for
    /// payload bytes, which are not worth cloning.
    pub fn take(&mut self, name: &str) -> Result<StoredValue> {
        let idx = self.index_of(name)?;
        Ok(std::mem::replace(&mut self.values[idx], StoredValue::Null))
    }

    fn index_of(&self, name: &str) -> Result<usize> {
        match self.columns.iter().position(|c| c == name) {
            Some(idx) => Ok(idx),
            None => bail!("result set has no column named {name:?}"),
        }
    }
}

/// A fully materialized row stream. Backends that cannot detach a live
/// cursor from its statement drain into one of these.
#[derive(Debug, Default)]
pub struct BufferedRows {
    columns: Arc<[String]>,
    rows: VecDeque<Vec<StoredValue>>,
}

impl BufferedRows {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<StoredValue>>) -> Self {
        BufferedRows { columns: columns.into(), rows: rows.into() }
    }

    pub fn remaining(&self) -> usize {
        self.rows.len()
    }
}

impl RowStream for BufferedRows {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next_row(&mut self) -> Result<Option<Row>> {
        Ok(self.rows.pop_front().map(|values| Row::new(Arc::clone(&self.columns), values)))
    }

    fn close(&mut self) -> Result<()> {
        self.rows.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BufferedRows {
        BufferedRows::new(
            vec!["id".to_string(), "payload".to_string()],
            vec![
                vec![StoredValue::Int(1), StoredValue::Bytes(vec![0xAA])],
                vec![StoredValue::Int(2), StoredValue::Null],
            ],
        )
    }

    #[test]
    fn test_buffered_rows_yield_in_order_then_none() {
        let mut rows = sample();
        assert_eq!(rows.next_row().unwrap().unwrap().by_name("id").unwrap(), &StoredValue::Int(1));
        assert_eq!(rows.next_row().unwrap().unwrap().by_name("id").unwrap(), &StoredValue::Int(2));
        assert!(rows.next_row().unwrap().is_none());
        assert!(rows.next_row().unwrap().is_none());
    }

    #[test]
    fn test_row_take_leaves_null_behind() {
        let mut rows = sample();
        let mut row = rows.next_row().unwrap().unwrap();
        assert_eq!(row.take("payload").unwrap(), StoredValue::Bytes(vec![0xAA]));
        assert_eq!(row.by_name("payload").unwrap(), &StoredValue::Null);
    }

    #[test]
    fn test_row_reports_unknown_column() {
        let mut rows = sample();
        let row = rows.next_row().unwrap().unwrap();
        let err = row.by_name("missing").unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_close_discards_pending_rows() {
        let mut rows = sample();
        rows.close().unwrap();
        assert_eq!(rows.remaining(), 0);
        assert!(rows.next_row().unwrap().is_none());
    }
}
