//! # SQLite Backend
//!
//! [`Database`] over a bundled SQLite library. File-backed databases
//! open one OS connection per `acquire`; in-memory databases use a
//! shared-cache URI plus an anchor connection that keeps the database
//! alive between acquires.
//!
//! SQLite result cursors borrow their statement, so `query` drains the
//! result set into a [`BufferedRows`] before returning. Streams handed
//! to callers never hold database locks.

use super::{BufferedRows, Connection, Database, RowStream, Statement};
use crate::error::{ResourceClosedError, StorageError};
use crate::types::StoredValue;
use eyre::{bail, Result, WrapErr};
use parking_lot::Mutex;
use rusqlite::types::{Value, ValueRef};
use rusqlite::OpenFlags;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

static MEMORY_DB_SEQ: AtomicU64 = AtomicU64::new(0);

/// SQLite-backed [`Database`].
#[derive(Debug)]
pub struct SqliteDb {
    source: Source,
}

#[derive(Debug)]
enum Source {
    File(PathBuf),
    Memory { uri: String, _anchor: Mutex<rusqlite::Connection> },
}

impl SqliteDb {
    /// Opens (creating if needed) a file-backed database. The path is
    /// probed once so an unusable location fails here, not mid-write.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let probe = rusqlite::Connection::open(&path)
            .map_err(|e| db_err(format!("opening database at {}", path.display()), e))?;
        drop(probe);
        Ok(SqliteDb { source: Source::File(path) })
    }

    /// Opens a private in-memory database. Dropping the returned value
    /// discards all data.
    pub fn in_memory() -> Result<Self> {
        let seq = MEMORY_DB_SEQ.fetch_add(1, Ordering::Relaxed);
        let uri = format!("file:relstore_mem_{seq}?mode=memory&cache=shared");
        let anchor = open_uri(&uri)?;
        Ok(SqliteDb { source: Source::Memory { uri, _anchor: Mutex::new(anchor) } })
    }

    fn connect(&self) -> Result<rusqlite::Connection> {
        let conn = match &self.source {
            Source::File(path) => rusqlite::Connection::open(path)
                .map_err(|e| db_err(format!("opening database at {}", path.display()), e))?,
            Source::Memory { uri, .. } => open_uri(uri)?,
        };
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| db_err("setting busy timeout".to_string(), e))?;
        Ok(conn)
    }
}

impl Database for SqliteDb {
    fn acquire(&self, auto_commit: bool) -> Result<Box<dyn Connection>> {
        let conn = self.connect()?;
        if !auto_commit {
            // IMMEDIATE takes the write lock at BEGIN instead of at the
            // first write, so concurrent writers queue on the busy
            // timeout rather than failing on lock upgrade.
            conn.execute_batch("BEGIN IMMEDIATE")
                .map_err(|e| db_err("opening transaction".to_string(), e))?;
        }
        Ok(Box::new(SqliteConnection { conn: Some(conn), in_txn: !auto_commit }))
    }
}

fn open_uri(uri: &str) -> Result<rusqlite::Connection> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_URI
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    rusqlite::Connection::open_with_flags(uri, flags)
        .map_err(|e| db_err(format!("opening in-memory database `{uri}`"), e))
}

struct SqliteConnection {
    conn: Option<rusqlite::Connection>,
    in_txn: bool,
}

impl SqliteConnection {
    fn live(&self) -> Result<&rusqlite::Connection> {
        match self.conn.as_ref() {
            Some(conn) => Ok(conn),
            None => Err(ResourceClosedError::connection().into()),
        }
    }
}

impl Connection for SqliteConnection {
    fn prepare<'c>(&'c mut self, sql: &str) -> Result<Box<dyn Statement + 'c>> {
        let stmt = self
            .live()?
            .prepare(sql)
            .map_err(|e| db_err(format!("preparing `{sql}`"), e))?;
        Ok(Box::new(SqliteStatement { stmt, sql: sql.to_string() }))
    }

    fn commit(&mut self) -> Result<()> {
        if !self.in_txn {
            return Ok(());
        }
        self.live()?
            .execute_batch("COMMIT")
            .map_err(|e| db_err("committing transaction".to_string(), e))?;
        self.in_txn = false;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        if !self.in_txn {
            return Ok(());
        }
        self.live()?
            .execute_batch("ROLLBACK")
            .map_err(|e| db_err("rolling back transaction".to_string(), e))?;
        self.in_txn = false;
        Ok(())
    }

    fn close(mut self: Box<Self>) -> Result<()> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        if self.in_txn {
            self.in_txn = false;
            let _ = conn.execute_batch("ROLLBACK");
        }
        conn.close().map_err(|(_, e)| db_err("closing connection".to_string(), e))
    }
}

impl Drop for SqliteConnection {
    fn drop(&mut self) {
        if let (true, Some(conn)) = (self.in_txn, self.conn.as_ref()) {
            let _ = conn.execute_batch("ROLLBACK");
        }
    }
}

struct SqliteStatement<'c> {
    stmt: rusqlite::Statement<'c>,
    sql: String,
}

impl Statement for SqliteStatement<'_> {
    fn execute(&mut self, params: &[StoredValue]) -> Result<u64> {
        let bound = params.iter().map(bind_value);
        let affected = self
            .stmt
            .execute(rusqlite::params_from_iter(bound))
            .map_err(|e| db_err(format!("executing `{}`", self.sql), e))?;
        Ok(affected as u64)
    }

    fn query(&mut self, params: &[StoredValue]) -> Result<Box<dyn RowStream>> {
        let columns: Vec<String> =
            self.stmt.column_names().into_iter().map(str::to_string).collect();
        let width = columns.len();
        let bound = params.iter().map(bind_value);
        let mut rows = self
            .stmt
            .query(rusqlite::params_from_iter(bound))
            .map_err(|e| db_err(format!("querying `{}`", self.sql), e))?;
        let mut buffered = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|e| db_err(format!("fetching results of `{}`", self.sql), e))?
        {
            let mut values = Vec::with_capacity(width);
            for idx in 0..width {
                let cell = row
                    .get_ref(idx)
                    .map_err(|e| db_err(format!("reading column {idx} of `{}`", self.sql), e))?;
                values.push(
                    read_value(cell)
                        .wrap_err_with(|| format!("decoding column {idx} of `{}`", self.sql))?,
                );
            }
            buffered.push(values);
        }
        Ok(Box::new(BufferedRows::new(columns, buffered)))
    }
}

fn bind_value(value: &StoredValue) -> Value {
    match value {
        StoredValue::Null => Value::Null,
        StoredValue::Bool(b) => Value::Integer(i64::from(*b)),
        StoredValue::Int(i) => Value::Integer(*i),
        StoredValue::Text(s) => Value::Text(s.clone()),
        StoredValue::Bytes(b) => Value::Blob(b.clone()),
    }
}

fn read_value(value: ValueRef<'_>) -> Result<StoredValue> {
    match value {
        ValueRef::Null => Ok(StoredValue::Null),
        ValueRef::Integer(i) => Ok(StoredValue::Int(i)),
        ValueRef::Real(f) => bail!("unexpected floating point value {f} in result"),
        ValueRef::Text(bytes) => {
            let text = std::str::from_utf8(bytes).wrap_err("text cell is not valid UTF-8")?;
            Ok(StoredValue::Text(text.to_string()))
        }
        ValueRef::Blob(bytes) => Ok(StoredValue::Bytes(bytes.to_vec())),
    }
}

fn db_err(context: String, cause: rusqlite::Error) -> eyre::Report {
    StorageError::with_cause(context, cause).into()
}
