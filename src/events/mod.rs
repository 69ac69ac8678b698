//! # Event Streams
//!
//! Append-only events over the record engine. A [`StoredEvent`] is a
//! regular record whose derived columns (type, producer, occurrence
//! time) let stream queries narrow on the server before the payload is
//! decoded; [`EventStore`] adds the append/stream surface, client-side
//! field filters, and per-producer event tallies.
//!
//! Streams come back time-ascending. The server-side predicate is built
//! by [`EventStreamQuery`]; [`FieldFilter`]s then run against decoded
//! event bodies as the cursor advances.

mod counts;
mod filter;
mod query;

pub use filter::FieldFilter;
pub use query::{EventClause, EventStreamQuery};

use crate::backend::{with_connection, Database};
use crate::cursor::{Cursor, CursorRegistry};
use crate::engine::{JsonCodec, RecordTable};
use crate::error::ResourceClosedError;
use crate::id::{Id, IdKind};
use crate::observe::StorageEvent;
use crate::spec::{ColumnDef, RecordType, SpecRegistry, ID_COLUMN, PAYLOAD_COLUMN};
use crate::types::{FieldValue, LogicalType, Timestamp};
use counts::CountTable;
use eyre::Result;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub(crate) const EVENT_TYPE_COLUMN: &str = "event_type";
pub(crate) const PRODUCER_COLUMN: &str = "producer_id";
pub(crate) const SECONDS_COLUMN: &str = "seconds";
pub(crate) const NANOS_COLUMN: &str = "nanos";

/// One appended event: identity, classification, occurrence time, and
/// a structured body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: String,
    pub event_type: String,
    pub producer_id: String,
    pub time: Timestamp,
    #[serde(default)]
    pub body: serde_json::Value,
}

impl StoredEvent {
    pub fn new(
        event_id: impl Into<String>,
        event_type: impl Into<String>,
        producer_id: impl Into<String>,
        time: Timestamp,
    ) -> Self {
        StoredEvent {
            event_id: event_id.into(),
            event_type: event_type.into(),
            producer_id: producer_id.into(),
            time,
            body: serde_json::Value::Null,
        }
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = body;
        self
    }
}

impl RecordType for StoredEvent {
    fn qualified_name() -> &'static str {
        "events"
    }

    fn id_kind() -> IdKind {
        IdKind::Text
    }

    fn columns() -> Vec<ColumnDef<Self>> {
        vec![
            ColumnDef::new(EVENT_TYPE_COLUMN, LogicalType::Text, |e: &StoredEvent| {
                FieldValue::Text(e.event_type.clone())
            }),
            ColumnDef::new(PRODUCER_COLUMN, LogicalType::Text255, |e: &StoredEvent| {
                FieldValue::Text(e.producer_id.clone())
            }),
            ColumnDef::new(SECONDS_COLUMN, LogicalType::Int64, |e: &StoredEvent| {
                FieldValue::I64(e.time.seconds)
            }),
            ColumnDef::new(NANOS_COLUMN, LogicalType::Int32, |e: &StoredEvent| {
                FieldValue::I32(e.time.nanos)
            }),
        ]
    }
}

/// Storage front for event streams.
pub struct EventStore {
    table: RecordTable<StoredEvent>,
    counts: CountTable,
    cursors: CursorRegistry,
    closed: AtomicBool,
}

impl EventStore {
    /// Opens the store, creating the event and tally tables when
    /// missing.
    pub fn open(db: Arc<dyn Database>, registry: &SpecRegistry) -> Result<Self> {
        let table = RecordTable::new(Arc::clone(&db), registry, Arc::new(JsonCodec::new()))?;
        table.create_if_missing()?;
        let counts = CountTable::new(
            table.table_name(),
            registry.config().profile(),
            db,
            registry.config().observer().clone(),
        );
        counts.create_if_missing()?;
        Ok(EventStore {
            table,
            counts,
            cursors: CursorRegistry::new(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn table_name(&self) -> &str {
        self.table.table_name()
    }

    /// Appends one event under its event id. Re-appending an id
    /// overwrites the stored event.
    pub fn append(&self, event: &StoredEvent) -> Result<()> {
        self.ensure_open()?;
        self.table.write(&Id::from(event.event_id.clone()), event)
    }

    pub fn read(&self, event_id: &str) -> Result<Option<StoredEvent>> {
        self.ensure_open()?;
        self.table.read(&Id::from(event_id), None)
    }

    /// Streams matching events, time-ascending. The query's clauses and
    /// time window narrow on the server; its field filters run against
    /// decoded bodies as the cursor advances.
    pub fn read_stream(&self, query: &EventStreamQuery) -> Result<Cursor<StoredEvent>> {
        self.ensure_open()?;
        let (select, params) = query.to_sql(self.table.table_name(), &[ID_COLUMN, PAYLOAD_COLUMN]);
        let stream = with_connection(self.table.database().as_ref(), true, |conn| {
            let mut stmt = conn.prepare(&select)?;
            stmt.query(&params)
        })?;
        self.table
            .observer()
            .emit(|| StorageEvent::CursorOpened { table: self.table.table_name().to_string() });
        let filters = query.filters().to_vec();
        let cursor = Cursor::new(stream, self.table.row_decoder(None))
            .with_filter(move |event: &StoredEvent| Ok(filter::matches_any(&filters, &event.body)));
        self.cursors.track(&cursor);
        Ok(cursor)
    }

    /// The tally last stored for this producer, zero when never set.
    pub fn event_count(&self, producer_id: &str) -> Result<u64> {
        self.ensure_open()?;
        self.counts.read(producer_id)
    }

    pub fn update_event_count(&self, producer_id: &str, count: u64) -> Result<()> {
        self.ensure_open()?;
        self.counts.write(producer_id, count)
    }

    /// Closes the store, force-closing any outstanding stream cursors.
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

impl std::fmt::Debug for EventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStore")
            .field("table", &self.table.table_name())
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SqliteDb;
    use crate::config::StorageConfig;
    use serde_json::json;

    fn store() -> EventStore {
        let db: Arc<dyn Database> = Arc::new(SqliteDb::in_memory().unwrap());
        let registry = SpecRegistry::new(StorageConfig::new());
        EventStore::open(db, &registry).unwrap()
    }

    fn event(id: &str, seconds: i64) -> StoredEvent {
        StoredEvent::new(id, "order.Placed", "p-1", Timestamp::new(seconds, 0))
            .with_body(json!({ "total": 10 }))
    }

    #[test]
    fn test_append_then_read_round_trip() {
        let store = store();
        let event = event("e-1", 100);
        store.append(&event).unwrap();
        assert_eq!(store.read("e-1").unwrap(), Some(event));
        assert_eq!(store.read("e-2").unwrap(), None);
    }

    #[test]
    fn test_stream_is_time_ascending() {
        let store = store();
        store.append(&event("e-3", 300)).unwrap();
        store.append(&event("e-1", 100)).unwrap();
        store.append(&event("e-2", 200)).unwrap();
        let ids: Vec<String> = store
            .read_stream(&EventStreamQuery::new())
            .unwrap()
            .into_vec()
            .unwrap()
            .into_iter()
            .map(|e| e.event_id)
            .collect();
        assert_eq!(ids, ["e-1", "e-2", "e-3"]);
    }

    #[test]
    fn test_tallies_round_trip() {
        let store = store();
        assert_eq!(store.event_count("p-1").unwrap(), 0);
        store.update_event_count("p-1", 4).unwrap();
        assert_eq!(store.event_count("p-1").unwrap(), 4);
    }

    #[test]
    fn test_closed_store_refuses_every_operation() {
        let store = store();
        store.append(&event("e-1", 100)).unwrap();
        store.close().unwrap();
        assert!(store.append(&event("e-2", 200)).is_err());
        assert!(store.read("e-1").is_err());
        assert!(store.read_stream(&EventStreamQuery::new()).is_err());
        assert!(store.event_count("p-1").is_err());
        let err = store.close().unwrap_err();
        assert!(err.downcast_ref::<ResourceClosedError>().is_some());
    }

    #[test]
    fn test_close_force_closes_open_streams() {
        let store = store();
        store.append(&event("e-1", 100)).unwrap();
        let mut cursor = store.read_stream(&EventStreamQuery::new()).unwrap();
        store.close().unwrap();
        assert!(cursor.has_next().unwrap_err().downcast_ref::<ResourceClosedError>().is_some());
    }
}
