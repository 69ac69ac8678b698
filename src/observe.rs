//! Observability sink. Components take an optional [`Observer`] at
//! construction instead of writing to any process-wide logger; the
//! default handle is inert and costs nothing to carry.

use std::fmt;
use std::sync::Arc;

/// Receives storage events. Implementations must tolerate concurrent
/// calls and must not block for long; they run inline with operations.
pub trait Observer: Send + Sync {
    fn on_event(&self, event: &StorageEvent);
}

/// What happened, with enough context to attribute it to a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageEvent {
    TableCreated { table: String },
    RecordInserted { table: String },
    RecordUpdated { table: String },
    RecordDeleted { table: String },
    CursorOpened { table: String },
    CursorCloseFailed { detail: String },
    CursorsForceClosed { closed: usize, failed: usize },
    StorageClosed { table: String },
}

impl fmt::Display for StorageEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageEvent::TableCreated { table } => write!(f, "table {table} created"),
            StorageEvent::RecordInserted { table } => write!(f, "insert into {table}"),
            StorageEvent::RecordUpdated { table } => write!(f, "update in {table}"),
            StorageEvent::RecordDeleted { table } => write!(f, "delete from {table}"),
            StorageEvent::CursorOpened { table } => write!(f, "cursor opened on {table}"),
            StorageEvent::CursorCloseFailed { detail } => {
                write!(f, "cursor close failed: {detail}")
            }
            StorageEvent::CursorsForceClosed { closed, failed } => {
                write!(f, "force-closed {closed} cursors ({failed} failed)")
            }
            StorageEvent::StorageClosed { table } => write!(f, "storage for {table} closed"),
        }
    }
}

/// Shareable, optionally-absent observer. `emit` builds the event only
/// when a sink is attached.
#[derive(Clone, Default)]
pub struct ObserverHandle {
    sink: Option<Arc<dyn Observer>>,
}

impl ObserverHandle {
    pub fn none() -> Self {
        ObserverHandle { sink: None }
    }

    pub fn new(sink: Arc<dyn Observer>) -> Self {
        ObserverHandle { sink: Some(sink) }
    }

    pub fn is_active(&self) -> bool {
        self.sink.is_some()
    }

    pub fn emit(&self, make: impl FnOnce() -> StorageEvent) {
        if let Some(sink) = &self.sink {
            sink.on_event(&make());
        }
    }
}

impl fmt::Debug for ObserverHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverHandle").field("active", &self.is_active()).finish()
    }
}
