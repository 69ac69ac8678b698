//! # relstore - Typed Records on Relational Tables
//!
//! relstore persists typed records in SQL tables. Each record type maps
//! to one table holding the identifier, the opaque payload bytes, and a
//! set of scalar columns derived from the record's fields, so rows stay
//! queryable by plain SQL while the payload remains the source of truth.
//!
//! ## Quick Start
//!
//! ```ignore
//! use relstore::{Id, RecordStorage, SpecRegistry, SqliteDb, StorageConfig};
//! use std::sync::Arc;
//!
//! let db = Arc::new(SqliteDb::open("./records.db")?);
//! let registry = SpecRegistry::new(StorageConfig::new());
//! let storage = RecordStorage::<Order>::open_json(db, &registry)?;
//!
//! storage.write(&Id::from(42), &order)?;
//! let found = storage.read(&Id::from(42), None)?;
//! ```
//!
//! ## Architecture
//!
//! relstore uses a layered architecture:
//!
//! ```text
//! ┌───────────────────────────────────────────┐
//! │ Storage Front (RecordStorage / EventStore) │
//! ├───────────────────────────────────────────┤
//! │   Record Engine (SQL composition, codec)   │
//! ├─────────────────────┬─────────────────────┤
//! │   Lifecycle Flags   │  Event Stream Query  │
//! ├─────────────────────┴─────────────────────┤
//! │      Table Specs (record type → table)     │
//! ├───────────────────────────────────────────┤
//! │  Backend Traits (Database / Connection)    │
//! ├───────────────────────────────────────────┤
//! │              SQLite (rusqlite)             │
//! └───────────────────────────────────────────┘
//! ```
//!
//! ## Table Layout
//!
//! A record type named `shop.orders.Order` lands in tables derived from
//! its qualified name:
//!
//! ```text
//! shop_orders_order             # id, payload, derived columns
//! shop_orders_order_visibility  # id, archived, deleted
//! events                        # stored events, queryable by stream
//! events_event_count            # per-producer event counters
//! ```
//!
//! ## Module Overview
//!
//! - [`store`]: Storage front joining records, flags, and cursors
//! - [`engine`]: Record table operations and payload codecs
//! - [`events`]: Event persistence with time and producer predicates
//! - [`lifecycle`]: Archived/deleted marks, independent of record rows
//! - [`spec`]: Record types, derived columns, resolved table specs
//! - [`backend`]: Connection-per-operation database abstraction
//! - [`cursor`]: Decoded result streams with explicit close discipline

pub mod backend;
pub mod config;
pub mod cursor;
pub mod engine;
pub mod error;
pub mod events;
pub mod id;
pub mod lifecycle;
pub mod mapping;
pub mod observe;
pub mod spec;
pub mod store;
pub mod types;

pub use backend::SqliteDb;
pub use config::{FlagsPlacement, StorageConfig};
pub use cursor::Cursor;
pub use engine::{FieldMask, JsonCodec, RecordCodec};
pub use error::{ConfigurationError, ResourceClosedError, StorageError};
pub use events::{EventClause, EventStore, EventStreamQuery, FieldFilter, StoredEvent};
pub use id::{Id, IdKind, StructuredKey};
pub use lifecycle::LifecycleFlags;
pub use observe::{Observer, ObserverHandle, StorageEvent};
pub use spec::{ColumnDef, RecordType, SpecRegistry, TableSpec};
pub use store::RecordStorage;
pub use types::{ColumnType, FieldValue, LogicalType, StoredValue, Timestamp};
