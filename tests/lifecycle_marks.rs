//! # Lifecycle Mark Tests
//!
//! Archived/deleted marks live beside the record, not in it: an id can
//! be marked before its record exists, and a record can exist without
//! marks. These tests cover both placements, the default sub-table and
//! the opt-in main-table columns.
//!
//! ## Test Categories
//!
//! 1. **Sub-Table Tests**: The default `<table>_visibility` placement
//! 2. **Default-State Tests**: Unset marks read as absent
//! 3. **Cleanup Tests**: Deletes take the marks with them
//! 4. **Main-Table Tests**: Marks as columns of the record table
//!
//! ## Usage
//!
//! ```sh
//! cargo test --test lifecycle_marks -- --nocapture
//! ```

use relstore::{
    ColumnDef, ConfigurationError, FieldValue, FlagsPlacement, Id, IdKind, LifecycleFlags,
    LogicalType, RecordStorage, RecordType, SpecRegistry, SqliteDb, StorageConfig,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    title: String,
}

impl RecordType for Document {
    fn qualified_name() -> &'static str {
        "docs.Document"
    }

    fn id_kind() -> IdKind {
        IdKind::Text
    }

    fn columns() -> Vec<ColumnDef<Self>> {
        Vec::new()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
struct InlineDocument {
    #[serde(default)]
    title: String,
    #[serde(default)]
    archived: bool,
    #[serde(default)]
    deleted: bool,
}

impl RecordType for InlineDocument {
    fn qualified_name() -> &'static str {
        "docs.InlineDocument"
    }

    fn id_kind() -> IdKind {
        IdKind::Text
    }

    fn columns() -> Vec<ColumnDef<Self>> {
        vec![
            ColumnDef::new("archived", LogicalType::Boolean, |d: &InlineDocument| {
                FieldValue::Bool(d.archived)
            }),
            ColumnDef::new("deleted", LogicalType::Boolean, |d: &InlineDocument| {
                FieldValue::Bool(d.deleted)
            }),
        ]
    }
}

fn doc(title: &str) -> Document {
    Document { title: title.to_string() }
}

fn sub_table_storage() -> RecordStorage<Document> {
    let db = Arc::new(SqliteDb::in_memory().expect("Failed to open in-memory database"));
    let registry = SpecRegistry::new(StorageConfig::new());
    RecordStorage::open_json(db, &registry).expect("Failed to open storage")
}

fn main_table_storage() -> RecordStorage<InlineDocument> {
    let db = Arc::new(SqliteDb::in_memory().expect("Failed to open in-memory database"));
    let config = StorageConfig::new().with_flags_placement(FlagsPlacement::MainTable);
    let registry = SpecRegistry::new(config);
    RecordStorage::open_json(db, &registry).expect("Failed to open storage")
}

// ============================================================================
// SUB-TABLE TESTS
// ============================================================================

mod sub_table_tests {
    use super::*;

    #[test]
    fn marks_can_precede_the_record() {
        let storage = sub_table_storage();
        let id = Id::from("d-1");

        storage.mark_archived(&id).expect("mark failed");
        assert_eq!(storage.read_flags(&id).expect("read_flags failed"), Some(LifecycleFlags::archived()));
        assert_eq!(storage.read(&id, None).expect("read failed"), None);
        assert!(!storage.exists(&id).expect("exists failed"));
    }

    #[test]
    fn marks_survive_the_record_arriving() {
        let storage = sub_table_storage();
        let id = Id::from("d-1");

        storage.mark_deleted(&id).expect("mark failed");
        storage.write(&id, &doc("quarterly report")).expect("write failed");

        assert_eq!(storage.read_flags(&id).expect("read_flags failed"), Some(LifecycleFlags::deleted()));
        assert_eq!(storage.read(&id, None).expect("read failed"), Some(doc("quarterly report")));
    }

    #[test]
    fn marks_accumulate_per_id() {
        let storage = sub_table_storage();
        let id = Id::from("d-1");

        storage.mark_archived(&id).expect("mark failed");
        storage.mark_deleted(&id).expect("mark failed");
        assert_eq!(
            storage.read_flags(&id).expect("read_flags failed"),
            Some(LifecycleFlags::new(true, true))
        );
    }

    #[test]
    fn write_flags_round_trips() {
        let storage = sub_table_storage();
        let id = Id::from("d-1");

        storage.write_flags(&id, LifecycleFlags::new(true, false)).expect("write_flags failed");
        assert_eq!(
            storage.read_flags(&id).expect("read_flags failed"),
            Some(LifecycleFlags::archived())
        );

        storage.write_flags(&id, LifecycleFlags::new(false, true)).expect("rewrite failed");
        assert_eq!(
            storage.read_flags(&id).expect("read_flags failed"),
            Some(LifecycleFlags::deleted())
        );
    }
}

// ============================================================================
// DEFAULT-STATE TESTS
// ============================================================================

mod default_state_tests {
    use super::*;

    #[test]
    fn unmarked_id_has_no_flags() {
        let storage = sub_table_storage();
        assert_eq!(storage.read_flags(&Id::from("d-404")).expect("read_flags failed"), None);
    }

    #[test]
    fn record_without_marks_has_no_flags() {
        let storage = sub_table_storage();
        let id = Id::from("d-1");
        storage.write(&id, &doc("plain")).expect("write failed");
        assert_eq!(storage.read_flags(&id).expect("read_flags failed"), None);
    }

    #[test]
    fn writing_unset_flags_reads_back_as_absent() {
        let storage = sub_table_storage();
        let id = Id::from("d-1");
        storage.write_flags(&id, LifecycleFlags::new(false, false)).expect("write_flags failed");
        assert_eq!(storage.read_flags(&id).expect("read_flags failed"), None);
    }

    #[test]
    fn clearing_both_marks_reads_back_as_absent() {
        let storage = sub_table_storage();
        let id = Id::from("d-1");
        storage.mark_archived(&id).expect("mark failed");
        storage.write_flags(&id, LifecycleFlags::new(false, false)).expect("clear failed");
        assert_eq!(storage.read_flags(&id).expect("read_flags failed"), None);
    }
}

// ============================================================================
// CLEANUP TESTS
// ============================================================================

mod cleanup_tests {
    use super::*;

    #[test]
    fn delete_removes_record_and_marks() {
        let storage = sub_table_storage();
        let id = Id::from("d-1");
        storage.write(&id, &doc("ephemeral")).expect("write failed");
        storage.mark_archived(&id).expect("mark failed");

        assert!(storage.delete(&id).expect("delete failed"));
        assert_eq!(storage.read_flags(&id).expect("read_flags failed"), None);
    }

    #[test]
    fn delete_clears_marks_even_without_a_record() {
        let storage = sub_table_storage();
        let id = Id::from("d-1");
        storage.mark_deleted(&id).expect("mark failed");

        assert!(!storage.delete(&id).expect("delete failed"), "no record row existed");
        assert_eq!(storage.read_flags(&id).expect("read_flags failed"), None);
    }

    #[test]
    fn delete_all_clears_every_mark() {
        let storage = sub_table_storage();
        storage.write(&Id::from("d-1"), &doc("a")).expect("write failed");
        storage.mark_archived(&Id::from("d-1")).expect("mark failed");
        storage.mark_archived(&Id::from("d-2")).expect("mark failed");

        storage.delete_all().expect("delete_all failed");
        assert_eq!(storage.read_flags(&Id::from("d-1")).expect("read_flags failed"), None);
        assert_eq!(storage.read_flags(&Id::from("d-2")).expect("read_flags failed"), None);
    }
}

// ============================================================================
// MAIN-TABLE TESTS
// ============================================================================

mod main_table_tests {
    use super::*;

    #[test]
    fn placement_requires_declared_flag_columns() {
        let db = Arc::new(SqliteDb::in_memory().expect("Failed to open in-memory database"));
        let config = StorageConfig::new().with_flags_placement(FlagsPlacement::MainTable);
        let registry = SpecRegistry::new(config);

        let err = RecordStorage::<Document>::open_json(db, &registry)
            .expect_err("open must fail without flag columns");
        assert!(matches!(
            err.downcast_ref::<ConfigurationError>(),
            Some(ConfigurationError::MissingFlagColumns { .. })
        ));
    }

    #[test]
    fn marks_before_the_record_stub_a_row() {
        let storage = main_table_storage();
        let id = Id::from("d-1");

        storage.mark_archived(&id).expect("mark failed");
        assert_eq!(
            storage.read_flags(&id).expect("read_flags failed"),
            Some(LifecycleFlags::archived())
        );
        // the stub row has no payload, so the record itself is absent
        assert_eq!(storage.read(&id, None).expect("read failed"), None);
    }

    #[test]
    fn record_writes_carry_their_own_marks() {
        let storage = main_table_storage();
        let id = Id::from("d-1");

        storage.mark_archived(&id).expect("mark failed");
        let mut record = InlineDocument { title: "inline".to_string(), ..Default::default() };
        storage.write(&id, &record).expect("write failed");
        assert_eq!(
            storage.read_flags(&id).expect("read_flags failed"),
            None,
            "a record write rewrites the mark columns from the record's fields"
        );

        record.archived = true;
        storage.write(&id, &record).expect("rewrite failed");
        assert_eq!(
            storage.read_flags(&id).expect("read_flags failed"),
            Some(LifecycleFlags::archived())
        );
    }

    #[test]
    fn delete_removes_the_row_and_with_it_the_marks() {
        let storage = main_table_storage();
        let id = Id::from("d-1");
        let record = InlineDocument {
            title: "inline".to_string(),
            archived: true,
            deleted: false,
        };
        storage.write(&id, &record).expect("write failed");

        assert!(storage.delete(&id).expect("delete failed"));
        assert_eq!(storage.read_flags(&id).expect("read_flags failed"), None);
        assert_eq!(storage.read(&id, None).expect("read failed"), None);
    }
}
