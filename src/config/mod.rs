//! # Storage Configuration
//!
//! [`StorageConfig`] collects everything a storage front needs before
//! first use: the dialect profile, the default column mapping, per-type
//! table-name and mapping overrides, lifecycle-flag placement, and the
//! optional observer. Configuration is plain data built with chainable
//! `with_*` methods; freezing it into a `SpecRegistry` makes it
//! immutable and enables the per-type memoization.

use crate::mapping::{ColumnMapping, DefaultMapping, TypeProfile};
use crate::observe::ObserverHandle;
use hashbrown::HashMap;
use std::any::TypeId;
use std::sync::Arc;

/// Where lifecycle flags live relative to the main record table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FlagsPlacement {
    /// A dedicated `<table>_visibility` sub-table. The default.
    #[default]
    SubTable,
    /// Two boolean columns on the main table itself. The record type
    /// must declare `archived` and `deleted` columns.
    MainTable,
}

/// Pre-first-use configuration for tables and storage fronts.
#[derive(Clone)]
pub struct StorageConfig {
    profile: TypeProfile,
    default_mapping: Arc<dyn ColumnMapping>,
    table_names: HashMap<TypeId, String>,
    mappings: HashMap<TypeId, Arc<dyn ColumnMapping>>,
    flags_placement: FlagsPlacement,
    observer: ObserverHandle,
}

impl StorageConfig {
    pub fn new() -> Self {
        StorageConfig {
            profile: TypeProfile::default(),
            default_mapping: Arc::new(DefaultMapping::new()),
            table_names: HashMap::new(),
            mappings: HashMap::new(),
            flags_placement: FlagsPlacement::default(),
            observer: ObserverHandle::none(),
        }
    }

    /// Dialect profile used to render DDL. Defaults to the SQLite
    /// profile, matching the bundled backend.
    pub fn with_profile(mut self, profile: TypeProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Mapping applied to tables without a per-type override.
    pub fn with_default_mapping(mut self, mapping: Arc<dyn ColumnMapping>) -> Self {
        self.default_mapping = mapping;
        self
    }

    /// Overrides the derived table name for one record type.
    pub fn with_table_name<R: 'static>(mut self, name: impl Into<String>) -> Self {
        self.table_names.insert(TypeId::of::<R>(), name.into());
        self
    }

    /// Overrides the column mapping for one record type.
    pub fn with_mapping<R: 'static>(mut self, mapping: Arc<dyn ColumnMapping>) -> Self {
        self.mappings.insert(TypeId::of::<R>(), mapping);
        self
    }

    pub fn with_flags_placement(mut self, placement: FlagsPlacement) -> Self {
        self.flags_placement = placement;
        self
    }

    pub fn with_observer(mut self, observer: ObserverHandle) -> Self {
        self.observer = observer;
        self
    }

    pub fn profile(&self) -> TypeProfile {
        self.profile
    }

    pub fn flags_placement(&self) -> FlagsPlacement {
        self.flags_placement
    }

    pub fn observer(&self) -> &ObserverHandle {
        &self.observer
    }

    pub(crate) fn default_mapping(&self) -> &Arc<dyn ColumnMapping> {
        &self.default_mapping
    }

    pub(crate) fn table_name_override(&self, type_id: TypeId) -> Option<&str> {
        self.table_names.get(&type_id).map(String::as_str)
    }

    pub(crate) fn mapping_override(&self, type_id: TypeId) -> Option<&Arc<dyn ColumnMapping>> {
        self.mappings.get(&type_id)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("profile", &self.profile.name())
            .field("table_name_overrides", &self.table_names.len())
            .field("mapping_overrides", &self.mappings.len())
            .field("flags_placement", &self.flags_placement)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Order;

    #[test]
    fn test_overrides_are_keyed_by_type() {
        let config = StorageConfig::new().with_table_name::<Order>("orders_v2");
        assert_eq!(
            config.table_name_override(TypeId::of::<Order>()),
            Some("orders_v2")
        );
        assert_eq!(config.table_name_override(TypeId::of::<String>()), None);
    }

    #[test]
    fn test_defaults() {
        let config = StorageConfig::new();
        assert_eq!(config.profile().name(), "sqlite");
        assert_eq!(config.flags_placement(), FlagsPlacement::SubTable);
        assert!(!config.observer().is_active());
    }
}
