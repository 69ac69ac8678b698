//! # Error Taxonomy
//!
//! Three error kinds cover every failure this crate reports:
//!
//! | Kind | Meaning | Retry |
//! |------|---------|-------|
//! | [`ConfigurationError`] | Invalid setup: unmapped column type, bad table name, conflicting columns | Never, fatal at setup |
//! | [`StorageError`] | A database driver call failed; carries the original cause | Caller's policy |
//! | [`ResourceClosedError`] | A cursor, storage, or connection was used after close | Never, programming error |
//!
//! All three flow through `eyre::Report` and can be recovered with
//! `report.downcast_ref::<StorageError>()` and friends. "Not found" is
//! never an error anywhere in the crate; reads of absent rows return
//! `None`. The crate performs no automatic retries.

use std::fmt;

/// Fatal setup-time misconfiguration. Raised while resolving mappings,
/// building table specifications, or assembling a storage front, never
/// during steady-state reads and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// The active column mapping has no rule for this logical type.
    UnsupportedColumnType { logical: &'static str },
    /// An identifier of one kind was passed to a table declared with another.
    IdKindMismatch { expected: &'static str, actual: &'static str },
    /// Table name is blank or contains characters unsafe for DDL.
    InvalidTableName { name: String },
    /// Column name is blank or contains characters unsafe for DDL.
    InvalidColumnName { name: String },
    /// Two column declarations share a name within one table.
    DuplicateColumn { table: String, column: String },
    /// Main-table flag placement requires `archived` and `deleted` columns.
    MissingFlagColumns { table: String },
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationError::UnsupportedColumnType { logical } => {
                write!(f, "no column mapping rule for logical type {logical}")
            }
            ConfigurationError::IdKindMismatch { expected, actual } => {
                write!(f, "identifier kind mismatch: table declares {expected}, got {actual}")
            }
            ConfigurationError::InvalidTableName { name } => {
                write!(f, "invalid table name {name:?}")
            }
            ConfigurationError::InvalidColumnName { name } => {
                write!(f, "invalid column name {name:?}")
            }
            ConfigurationError::DuplicateColumn { table, column } => {
                write!(f, "duplicate column {column:?} in table {table:?}")
            }
            ConfigurationError::MissingFlagColumns { table } => {
                write!(
                    f,
                    "table {table:?} must declare boolean `archived` and `deleted` columns \
                     for main-table flag placement"
                )
            }
        }
    }
}

impl std::error::Error for ConfigurationError {}

/// A database-level failure wrapped with the statement context that
/// produced it. Callers never see raw driver errors.
#[derive(Debug)]
pub struct StorageError {
    context: String,
    cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl StorageError {
    pub fn new(context: impl Into<String>) -> Self {
        StorageError { context: context.into(), cause: None }
    }

    pub fn with_cause(
        context: impl Into<String>,
        cause: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        StorageError { context: context.into(), cause: Some(cause.into()) }
    }

    pub fn context(&self) -> &str {
        &self.context
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "storage failure: {}", self.context)
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_deref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Use of a cursor, storage, or connection after it was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceClosedError {
    pub resource: &'static str,
}

impl ResourceClosedError {
    pub fn cursor() -> Self {
        ResourceClosedError { resource: "cursor" }
    }

    pub fn storage() -> Self {
        ResourceClosedError { resource: "storage" }
    }

    pub fn connection() -> Self {
        ResourceClosedError { resource: "connection" }
    }
}

impl fmt::Display for ResourceClosedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} is closed and can no longer be used", self.resource)
    }
}

impl std::error::Error for ResourceClosedError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_names_offending_type() {
        let err = ConfigurationError::UnsupportedColumnType { logical: "Float64" };
        assert!(err.to_string().contains("Float64"));
    }

    #[test]
    fn test_storage_error_preserves_cause() {
        let cause = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = StorageError::with_cause("executing `SELECT 1`", cause);
        assert!(err.to_string().contains("SELECT 1"));
        let source = std::error::Error::source(&err);
        assert!(source.is_some_and(|s| s.to_string().contains("disk gone")));
    }

    #[test]
    fn test_errors_downcast_through_eyre() {
        fn fails() -> eyre::Result<()> {
            Err(ResourceClosedError::cursor())?
        }
        let report = fails().unwrap_err();
        let closed = report.downcast_ref::<ResourceClosedError>();
        assert_eq!(closed, Some(&ResourceClosedError::cursor()));
    }
}
