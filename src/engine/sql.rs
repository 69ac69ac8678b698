//! SQL text composition. Every statement is parameterized with `?`
//! placeholders; identifiers are validated before they get here (see
//! `spec::validate_table_name`), so plain interpolation is safe.

use crate::spec::ID_COLUMN;
use std::fmt::Write;

/// One column of a CREATE TABLE statement.
#[derive(Debug, Clone)]
pub(crate) struct DdlColumn {
    pub name: String,
    pub ddl_type: &'static str,
    pub not_null: bool,
    pub default: Option<&'static str>,
}

impl DdlColumn {
    pub(crate) fn new(name: impl Into<String>, ddl_type: &'static str) -> Self {
        DdlColumn { name: name.into(), ddl_type, not_null: false, default: None }
    }

    pub(crate) fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub(crate) fn with_default(mut self, literal: &'static str) -> Self {
        self.default = Some(literal);
        self
    }
}

/// `CREATE TABLE IF NOT EXISTS`, primary-keyed on the id column.
pub(crate) fn create_table(table: &str, columns: &[DdlColumn]) -> String {
    let mut sql = format!("CREATE TABLE IF NOT EXISTS {table} (");
    for (i, col) in columns.iter().enumerate() {
        if i > 0 {
            sql.push_str(", ");
        }
        let _ = write!(sql, "{} {}", col.name, col.ddl_type);
        if col.not_null {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = col.default {
            let _ = write!(sql, " DEFAULT {default}");
        }
    }
    let _ = write!(sql, ", PRIMARY KEY ({ID_COLUMN}));");
    sql
}

pub(crate) fn contains(table: &str) -> String {
    format!("SELECT 1 FROM {table} WHERE {ID_COLUMN} = ? LIMIT 1;")
}

pub(crate) fn select_by_id(table: &str, columns: &[&str]) -> String {
    format!("SELECT {} FROM {table} WHERE {ID_COLUMN} = ?;", columns.join(", "))
}

pub(crate) fn select_all(table: &str, columns: &[&str]) -> String {
    format!("SELECT {} FROM {table};", columns.join(", "))
}

pub(crate) fn select_in(table: &str, columns: &[&str], ids: usize) -> String {
    format!(
        "SELECT {} FROM {table} WHERE {ID_COLUMN} IN ({});",
        columns.join(", "),
        placeholders(ids)
    )
}

pub(crate) fn insert(table: &str, columns: &[&str]) -> String {
    format!(
        "INSERT INTO {table} ({}) VALUES ({});",
        columns.join(", "),
        placeholders(columns.len())
    )
}

pub(crate) fn update(table: &str, set_columns: &[&str]) -> String {
    let assignments: Vec<String> = set_columns.iter().map(|c| format!("{c} = ?")).collect();
    format!("UPDATE {table} SET {} WHERE {ID_COLUMN} = ?;", assignments.join(", "))
}

pub(crate) fn delete(table: &str) -> String {
    format!("DELETE FROM {table} WHERE {ID_COLUMN} = ?;")
}

pub(crate) fn delete_all(table: &str) -> String {
    format!("DELETE FROM {table};")
}

pub(crate) fn placeholders(count: usize) -> String {
    let mut out = String::with_capacity(count.saturating_mul(3));
    for i in 0..count {
        if i > 0 {
            out.push_str(", ");
        }
        out.push('?');
    }
    out
}
