//! # Identifier Normalization
//!
//! Record identifiers come in four kinds, closed by construction:
//!
//! | Kind | Domain value | Stored as |
//! |------|--------------|-----------|
//! | Int64 | `i64` | BIGINT column |
//! | Int32 | `i32` | INT column |
//! | Text | `String` | VARCHAR(255) column |
//! | StructuredKey | any `Serialize` value | VARCHAR(255) of canonical JSON |
//!
//! Every table declares exactly one [`IdKind`]; normalizing an [`Id`] of
//! a different kind is a configuration error caught on first use, not a
//! per-call cost in the happy path. Normalization is deterministic and
//! injective within a kind. Structured keys are canonical compact JSON:
//! equality-preserving, with no ordering guarantee.

use crate::error::ConfigurationError;
use crate::types::{ColumnType, StoredValue};
use eyre::{Result, WrapErr};
use serde::Serialize;
use smallvec::SmallVec;
use std::fmt;

/// A structured-message identifier normalized to canonical compact JSON
/// text. Two keys are equal iff their canonical texts are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructuredKey {
    text: String,
}

impl StructuredKey {
    /// Canonicalizes any serializable value into key text.
    pub fn of<T: Serialize>(value: &T) -> Result<Self> {
        let text = serde_json::to_string(value).wrap_err("canonicalizing structured key")?;
        Ok(StructuredKey { text })
    }

    /// Wraps already-canonical key text, as read back from storage.
    pub fn from_text(text: impl Into<String>) -> Self {
        StructuredKey { text: text.into() }
    }

    pub fn as_text(&self) -> &str {
        &self.text
    }
}

/// A record identifier of one of the four recognized kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Id {
    Int64(i64),
    Int32(i32),
    Text(String),
    Key(StructuredKey),
}

impl Id {
    pub fn kind(&self) -> IdKind {
        match self {
            Id::Int64(_) => IdKind::Int64,
            Id::Int32(_) => IdKind::Int32,
            Id::Text(_) => IdKind::Text,
            Id::Key(_) => IdKind::StructuredKey,
        }
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::Int64(v) => write!(f, "{v}"),
            Id::Int32(v) => write!(f, "{v}"),
            Id::Text(s) => write!(f, "{s}"),
            Id::Key(k) => write!(f, "{}", k.as_text()),
        }
    }
}

impl From<i64> for Id {
    fn from(v: i64) -> Self {
        Id::Int64(v)
    }
}

impl From<i32> for Id {
    fn from(v: i32) -> Self {
        Id::Int32(v)
    }
}

impl From<&str> for Id {
    fn from(v: &str) -> Self {
        Id::Text(v.to_string())
    }
}

impl From<String> for Id {
    fn from(v: String) -> Self {
        Id::Text(v)
    }
}

impl From<StructuredKey> for Id {
    fn from(v: StructuredKey) -> Self {
        Id::Key(v)
    }
}

/// The identifier kind a table is declared with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdKind {
    Int64,
    Int32,
    Text,
    StructuredKey,
}

impl IdKind {
    pub fn name(self) -> &'static str {
        match self {
            IdKind::Int64 => "Int64",
            IdKind::Int32 => "Int32",
            IdKind::Text => "Text",
            IdKind::StructuredKey => "StructuredKey",
        }
    }

    /// Column type of the identifier column. Resolved here, not through
    /// the generic column mapping.
    pub fn storage_type(self) -> ColumnType {
        match self {
            IdKind::Int64 => ColumnType::Long,
            IdKind::Int32 => ColumnType::Int,
            IdKind::Text => ColumnType::String255,
            IdKind::StructuredKey => ColumnType::String255,
        }
    }

    /// Converts a domain identifier into its stored form. Fails with a
    /// configuration error when the identifier is of another kind.
    pub fn normalize(self, id: &Id) -> Result<StoredValue> {
        match (self, id) {
            (IdKind::Int64, Id::Int64(v)) => Ok(StoredValue::Int(*v)),
            (IdKind::Int32, Id::Int32(v)) => Ok(StoredValue::Int(i64::from(*v))),
            (IdKind::Text, Id::Text(s)) => Ok(StoredValue::Text(s.clone())),
            (IdKind::StructuredKey, Id::Key(k)) => Ok(StoredValue::Text(k.as_text().to_string())),
            (expected, actual) => Err(ConfigurationError::IdKindMismatch {
                expected: expected.name(),
                actual: actual.kind().name(),
            }
            .into()),
        }
    }

    /// Normalizes a batch, preserving order and duplicates.
    pub fn normalize_many<'a>(
        self,
        ids: impl IntoIterator<Item = &'a Id>,
    ) -> Result<SmallVec<[StoredValue; 8]>> {
        let mut out = SmallVec::new();
        for id in ids {
            out.push(self.normalize(id)?);
        }
        Ok(out)
    }

    /// Reads a stored identifier column back into the tagged union.
    pub fn denormalize(self, value: StoredValue) -> Result<Id> {
        match self {
            IdKind::Int64 => Ok(Id::Int64(value.as_i64()?)),
            IdKind::Int32 => Ok(Id::Int32(value.as_i32()?)),
            IdKind::Text => Ok(Id::Text(value.into_text()?)),
            IdKind::StructuredKey => Ok(Id::Key(StructuredKey::from_text(value.into_text()?))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct ProjectId {
        org: String,
        seq: u32,
    }

    #[test]
    fn test_each_kind_normalizes_to_its_storage_type() {
        assert_eq!(
            IdKind::Int64.normalize(&Id::Int64(9)).unwrap(),
            StoredValue::Int(9)
        );
        assert_eq!(
            IdKind::Int32.normalize(&Id::Int32(-3)).unwrap(),
            StoredValue::Int(-3)
        );
        assert_eq!(
            IdKind::Text.normalize(&Id::from("a-7")).unwrap(),
            StoredValue::Text("a-7".into())
        );
        assert_eq!(IdKind::Int64.storage_type(), ColumnType::Long);
        assert_eq!(IdKind::Int32.storage_type(), ColumnType::Int);
        assert_eq!(IdKind::Text.storage_type(), ColumnType::String255);
        assert_eq!(IdKind::StructuredKey.storage_type(), ColumnType::String255);
    }

    #[test]
    fn test_kind_mismatch_is_a_configuration_error() {
        let err = IdKind::Int64.normalize(&Id::from("oops")).unwrap_err();
        let config = err.downcast_ref::<ConfigurationError>();
        assert!(matches!(
            config,
            Some(ConfigurationError::IdKindMismatch { expected: "Int64", actual: "Text" })
        ));
    }

    #[test]
    fn test_structured_key_is_equality_preserving() {
        let a = StructuredKey::of(&ProjectId { org: "acme".into(), seq: 4 }).unwrap();
        let b = StructuredKey::of(&ProjectId { org: "acme".into(), seq: 4 }).unwrap();
        let c = StructuredKey::of(&ProjectId { org: "acme".into(), seq: 5 }).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);

        let stored = IdKind::StructuredKey.normalize(&Id::Key(a.clone())).unwrap();
        let back = IdKind::StructuredKey.denormalize(stored).unwrap();
        assert_eq!(back, Id::Key(a));
    }

    #[test]
    fn test_normalize_many_preserves_order_and_duplicates() {
        let ids = [Id::from("b"), Id::from("a"), Id::from("b")];
        let stored = IdKind::Text.normalize_many(&ids).unwrap();
        assert_eq!(
            stored.as_slice(),
            &[
                StoredValue::Text("b".into()),
                StoredValue::Text("a".into()),
                StoredValue::Text("b".into()),
            ]
        );
    }

    #[test]
    fn test_denormalize_round_trips_integer_kinds() {
        let id = IdKind::Int32.denormalize(StoredValue::Int(7)).unwrap();
        assert_eq!(id, Id::Int32(7));
        assert!(IdKind::Int32.denormalize(StoredValue::Int(i64::MAX)).is_err());
    }
}
