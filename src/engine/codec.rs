//! # Payload Codec
//!
//! Records travel through the engine as opaque bytes; a [`RecordCodec`]
//! is the only party that understands their structure. Besides plain
//! encode and decode it supports two structural operations the engine
//! needs: projecting a payload through a [`FieldMask`] and looking up a
//! single field for predicate evaluation.
//!
//! [`JsonCodec`] serves any `serde` type. Masked decoding omits fields
//! from the payload before it reaches `from_bytes`, so record types
//! read through a mask must tolerate missing fields (`#[serde(default)]`
//! or `Option` fields).

use eyre::{Result, WrapErr};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::marker::PhantomData;

/// Field paths to retain when projecting a payload. Paths address
/// nested fields with dots (`"owner.name"`); a path keeps its whole
/// subtree. The empty mask keeps everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMask {
    paths: Vec<String>,
}

impl FieldMask {
    pub fn new(paths: impl IntoIterator<Item = impl Into<String>>) -> Self {
        FieldMask { paths: paths.into_iter().map(Into::into).collect() }
    }

    pub fn empty() -> Self {
        FieldMask::default()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    fn keeps(&self, path: &str) -> bool {
        self.paths.iter().any(|p| p == path)
    }

    fn descends_into(&self, path: &str) -> bool {
        self.paths.iter().any(|p| {
            p.len() > path.len() && p.starts_with(path) && p.as_bytes()[path.len()] == b'.'
        })
    }
}

/// Encoding, decoding, and structural access for one record type.
pub trait RecordCodec<R>: Send + Sync {
    fn to_bytes(&self, record: &R) -> Result<Vec<u8>>;

    fn from_bytes(&self, bytes: &[u8]) -> Result<R>;

    /// Rewrites a payload keeping only the masked fields. An empty mask
    /// returns the payload unchanged.
    fn apply_mask(&self, bytes: &[u8], mask: &FieldMask) -> Result<Vec<u8>>;

    /// Reads one field out of a payload without decoding the record.
    /// `None` when the path does not resolve.
    fn field_at(&self, bytes: &[u8], path: &str) -> Result<Option<Value>>;
}

/// JSON payload codec for `serde` record types.
pub struct JsonCodec<R> {
    _marker: PhantomData<fn() -> R>,
}

impl<R> JsonCodec<R> {
    pub fn new() -> Self {
        JsonCodec { _marker: PhantomData }
    }
}

impl<R> Default for JsonCodec<R> {
    fn default() -> Self {
        JsonCodec::new()
    }
}

impl<R> std::fmt::Debug for JsonCodec<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("JsonCodec")
    }
}

impl<R> RecordCodec<R> for JsonCodec<R>
where
    R: Serialize + DeserializeOwned + Send + Sync,
{
    fn to_bytes(&self, record: &R) -> Result<Vec<u8>> {
        serde_json::to_vec(record).wrap_err("encoding record payload")
    }

    fn from_bytes(&self, bytes: &[u8]) -> Result<R> {
        serde_json::from_slice(bytes).wrap_err("decoding record payload")
    }

    fn apply_mask(&self, bytes: &[u8], mask: &FieldMask) -> Result<Vec<u8>> {
        if mask.is_empty() {
            return Ok(bytes.to_vec());
        }
        let root: Value = serde_json::from_slice(bytes).wrap_err("decoding payload for mask")?;
        let masked = match root {
            Value::Object(map) => Value::Object(prune(&map, "", mask)),
            other => other,
        };
        serde_json::to_vec(&masked).wrap_err("encoding masked payload")
    }

    fn field_at(&self, bytes: &[u8], path: &str) -> Result<Option<Value>> {
        let root: Value = serde_json::from_slice(bytes).wrap_err("decoding payload for field")?;
        Ok(field_path(&root, path).cloned())
    }
}

/// Walks a dot path through nested objects.
pub(crate) fn field_path<'v>(root: &'v Value, path: &str) -> Option<&'v Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn prune(
    map: &serde_json::Map<String, Value>,
    prefix: &str,
    mask: &FieldMask,
) -> serde_json::Map<String, Value> {
    let mut kept = serde_json::Map::new();
    for (key, value) in map {
        let path = if prefix.is_empty() { key.clone() } else { format!("{prefix}.{key}") };
        if mask.keeps(&path) {
            kept.insert(key.clone(), value.clone());
        } else if mask.descends_into(&path) {
            if let Value::Object(child) = value {
                kept.insert(key.clone(), Value::Object(prune(child, &path, mask)));
            }
        }
    }
    kept
}
