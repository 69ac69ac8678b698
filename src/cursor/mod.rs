//! # Result Cursors
//!
//! A [`Cursor`] walks a row stream and decodes each row into a typed
//! item. Callers must establish availability before taking an item:
//!
//! ```text
//! while cursor.has_next()? {
//!     let record = cursor.next()?;
//! }
//! ```
//!
//! `next()` without a preceding successful `has_next()` is an error,
//! even when more rows exist. `has_next()` is where decoding happens;
//! the decoded item is parked until `next()` claims it, so repeated
//! availability checks are free.
//!
//! ## Lifecycle
//!
//! | State | `has_next` | `next` | `close` |
//! |-------|-----------|--------|---------|
//! | Open | decodes ahead | parked item | releases the stream |
//! | Exhausted | `false` | error | ok |
//! | Closed | [`ResourceClosedError`] | [`ResourceClosedError`] | [`ResourceClosedError`] |
//!
//! Exhaustion releases the underlying stream eagerly; `close` is only
//! needed to abandon a cursor early. Every cursor a storage hands out
//! is tracked in a [`CursorRegistry`] so closing the storage can
//! force-close stragglers.

use crate::backend::{Row, RowStream};
use crate::error::ResourceClosedError;
use crate::observe::{ObserverHandle, StorageEvent};
use eyre::{bail, Result};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Open,
    Exhausted,
    Closed,
}

/// Shared stream half of a cursor. The registry keeps a weak handle to
/// this so a storage can close cursors it no longer controls.
pub(crate) struct CursorCore {
    stream: Option<Box<dyn RowStream>>,
    state: StreamState,
}

impl CursorCore {
    fn new(stream: Box<dyn RowStream>) -> Self {
        CursorCore { stream: Some(stream), state: StreamState::Open }
    }

    fn fetch(&mut self) -> Result<Option<Row>> {
        match self.state {
            StreamState::Closed => Err(ResourceClosedError::cursor().into()),
            StreamState::Exhausted => Ok(None),
            StreamState::Open => {
                let stream = match self.stream.as_mut() {
                    Some(stream) => stream,
                    None => return Err(ResourceClosedError::cursor().into()),
                };
                match stream.next_row()? {
                    Some(row) => Ok(Some(row)),
                    None => {
                        self.release();
                        self.state = StreamState::Exhausted;
                        Ok(None)
                    }
                }
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        if self.state == StreamState::Closed {
            return Err(ResourceClosedError::cursor().into());
        }
        self.state = StreamState::Closed;
        self.release();
        Ok(())
    }

    /// Closes without complaint if already closed. Used by the registry
    /// and by drop, where double closing is expected.
    fn force_close(&mut self) -> Result<()> {
        if self.state == StreamState::Closed {
            return Ok(());
        }
        self.state = StreamState::Closed;
        self.release();
        Ok(())
    }

    fn release(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.close();
        }
    }

    fn is_closed(&self) -> bool {
        self.state == StreamState::Closed
    }
}

type Decode<T> = Box<dyn FnMut(Row) -> Result<Option<T>> + Send>;
type Accept<T> = Box<dyn Fn(&T) -> Result<bool> + Send>;

/// A typed pull cursor over query results.
pub struct Cursor<T> {
    core: Arc<Mutex<CursorCore>>,
    decode: Decode<T>,
    accept: Option<Accept<T>>,
    pending: Option<T>,
}

impl<T> Cursor<T> {
    /// Wraps a stream with a row decoder. The decoder may return
    /// `Ok(None)` to skip a row.
    pub(crate) fn new(
        stream: Box<dyn RowStream>,
        decode: impl FnMut(Row) -> Result<Option<T>> + Send + 'static,
    ) -> Self {
        Cursor {
            core: Arc::new(Mutex::new(CursorCore::new(stream))),
            decode: Box::new(decode),
            accept: None,
            pending: None,
        }
    }

    /// Adds a post-decode filter. Rejected items are skipped without
    /// surfacing to the caller.
    pub(crate) fn with_filter(
        mut self,
        accept: impl Fn(&T) -> Result<bool> + Send + 'static,
    ) -> Self {
        self.accept = Some(Box::new(accept));
        self
    }

    /// Whether another item is available. Decodes ahead and parks the
    /// item for the following `next()`.
    pub fn has_next(&mut self) -> Result<bool> {
        self.ensure_open()?;
        if self.pending.is_some() {
            return Ok(true);
        }
        loop {
            let row = match self.core.lock().fetch()? {
                Some(row) => row,
                None => return Ok(false),
            };
            let item = match (self.decode)(row)? {
                Some(item) => item,
                None => continue,
            };
            if let Some(accept) = &self.accept {
                if !accept(&item)? {
                    continue;
                }
            }
            self.pending = Some(item);
            return Ok(true);
        }
    }

    /// Takes the item parked by the last `has_next()`. Calling this
    /// without a preceding successful `has_next()` is an error.
    pub fn next(&mut self) -> Result<T> {
        self.ensure_open()?;
        match self.pending.take() {
            Some(item) => Ok(item),
            None => bail!("no item available; call has_next() before next()"),
        }
    }

    /// Abandons the cursor. Closing twice is an error.
    pub fn close(&mut self) -> Result<()> {
        self.pending = None;
        self.core.lock().close()
    }

    /// Drains every remaining item into a vector and closes the cursor.
    pub fn into_vec(mut self) -> Result<Vec<T>> {
        let mut items = Vec::new();
        while self.has_next()? {
            items.push(self.next()?);
        }
        let _ = self.core.lock().force_close();
        Ok(items)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.core.lock().is_closed() {
            return Err(ResourceClosedError::cursor().into());
        }
        Ok(())
    }

    fn core_handle(&self) -> Weak<Mutex<CursorCore>> {
        Arc::downgrade(&self.core)
    }
}

impl<T> Drop for Cursor<T> {
    fn drop(&mut self) {
        let _ = self.core.lock().force_close();
    }
}

impl<T> std::fmt::Debug for Cursor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("state", &self.core.lock().state)
            .field("pending", &self.pending.is_some())
            .finish()
    }
}

/// Weak handles to every cursor a storage has handed out. Closing the
/// storage force-closes whatever is still alive.
#[derive(Default)]
pub(crate) struct CursorRegistry {
    cursors: Mutex<Vec<Weak<Mutex<CursorCore>>>>,
}

impl CursorRegistry {
    pub(crate) fn new() -> Self {
        CursorRegistry::default()
    }

    pub(crate) fn track<T>(&self, cursor: &Cursor<T>) {
        let mut cursors = self.cursors.lock();
        cursors.retain(|weak| weak.strong_count() > 0);
        cursors.push(cursor.core_handle());
    }

    /// Force-closes every live tracked cursor. Failures are reported to
    /// the observer and counted, never propagated; storage close must
    /// not abort halfway.
    pub(crate) fn close_all(&self, observer: &ObserverHandle) -> (usize, usize) {
        let mut closed = 0usize;
        let mut failed = 0usize;
        let mut cursors = self.cursors.lock();
        for weak in cursors.drain(..) {
            let Some(core) = weak.upgrade() else {
                continue;
            };
            match core.lock().force_close() {
                Ok(()) => closed += 1,
                Err(err) => {
                    failed += 1;
                    observer
                        .emit(|| StorageEvent::CursorCloseFailed { detail: err.to_string() });
                }
            };
        }
        (closed, failed)
    }
}

impl std::fmt::Debug for CursorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CursorRegistry").field("tracked", &self.cursors.lock().len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BufferedRows;
    use crate::types::StoredValue;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn id_stream(ids: &[i64]) -> Box<dyn RowStream> {
        let rows = ids.iter().map(|id| vec![StoredValue::Int(*id)]).collect();
        Box::new(BufferedRows::new(vec!["id".to_string()], rows))
    }

    fn id_cursor(ids: &[i64]) -> Cursor<i64> {
        Cursor::new(id_stream(ids), |row| Ok(Some(row.value(0)?.as_i64()?)))
    }

    #[test]
    fn test_full_walk_in_order() {
        let mut cursor = id_cursor(&[1, 2, 3]);
        let mut seen = Vec::new();
        while cursor.has_next().unwrap() {
            seen.push(cursor.next().unwrap());
        }
        assert_eq!(seen, [1, 2, 3]);
    }

    #[test]
    fn test_repeated_has_next_decodes_once() {
        let decoded = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&decoded);
        let mut cursor = Cursor::new(id_stream(&[5]), move |row| {
            counter.fetch_add(1, Ordering::Relaxed);
            Ok(Some(row.value(0)?.as_i64()?))
        });
        assert!(cursor.has_next().unwrap());
        assert!(cursor.has_next().unwrap());
        assert!(cursor.has_next().unwrap());
        assert_eq!(decoded.load(Ordering::Relaxed), 1);
        assert_eq!(cursor.next().unwrap(), 5);
    }

    #[test]
    fn test_next_without_has_next_fails_even_with_rows_left() {
        let mut cursor = id_cursor(&[1, 2]);
        let err = cursor.next().unwrap_err();
        assert!(err.to_string().contains("has_next"));
        // the cursor is still usable once the check is made
        assert!(cursor.has_next().unwrap());
        assert_eq!(cursor.next().unwrap(), 1);
    }

    #[test]
    fn test_next_after_exhaustion_fails() {
        let mut cursor = id_cursor(&[1]);
        assert!(cursor.has_next().unwrap());
        cursor.next().unwrap();
        assert!(!cursor.has_next().unwrap());
        assert!(cursor.next().is_err());
    }

    #[test]
    fn test_use_after_close_reports_closed_resource() {
        let mut cursor = id_cursor(&[1, 2]);
        cursor.close().unwrap();
        let err = cursor.has_next().unwrap_err();
        assert!(err.downcast_ref::<ResourceClosedError>().is_some());
        assert!(cursor.next().is_err());
    }

    #[test]
    fn test_double_close_fails() {
        let mut cursor = id_cursor(&[]);
        cursor.close().unwrap();
        let err = cursor.close().unwrap_err();
        assert!(err.downcast_ref::<ResourceClosedError>().is_some());
    }

    #[test]
    fn test_decode_skips_are_invisible() {
        let mut cursor = Cursor::new(id_stream(&[1, 2, 3, 4]), |row| {
            let id = row.value(0)?.as_i64()?;
            Ok((id % 2 == 0).then_some(id))
        });
        assert_eq!(cursor.into_vec().unwrap(), [2, 4]);
    }

    #[test]
    fn test_filter_rejections_are_invisible() {
        let cursor = id_cursor(&[1, 2, 3, 4, 5]).with_filter(|id| Ok(*id >= 3));
        assert_eq!(cursor.into_vec().unwrap(), [3, 4, 5]);
    }

    #[test]
    fn test_registry_force_closes_live_cursors() {
        let registry = CursorRegistry::new();
        let mut cursor = id_cursor(&[1, 2, 3]);
        registry.track(&cursor);
        let (closed, failed) = registry.close_all(&ObserverHandle::none());
        assert_eq!((closed, failed), (1, 0));
        assert!(cursor.has_next().unwrap_err().downcast_ref::<ResourceClosedError>().is_some());
    }

    #[test]
    fn test_registry_skips_dropped_cursors() {
        let registry = CursorRegistry::new();
        let cursor = id_cursor(&[1]);
        registry.track(&cursor);
        drop(cursor);
        let (closed, failed) = registry.close_all(&ObserverHandle::none());
        assert_eq!((closed, failed), (0, 0));
    }

    #[test]
    fn test_exhausted_cursor_still_closes_once() {
        let mut cursor = id_cursor(&[]);
        assert!(!cursor.has_next().unwrap());
        cursor.close().unwrap();
    }
}
