use super::{Error, Op, Store};
use std::collections::BTreeMap;
use tracing::debug;

/// A write buffer in front of a [Store].
///
/// Writes and deletes are not applied to the underlying store until [Flushable::flush] is called
/// but are reflected in reads. Unflushed changes can be discarded with [Flushable::drop_not_flushed].
pub struct Flushable<S: Store> {
    /// The underlying store.
    inner: S,

    /// The diff of changes not yet flushed.
    ///
    /// If the value is Some, the key is being created or updated.
    /// If the value is None, the key is being deleted.
    ///
    /// We use a BTreeMap instead of HashMap to allow for a deterministic iteration order.
    diff: BTreeMap<Vec<u8>, Option<Vec<u8>>>,

    /// The approximate number of bytes held in `diff`.
    size: usize,
}

impl<S: Store> Flushable<S> {
    /// Wrap `inner` with an empty write buffer.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            diff: BTreeMap::new(),
            size: 0,
        }
    }

    /// Returns the number of buffered changes.
    pub fn not_flushed_pairs(&self) -> usize {
        self.diff.len()
    }

    /// Returns the approximate number of buffered bytes.
    pub fn not_flushed_size(&self) -> usize {
        self.size
    }

    /// Write all buffered changes to the underlying store as a single batch.
    ///
    /// If the write fails, the buffer is left untouched (the caller decides whether to retry or
    /// to drop it).
    pub fn flush(&mut self) -> Result<(), Error> {
        if self.diff.is_empty() {
            return Ok(());
        }
        let ops: Vec<Op> = self
            .diff
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        let pairs = ops.len();
        self.inner.write_batch(ops)?;
        self.diff.clear();
        self.size = 0;
        debug!(pairs, "flushed");
        Ok(())
    }

    /// Discard all buffered changes.
    pub fn drop_not_flushed(&mut self) {
        if !self.diff.is_empty() {
            debug!(pairs = self.diff.len(), "dropped unflushed changes");
        }
        self.diff.clear();
        self.size = 0;
    }

    /// Returns the underlying store (ignoring any buffered changes).
    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn record(&mut self, key: &[u8], value: Option<Vec<u8>>) {
        self.size += key.len() + value.as_ref().map_or(0, |v| v.len());
        if let Some(previous) = self.diff.insert(key.to_vec(), value) {
            let replaced = key.len() + previous.map_or(0, |v| v.len());
            self.size = self.size.saturating_sub(replaced);
        }
    }
}

impl<S: Store> Store for Flushable<S> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        if let Some(value) = self.diff.get(key) {
            return Ok(value.clone());
        }
        self.inner.get(key)
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), Error> {
        self.record(key, Some(value.to_vec()));
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), Error> {
        self.record(key, None);
        Ok(())
    }

    fn scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error> {
        // Overlay buffered changes on the persisted items
        let mut items: BTreeMap<Vec<u8>, Vec<u8>> = self.inner.scan(prefix)?.into_iter().collect();
        for (key, value) in self
            .diff
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
        {
            match value {
                Some(value) => {
                    items.insert(key.clone(), value.clone());
                }
                None => {
                    items.remove(key);
                }
            }
        }
        Ok(items.into_iter().collect())
    }

    fn write_batch(&mut self, ops: Vec<Op>) -> Result<(), Error> {
        for (key, value) in ops {
            self.record(&key, value);
        }
        Ok(())
    }
}
