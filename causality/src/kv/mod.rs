//! Byte-oriented key-value storage used to persist vectors.
//!
//! The index only requires an ordered store that supports point lookups, writes, prefix scans,
//! and an atomic batch write. [Memory] is an in-memory implementation, [Prefixed] namespaces a
//! store (giving each epoch its own table identity), and [Flushable] buffers writes until they
//! are explicitly flushed (or dropped).
//!
//! # Tables
//!
//! Within a single epoch database, every table is identified by a one-byte prefix prepended to
//! the event identity (see [Table]).

use thiserror::Error;

mod flushable;
pub use flushable::Flushable;
mod memory;
pub use memory::Memory;
mod prefixed;
pub use prefixed::Prefixed;

/// Errors that can occur when interacting with a [Store].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("backend failure: {0}")]
    Backend(String),
    #[error("store closed")]
    Closed,
}

/// A single change applied by [Store::write_batch].
///
/// If the value is `Some`, the key is being created or updated. If the value is `None`, the key is
/// being deleted.
pub type Op = (Vec<u8>, Option<Vec<u8>>);

/// An ordered, byte-oriented key-value store.
pub trait Store: Send + Sync + 'static {
    /// Get the value for a given key.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error>;

    /// Set the value for a given key.
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), Error>;

    /// Delete the value for a given key (if any).
    fn delete(&mut self, key: &[u8]) -> Result<(), Error>;

    /// Returns all `(key, value)` pairs whose key starts with `prefix`, in key order.
    fn scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error>;

    /// Apply all changes or none of them.
    fn write_batch(&mut self, ops: Vec<Op>) -> Result<(), Error>;
}

/// A logical table within a [Store], identified by a one-byte prefix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Table(u8);

impl Table {
    /// Create a table with the given prefix.
    pub const fn new(prefix: u8) -> Self {
        Self(prefix)
    }

    /// Returns the prefix of the table.
    pub const fn prefix(&self) -> u8 {
        self.0
    }

    /// Returns the store key of `key` within this table.
    pub fn key(&self, key: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + key.len());
        out.push(self.0);
        out.extend_from_slice(key);
        out
    }

    /// Get the value of `key` within this table.
    pub fn get<S: Store>(&self, store: &S, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        store.get(&self.key(key))
    }

    /// Set the value of `key` within this table.
    pub fn put<S: Store>(&self, store: &mut S, key: &[u8], value: &[u8]) -> Result<(), Error> {
        store.put(&self.key(key), value)
    }

    /// Returns the number of entries in this table.
    pub fn len<S: Store>(&self, store: &S) -> Result<usize, Error> {
        Ok(store.scan(&[self.0])?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_isolation() {
        let mut store = Memory::default();
        let left = Table::new(b'S');
        let right = Table::new(b's');

        left.put(&mut store, b"key", b"left").unwrap();
        right.put(&mut store, b"key", b"right").unwrap();
        assert_eq!(left.get(&store, b"key").unwrap(), Some(b"left".to_vec()));
        assert_eq!(right.get(&store, b"key").unwrap(), Some(b"right".to_vec()));
        assert_eq!(left.get(&store, b"other").unwrap(), None);
        assert_eq!(left.len(&store).unwrap(), 1);
        assert_eq!(store.get(b"Skey").unwrap(), Some(b"left".to_vec()));
    }

    #[test]
    fn test_table_key() {
        let table = Table::new(b'b');
        assert_eq!(table.prefix(), b'b');
        assert_eq!(table.key(&[1, 2, 3]), vec![b'b', 1, 2, 3]);
        assert_eq!(table.key(&[]), vec![b'b']);
    }
}
