use super::{Error, Op, Store};

/// A [Store] that namespaces every key with a fixed prefix.
///
/// Used to give every epoch a dedicated set of tables within a shared database: rolling over to a
/// new epoch binds a new prefix, so vectors from different epochs can never be confused.
#[derive(Clone, Debug)]
pub struct Prefixed<S: Store> {
    inner: S,
    prefix: Vec<u8>,
}

impl<S: Store> Prefixed<S> {
    /// Namespace `inner` with `prefix`.
    pub fn new(inner: S, prefix: impl Into<Vec<u8>>) -> Self {
        Self {
            inner,
            prefix: prefix.into(),
        }
    }

    /// Namespace `inner` for the given epoch.
    pub fn epoch(inner: S, epoch: u64) -> Self {
        Self::new(inner, epoch.to_be_bytes())
    }

    /// Returns the prefix applied to every key.
    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    /// Returns the underlying store.
    pub fn into_inner(self) -> S {
        self.inner
    }

    fn key(&self, key: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.prefix.len() + key.len());
        out.extend_from_slice(&self.prefix);
        out.extend_from_slice(key);
        out
    }
}

impl<S: Store> Store for Prefixed<S> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        self.inner.get(&self.key(key))
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), Error> {
        let key = self.key(key);
        self.inner.put(&key, value)
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), Error> {
        let key = self.key(key);
        self.inner.delete(&key)
    }

    fn scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error> {
        let strip = self.prefix.len();
        Ok(self
            .inner
            .scan(&self.key(prefix))?
            .into_iter()
            .map(|(key, value)| (key[strip..].to_vec(), value))
            .collect())
    }

    fn write_batch(&mut self, ops: Vec<Op>) -> Result<(), Error> {
        let ops = ops
            .into_iter()
            .map(|(key, value)| (self.key(&key), value))
            .collect();
        self.inner.write_batch(ops)
    }
}
