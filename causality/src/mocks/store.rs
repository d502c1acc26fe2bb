use crate::kv::{Error, Op, Store};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// A [Store] that fails reads and/or writes on demand.
///
/// Clones share the same failure switches.
#[derive(Clone)]
pub struct Faulty<S: Store> {
    inner: S,
    fail_reads: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
}

impl<S: Store> Faulty<S> {
    /// Wrap `inner` (initially failing nothing).
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            fail_reads: Arc::new(AtomicBool::new(false)),
            fail_writes: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns the wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Fail (or stop failing) all reads.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::Relaxed);
    }

    /// Fail (or stop failing) all writes.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    fn check_read(&self) -> Result<(), Error> {
        if self.fail_reads.load(Ordering::Relaxed) {
            return Err(Error::Backend("injected read failure".into()));
        }
        Ok(())
    }

    fn check_write(&self) -> Result<(), Error> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(Error::Backend("injected write failure".into()));
        }
        Ok(())
    }
}

impl<S: Store> Store for Faulty<S> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        self.check_read()?;
        self.inner.get(key)
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), Error> {
        self.check_write()?;
        self.inner.put(key, value)
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), Error> {
        self.check_write()?;
        self.inner.delete(key)
    }

    fn scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error> {
        self.check_read()?;
        self.inner.scan(prefix)
    }

    fn write_batch(&mut self, ops: Vec<Op>) -> Result<(), Error> {
        self.check_write()?;
        self.inner.write_batch(ops)
    }
}
