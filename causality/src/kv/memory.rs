use super::{Error, Op, Store};
use std::{
    collections::BTreeMap,
    sync::{Arc, RwLock},
};

/// An ordered in-memory [Store].
///
/// Clones share the same underlying map, which makes it possible to hand a store to an index and
/// later re-open it (simulating a restart that only retains what was written).
#[derive(Clone, Default, Debug)]
pub struct Memory {
    map: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl Memory {
    /// Returns the number of stored keys.
    pub fn len(&self) -> usize {
        self.map.read().unwrap().len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Store for Memory {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.map.read().unwrap().get(key).cloned())
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), Error> {
        self.map.write().unwrap().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), Error> {
        self.map.write().unwrap().remove(key);
        Ok(())
    }

    fn scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error> {
        let map = self.map.read().unwrap();
        Ok(map
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    fn write_batch(&mut self, ops: Vec<Op>) -> Result<(), Error> {
        // Hold the lock across the whole batch so readers never observe a partial write
        let mut map = self.map.write().unwrap();
        for (key, value) in ops {
            match value {
                Some(value) => {
                    map.insert(key, value);
                }
                None => {
                    map.remove(&key);
                }
            }
        }
        Ok(())
    }
}
