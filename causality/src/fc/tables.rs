use super::{HighestBeforeSeq, LowestAfterSeq};
use crate::{
    cache::Clock,
    engine::{Error, Vectors},
    kv::{Store, Table},
};
use commonware_codec::{DecodeExt, Encode, Read};
use commonware_cryptography::Digest;
use std::sync::RwLock;

/// Table of _HighestBefore_ vectors.
const HIGHEST_BEFORE: Table = Table::new(b'S');

/// Table of _LowestAfter_ vectors.
const LOWEST_AFTER: Table = Table::new(b's');

/// A table of vectors fronted by a weighted cache.
struct Cached<D: Digest, V> {
    table: Table,
    cache: RwLock<Clock<D, V>>,
}

impl<D: Digest, V: Clone + Encode + Read<Cfg = ()>> Cached<D, V> {
    fn new(table: Table, max_bytes: usize) -> Self {
        Self {
            table,
            cache: RwLock::new(Clock::new(max_bytes, max_bytes)),
        }
    }

    fn get<S: Store>(&self, db: &S, id: &D) -> Result<Option<V>, Error> {
        if let Some(vector) = self.cache.read().unwrap().get(id) {
            return Ok(Some(vector.clone()));
        }
        let Some(raw) = self.table.get(db, id.as_ref())? else {
            return Ok(None);
        };
        let vector = V::decode(raw.as_slice())?;
        self.insert(id, vector.clone());
        Ok(Some(vector))
    }

    fn set<S: Store>(&self, db: &mut S, id: &D, vector: V) -> Result<(), Error> {
        self.table.put(db, id.as_ref(), &vector.encode())?;
        self.insert(id, vector);
        Ok(())
    }

    fn insert(&self, id: &D, vector: V) {
        let weight = vector.encode_size() + id.len();
        self.cache.write().unwrap().insert(*id, vector, weight);
    }

    fn purge(&self) {
        self.cache.write().unwrap().purge();
    }
}

/// Persistent _HighestBefore_ and _LowestAfter_ tables, each behind a bounded cache.
pub(crate) struct Sequences<D: Digest> {
    highest_before: Cached<D, HighestBeforeSeq>,
    lowest_after: Cached<D, LowestAfterSeq>,
}

impl<D: Digest> Sequences<D> {
    pub(crate) fn new(highest_before_size: usize, lowest_after_size: usize) -> Self {
        Self {
            highest_before: Cached::new(HIGHEST_BEFORE, highest_before_size),
            lowest_after: Cached::new(LOWEST_AFTER, lowest_after_size),
        }
    }

    fn purge(&self) {
        self.highest_before.purge();
        self.lowest_after.purge();
    }
}

impl<D: Digest> Vectors<D> for Sequences<D> {
    type HighestBefore = HighestBeforeSeq;
    type LowestAfter = LowestAfterSeq;

    fn new_highest_before(&self, size: usize) -> HighestBeforeSeq {
        HighestBeforeSeq::new(size)
    }

    fn new_lowest_after(&self, size: usize) -> LowestAfterSeq {
        LowestAfterSeq::new(size)
    }

    fn get_highest_before<S: Store>(
        &self,
        db: &S,
        id: &D,
    ) -> Result<Option<HighestBeforeSeq>, Error> {
        self.highest_before.get(db, id)
    }

    fn get_lowest_after<S: Store>(&self, db: &S, id: &D) -> Result<Option<LowestAfterSeq>, Error> {
        self.lowest_after.get(db, id)
    }

    fn set_highest_before<S: Store>(
        &self,
        db: &mut S,
        id: &D,
        vector: HighestBeforeSeq,
    ) -> Result<(), Error> {
        self.highest_before.set(db, id, vector)
    }

    fn set_lowest_after<S: Store>(
        &self,
        db: &mut S,
        id: &D,
        vector: LowestAfterSeq,
    ) -> Result<(), Error> {
        self.lowest_after.set(db, id, vector)
    }

    fn on_reset(&self) {
        self.purge();
    }

    fn on_drop_not_flushed(&self) {
        self.purge();
    }
}
