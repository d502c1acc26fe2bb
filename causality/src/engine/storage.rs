use super::{Branches, Error, HighestBefore, LowestAfter, Vectors};
use crate::{
    kv::{Flushable, Store, Table},
    validators::Validators,
    Event, Source,
};
use commonware_codec::{DecodeExt, Encode};
use std::{collections::HashSet, sync::Arc};
use tracing::{debug, error, warn};

/// Table mapping each event to its branch.
const EVENT_BRANCH: Table = Table::new(b'b');

/// Table holding the (single) [Branches] record.
const BRANCHES: Table = Table::new(b'B');

type Digest<S> = <<S as Source>::Event as Event>::Digest;
type PublicKey<S> = <<S as Source>::Event as Event>::PublicKey;

/// Callback invoked when the index may no longer be consistent.
pub type Crit = Box<dyn Fn(&Error) + Send + Sync>;

/// State bound to a single epoch.
struct Epoch<S: Source, K: Store> {
    validators: Arc<Validators<PublicKey<S>>>,
    source: S,
    db: Flushable<K>,
    branches: Branches,
}

/// Incremental vector-clock engine.
///
/// The engine starts uninitialized and is bound to an epoch (validators, database, and event
/// source) with [Engine::reset]. Binding to a new epoch replaces the previous one entirely.
pub struct Engine<S: Source, K: Store, V: Vectors<Digest<S>>> {
    crit: Crit,
    vectors: V,
    epoch: Option<Epoch<S, K>>,
}

impl<S: Source, K: Store, V: Vectors<Digest<S>>> Engine<S, K, V> {
    /// Create a new (uninitialized) engine.
    ///
    /// `crit` is invoked whenever a persistence fault (or corrupted data) is encountered.
    pub fn new(crit: impl Fn(&Error) + Send + Sync + 'static, vectors: V) -> Self {
        Self {
            crit: Box::new(crit),
            vectors,
            epoch: None,
        }
    }

    /// Returns the concrete vector layout.
    pub fn vectors(&self) -> &V {
        &self.vectors
    }

    /// Bind the engine to a new epoch, discarding all state of the previous one.
    ///
    /// If `db` already contains a flushed index (i.e. after a restart), indexing resumes from it.
    pub fn reset(
        &mut self,
        validators: Arc<Validators<PublicKey<S>>>,
        db: K,
        source: S,
    ) -> Result<(), Error> {
        // Nothing of the previous epoch may be observed once we start rebinding
        self.epoch = None;
        self.vectors.on_reset();

        let db = Flushable::new(db);
        let branches = match Self::load_branches(&db, validators.len()) {
            Ok(branches) => branches,
            Err(err) => {
                self.fail(&err);
                return Err(err);
            }
        };
        debug!(
            validators = validators.len(),
            branches = branches.len(),
            "bound to new epoch"
        );
        self.epoch = Some(Epoch {
            validators,
            source,
            db,
            branches,
        });
        Ok(())
    }

    /// Index an event, returning whether it was not indexed before.
    ///
    /// All parents of the event must already be indexed. Adding an event that is already indexed
    /// is a no-op.
    pub fn add(&mut self, event: &S::Event) -> Result<bool, Error> {
        let result = self.fill_event_vectors(event);
        if let Err(err) = &result {
            if err.is_fatal() {
                self.fail(err);
            }
        }
        result
    }

    /// Persist all buffered writes (including branch bookkeeping).
    pub fn flush(&mut self) -> Result<(), Error> {
        let epoch = self.epoch.as_mut().ok_or(Error::Uninitialized)?;
        let result = BRANCHES
            .put(&mut epoch.db, &[], &epoch.branches.encode())
            .and_then(|_| epoch.db.flush())
            .map_err(Error::from);
        if let Err(err) = &result {
            self.fail(err);
        }
        result
    }

    /// Discard all buffered writes, reverting to the last flushed state.
    ///
    /// If the flushed branch bookkeeping cannot be reloaded, the engine is left uninitialized
    /// (until the next [Engine::reset]).
    pub fn drop_not_flushed(&mut self) -> Result<(), Error> {
        let result = self.rollback();
        if let Err(err) = &result {
            error!(?err, "failed to reload branches");
            (self.crit)(err);
        }
        result
    }

    /// Returns the validators of the bound epoch.
    pub fn validators(&self) -> Result<&Arc<Validators<PublicKey<S>>>, Error> {
        Ok(&self.epoch()?.validators)
    }

    /// Returns the event source of the bound epoch.
    pub fn source(&self) -> Result<&S, Error> {
        Ok(&self.epoch()?.source)
    }

    /// Returns the branch bookkeeping of the bound epoch.
    pub fn branches(&self) -> Result<&Branches, Error> {
        Ok(&self.epoch()?.branches)
    }

    /// Returns `true` if any validator was observed forking in the bound epoch.
    pub fn at_least_one_fork(&self) -> bool {
        self.epoch
            .as_ref()
            .is_some_and(|epoch| epoch.branches.at_least_one_fork())
    }

    /// Returns the number of writes not yet flushed.
    pub fn not_flushed_pairs(&self) -> usize {
        self.epoch
            .as_ref()
            .map_or(0, |epoch| epoch.db.not_flushed_pairs())
    }

    /// Returns the branch an indexed event belongs to.
    pub fn branch_of(&self, id: &Digest<S>) -> Result<usize, Error> {
        let epoch = self.epoch()?;
        self.check(Self::load_branch(&epoch.db, id))?
            .ok_or_else(|| Error::EventNotFound(id.to_string()))
    }

    /// Returns the _HighestBefore_ vector of an indexed event.
    pub fn highest_before(&self, id: &Digest<S>) -> Result<V::HighestBefore, Error> {
        let epoch = self.epoch()?;
        self.check(self.vectors.get_highest_before(&epoch.db, id))?
            .ok_or_else(|| Error::EventNotFound(id.to_string()))
    }

    /// Returns the _LowestAfter_ vector of an indexed event.
    pub fn lowest_after(&self, id: &Digest<S>) -> Result<V::LowestAfter, Error> {
        let epoch = self.epoch()?;
        self.check(self.vectors.get_lowest_after(&epoch.db, id))?
            .ok_or_else(|| Error::EventNotFound(id.to_string()))
    }

    /// Returns the _HighestBefore_ vector of an indexed event with one slot per validator (rather
    /// than per branch).
    ///
    /// The branches of each validator are collapsed into its slot. If the validator was caught
    /// forking, the slot only carries the fork flag.
    pub fn merged_highest_before(&self, id: &Digest<S>) -> Result<V::HighestBefore, Error> {
        let epoch = self.epoch()?;
        let scattered = self.highest_before(id)?;
        if !epoch.branches.at_least_one_fork() {
            return Ok(scattered);
        }
        let mut merged = self.vectors.new_highest_before(epoch.validators.len());
        for (creator, branches) in epoch.branches.by_creator().iter().enumerate() {
            merged.gather_from(creator, &scattered, branches);
        }
        Ok(merged)
    }

    fn epoch(&self) -> Result<&Epoch<S, K>, Error> {
        self.epoch.as_ref().ok_or(Error::Uninitialized)
    }

    /// Report fatal errors encountered on read paths.
    fn check<T>(&self, result: Result<T, Error>) -> Result<T, Error> {
        if let Err(err) = &result {
            if err.is_fatal() {
                error!(?err, "failed to read index");
                (self.crit)(err);
            }
        }
        result
    }

    /// Drop everything that may not match persisted state and report the failure.
    fn fail(&mut self, err: &Error) {
        error!(?err, "index may be inconsistent");
        if let Err(reload) = self.rollback() {
            error!(?reload, "failed to reload branches");
        }
        (self.crit)(err);
    }

    /// Revert to the last flushed state, unbinding the epoch if its branches cannot be reloaded.
    fn rollback(&mut self) -> Result<(), Error> {
        let Some(epoch) = self.epoch.as_mut() else {
            return Ok(());
        };
        epoch.db.drop_not_flushed();
        self.vectors.on_drop_not_flushed();
        match Self::load_branches(&epoch.db, epoch.validators.len()) {
            Ok(branches) => {
                epoch.branches = branches;
                Ok(())
            }
            Err(err) => {
                // Branches of dropped events must never be reused
                self.epoch = None;
                Err(err)
            }
        }
    }

    fn load_branches(db: &Flushable<K>, validators: usize) -> Result<Branches, Error> {
        let Some(raw) = BRANCHES.get(db, &[])? else {
            return Ok(Branches::new(validators));
        };
        let branches = Branches::decode(raw.as_slice())?;
        if branches.validators() != validators {
            return Err(Error::InconsistentBranches("validator count mismatch"));
        }
        Ok(branches)
    }

    fn load_branch(db: &Flushable<K>, id: &Digest<S>) -> Result<Option<usize>, Error> {
        let Some(raw) = EVENT_BRANCH.get(db, id.as_ref())? else {
            return Ok(None);
        };
        Ok(Some(u32::decode(raw.as_slice())? as usize))
    }

    fn fill_event_vectors(&mut self, event: &S::Event) -> Result<bool, Error> {
        let Self { vectors, epoch, .. } = self;
        let epoch = epoch.as_mut().ok_or(Error::Uninitialized)?;
        let id = event.id();
        if vectors.get_highest_before(&epoch.db, &id)?.is_some() {
            debug!(%id, "event already indexed");
            return Ok(false);
        }
        let creator = epoch
            .validators
            .index(event.creator())
            .ok_or_else(|| Error::UnknownCreator(event.creator().to_string()))?;

        // Assign a branch on a copy (only swapped in once all writes succeed)
        let self_parent = match event.self_parent() {
            Some(parent) => {
                let branch = Self::load_branch(&epoch.db, parent)?
                    .ok_or_else(|| Error::ParentNotFound(parent.to_string()))?;
                if epoch.branches.creator(branch) != Some(creator) {
                    return Err(Error::InvalidSelfParent(parent.to_string()));
                }
                Some(branch)
            }
            None => None,
        };
        let mut branches = epoch.branches.clone();
        let me = branches.assign(creator, self_parent, event.seq())?;
        let size = branches.len();
        if size > epoch.branches.len() {
            warn!(
                creator = %event.creator(),
                seq = event.seq(),
                branch = me,
                "fork detected"
            );
        }

        // Merge the vectors of all parents
        let mut before = vectors.new_highest_before(size);
        let mut after = vectors.new_lowest_after(size);
        before.init_with_event(me, event.seq());
        after.init_with_event(me, event.seq());
        for parent in event.parents() {
            let vector = vectors
                .get_highest_before(&epoch.db, parent)?
                .ok_or_else(|| Error::ParentNotFound(parent.to_string()))?;
            before.collect_from(&vector, size);
        }
        if branches.at_least_one_fork() {
            Self::detect_forks(&branches, &mut before);
        }

        // Walk the ancestry (excluding the event itself), marking every event not yet observed
        // from this branch
        let mut visited = HashSet::new();
        let mut updated = Vec::new();
        let mut stack: Vec<Digest<S>> = event.parents().to_vec();
        while let Some(walk) = stack.pop() {
            if visited.contains(&walk) {
                continue;
            }
            let mut vector = vectors
                .get_lowest_after(&epoch.db, &walk)?
                .ok_or_else(|| Error::EventNotFound(walk.to_string()))?;
            if !vector.visit(me, event.seq()) {
                continue;
            }
            let parent = epoch
                .source
                .get_event(&walk)
                .ok_or_else(|| Error::EventNotFound(walk.to_string()))?;
            stack.extend_from_slice(parent.parents());
            visited.insert(walk);
            updated.push((walk, vector));
        }

        // Store calculated vectors
        for (walk, vector) in updated {
            vectors.set_lowest_after(&mut epoch.db, &walk, vector)?;
        }
        vectors.set_highest_before(&mut epoch.db, &id, before)?;
        vectors.set_lowest_after(&mut epoch.db, &id, after)?;
        EVENT_BRANCH.put(&mut epoch.db, id.as_ref(), &(me as u32).encode())?;
        epoch.branches = branches;
        debug!(%id, seq = event.seq(), branch = me, "indexed event");
        Ok(true)
    }

    /// Flag creators whose forks are observed by `before` (but were not flagged by any parent).
    fn detect_forks(branches: &Branches, before: &mut V::HighestBefore) {
        for creator_branches in branches.by_creator() {
            if creator_branches.len() <= 1 {
                continue;
            }
            if Self::observes_fork(creator_branches, before) {
                for branch in creator_branches {
                    before.set_fork_detected(*branch);
                }
            }
        }
    }

    fn observes_fork(creator_branches: &[usize], before: &V::HighestBefore) -> bool {
        // If one branch observes a fork, all branches of the creator do
        if creator_branches
            .iter()
            .any(|branch| before.is_fork_detected(*branch))
        {
            return true;
        }

        // Two observed branches with overlapping sequence ranges
        for (i, a) in creator_branches.iter().enumerate() {
            for b in &creator_branches[i + 1..] {
                if before.is_unobserved(*a) || before.is_unobserved(*b) {
                    continue;
                }
                if before.min_seq(*a) <= before.seq(*b) && before.min_seq(*b) <= before.seq(*a) {
                    return true;
                }
            }
        }
        false
    }
}
