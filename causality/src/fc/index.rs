use super::{tables::Sequences, Config, HighestBeforeSeq, LowestAfterSeq};
use crate::{
    cache::Clock,
    engine::{Branches, Engine, Error},
    kv::Store,
    validators::Validators,
    Event, Source,
};
use commonware_runtime::Metrics;
use prometheus_client::metrics::{counter::Counter, gauge::Gauge};
use std::sync::{Arc, RwLock};
use tracing::debug;

type Digest<S> = <<S as Source>::Event as Event>::Digest;
type PublicKey<S> = <<S as Source>::Event as Event>::PublicKey;

/// Detects the forkless-cause relation between indexed events.
pub struct Index<S: Source, K: Store> {
    engine: Engine<S, K, Sequences<Digest<S>>>,
    forkless_cause: RwLock<Clock<(Digest<S>, Digest<S>), bool>>,

    events: Counter,
    branches: Gauge,
    forkless_cause_hits: Counter,
    forkless_cause_misses: Counter,
}

impl<S: Source, K: Store> Index<S, K> {
    /// Create a new (uninitialized) index.
    ///
    /// `crit` is invoked whenever the index may have become inconsistent with its database.
    ///
    /// # Panics
    ///
    /// Panics if any cache size in `cfg` is zero.
    pub fn new(
        context: impl Metrics,
        crit: impl Fn(&Error) + Send + Sync + 'static,
        cfg: Config,
    ) -> Self {
        let caches = cfg.caches;
        let index = Self {
            engine: Engine::new(
                crit,
                Sequences::new(caches.highest_before_size, caches.lowest_after_size),
            ),
            forkless_cause: RwLock::new(Clock::new(
                caches.forkless_cause_pairs,
                caches.forkless_cause_pairs,
            )),
            events: Counter::default(),
            branches: Gauge::default(),
            forkless_cause_hits: Counter::default(),
            forkless_cause_misses: Counter::default(),
        };
        context.register("events", "Number of events indexed", index.events.clone());
        context.register(
            "branches",
            "Number of branches in the current epoch",
            index.branches.clone(),
        );
        context.register(
            "forkless_cause_hits",
            "Number of forkless-cause queries served from cache",
            index.forkless_cause_hits.clone(),
        );
        context.register(
            "forkless_cause_misses",
            "Number of forkless-cause queries computed from vectors",
            index.forkless_cause_misses.clone(),
        );
        index
    }

    /// Bind the index to a new epoch.
    ///
    /// Nothing computed in a previous epoch (vectors or forkless-cause results) is observable
    /// afterwards.
    pub fn reset(
        &mut self,
        validators: Arc<Validators<PublicKey<S>>>,
        db: K,
        source: S,
    ) -> Result<(), Error> {
        self.forkless_cause.write().unwrap().purge();
        let result = self.engine.reset(validators, db, source);
        self.update_branches();
        debug!("reset index");
        result
    }

    /// Index an event (all of its parents must already be indexed).
    pub fn add(&mut self, event: &S::Event) -> Result<(), Error> {
        match self.engine.add(event) {
            Ok(added) => {
                if added {
                    self.events.inc();
                    self.update_branches();
                }
                Ok(())
            }
            Err(err) => {
                if err.is_fatal() {
                    // Cached results may refer to dropped events
                    self.forkless_cause.write().unwrap().purge();
                    self.update_branches();
                }
                Err(err)
            }
        }
    }

    /// Persist all indexed events.
    ///
    /// If the flush fails, everything not yet persisted is dropped.
    pub fn flush(&mut self) -> Result<(), Error> {
        let result = self.engine.flush();
        if result.is_err() {
            self.forkless_cause.write().unwrap().purge();
            self.update_branches();
        }
        result
    }

    /// Discard all events indexed since the last flush.
    ///
    /// If the last flushed state cannot be reloaded, the index must be [Index::reset] before use.
    pub fn drop_not_flushed(&mut self) -> Result<(), Error> {
        self.forkless_cause.write().unwrap().purge();
        let result = self.engine.drop_not_flushed();
        self.update_branches();
        result
    }

    /// Returns the number of writes not yet flushed.
    pub fn not_flushed_pairs(&self) -> usize {
        self.engine.not_flushed_pairs()
    }

    /// Returns `true` if any validator was observed forking in the current epoch.
    pub fn at_least_one_fork(&self) -> bool {
        self.engine.at_least_one_fork()
    }

    /// Returns the validators of the current epoch.
    pub fn validators(&self) -> Result<&Arc<Validators<PublicKey<S>>>, Error> {
        self.engine.validators()
    }

    /// Returns the branch bookkeeping of the current epoch.
    pub fn branches(&self) -> Result<&Branches, Error> {
        self.engine.branches()
    }

    /// Returns the branch an event belongs to.
    pub fn branch_of(&self, id: &Digest<S>) -> Result<usize, Error> {
        self.engine.branch_of(id)
    }

    /// Returns the _HighestBefore_ vector of an event (indexed by branch).
    pub fn highest_before(&self, id: &Digest<S>) -> Result<HighestBeforeSeq, Error> {
        self.engine.highest_before(id)
    }

    /// Returns the _LowestAfter_ vector of an event (indexed by branch).
    pub fn lowest_after(&self, id: &Digest<S>) -> Result<LowestAfterSeq, Error> {
        self.engine.lowest_after(id)
    }

    /// Returns the _HighestBefore_ vector of an event indexed by validator.
    ///
    /// The slot of a validator caught forking carries no sequence (only the fork flag).
    pub fn merged_highest_before(&self, id: &Digest<S>) -> Result<HighestBeforeSeq, Error> {
        self.engine.merged_highest_before(id)
    }

    /// Returns whether `a` forklessly causes `b`.
    ///
    /// That is, whether validators holding at least a quorum of weight (none of them observed
    /// forking by `b`) have an event that observes `a` and is observed by `b`.
    pub fn forkless_cause(&self, a: &Digest<S>, b: &Digest<S>) -> Result<bool, Error> {
        let key = (*a, *b);
        if let Some(cached) = self.forkless_cause.read().unwrap().get(&key) {
            self.forkless_cause_hits.inc();
            return Ok(*cached);
        }
        self.forkless_cause_misses.inc();
        let result = self.compute_forkless_cause(a, b)?;
        self.forkless_cause.write().unwrap().insert(key, result, 1);
        Ok(result)
    }

    fn compute_forkless_cause(&self, a: &Digest<S>, b: &Digest<S>) -> Result<bool, Error> {
        let validators = self.engine.validators()?;
        let branches = self.engine.branches()?;
        let after = self.engine.lowest_after(a)?;
        let before = self.engine.highest_before(b)?;

        // Nothing built upon a branch `b` knows to be forked is trusted
        if branches.at_least_one_fork() {
            let branch = self.engine.branch_of(a)?;
            if before.get(branch).is_fork_detected() {
                return Ok(false);
            }
        }

        let mut counter = validators.counter();
        for (branch, creator) in branches.creators().iter().enumerate() {
            let witness = after.get(branch);
            if witness == 0 {
                continue;
            }
            let observed = before.get(branch);
            if observed.is_fork_detected() || witness > observed.seq {
                continue;
            }
            counter.count_by_index(*creator);
        }
        Ok(counter.has_quorum())
    }

    /// Returns the subset of `options` (in order) whose creators are not seen forking by
    /// `self_parent`.
    ///
    /// Used to avoid referencing known cheaters when choosing the parents of a new event.
    pub fn no_cheaters(
        &self,
        self_parent: Option<&Digest<S>>,
        options: &[Digest<S>],
    ) -> Result<Vec<Digest<S>>, Error> {
        let Some(self_parent) = self_parent else {
            return Ok(options.to_vec());
        };
        let before = self.engine.highest_before(self_parent)?;
        if !self.engine.at_least_one_fork() {
            return Ok(options.to_vec());
        }

        // Every branch of a creator is flagged once a fork is observed, so checking the initial
        // branch is enough
        let validators = self.engine.validators()?;
        let source = self.engine.source()?;
        let mut filtered = Vec::with_capacity(options.len());
        for id in options {
            let event = source
                .get_event(id)
                .ok_or_else(|| Error::EventNotFound(id.to_string()))?;
            let creator = validators
                .index(event.creator())
                .ok_or_else(|| Error::UnknownCreator(event.creator().to_string()))?;
            if !before.get(creator).is_fork_detected() {
                filtered.push(*id);
            }
        }
        Ok(filtered)
    }

    /// Returns the validators seen forking by an event (in validator order).
    pub fn cheaters(&self, id: &Digest<S>) -> Result<Vec<PublicKey<S>>, Error> {
        let merged = self.engine.merged_highest_before(id)?;
        let validators = self.engine.validators()?;
        Ok(validators
            .iter()
            .enumerate()
            .filter(|(idx, _)| merged.get(*idx).is_fork_detected())
            .map(|(_, (key, _))| key.clone())
            .collect())
    }

    fn update_branches(&self) {
        let branches = self.engine.branches().map_or(0, |branches| branches.len());
        self.branches.set(branches as i64);
    }
}
