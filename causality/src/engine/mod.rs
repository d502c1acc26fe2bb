//! Incrementally compute vector clocks for a DAG of events.
//!
//! The [Engine] drives the per-event computation independently of how vectors are laid out. The
//! concrete layout is supplied through the [Vectors] capability (allocation, persistence, and cache
//! hooks) together with the [HighestBefore] and [LowestAfter] merge arithmetic.
//!
//! # Branches
//!
//! Vector slots are addressed by _branch_ rather than by validator. Every validator starts with a
//! single branch (whose id equals the validator's dense index). An event extends the branch of its
//! self-parent when it is the next event on that branch. Otherwise, the creator has produced two
//! events that are not ordered by causality and a new branch is allocated for it (see [Branches]).
//!
//! When computing the vectors of an event, a creator is flagged as forking if any parent already
//! flagged it, or if two of its branches are both observed with overlapping sequence ranges.
//! Once flagged, a creator stays flagged in all descendants.
//!
//! # Processing
//!
//! Events must be [Engine::add]ed one at a time and only after all of their parents. Adding an
//! event:
//!
//! 1. Assigns the event to a branch.
//! 2. Merges the _HighestBefore_ vectors of its parents (detecting forks).
//! 3. Walks its ancestry to fill in the _LowestAfter_ slot of its branch for every ancestor that
//!    was not yet observed from that branch.
//! 4. Writes all updated vectors to a write buffer (never partially).
//!
//! Buffered writes become durable on [Engine::flush] and can be discarded with
//! [Engine::drop_not_flushed].
//!
//! # Failures
//!
//! Precondition violations (unknown creator, missing parent) are returned to the caller and leave
//! the index untouched. Persistence faults (and corrupted stored data) are fatal: unflushed state
//! is dropped, and the crash callback provided at construction is invoked before the error is
//! returned.

use crate::{kv, Seq};
use commonware_cryptography::Digest;
use std::fmt::Debug;
use thiserror::Error;

mod branches;
pub use branches::Branches;
mod storage;
pub use storage::Engine;

/// Errors that can occur when interacting with the [Engine].
#[derive(Debug, Error)]
pub enum Error {
    #[error("engine not initialized")]
    Uninitialized,
    #[error("unknown creator: {0}")]
    UnknownCreator(String),
    #[error("event not found: {0}")]
    EventNotFound(String),
    #[error("parent not found: {0}")]
    ParentNotFound(String),
    #[error("self-parent {0} belongs to another creator")]
    InvalidSelfParent(String),
    #[error("first event must have seq 1, got {0}")]
    InvalidFirstEvent(Seq),
    #[error("inconsistent branches: {0}")]
    InconsistentBranches(&'static str),
    #[error("store error: {0}")]
    Store(#[from] kv::Error),
    #[error("codec error: {0}")]
    Codec(#[from] commonware_codec::Error),
}

impl Error {
    /// Returns `true` if the error indicates that the index may no longer be consistent.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Store(_) | Error::Codec(_) | Error::InconsistentBranches(_)
        )
    }
}

/// Vector of the highest sequence observed (in the causal past of an event) per branch.
pub trait HighestBefore: Clone + Debug + Send + Sync + 'static {
    /// Returns the number of branch slots held.
    fn size(&self) -> usize;

    /// Returns `true` if nothing has been observed from `branch`.
    fn is_unobserved(&self, branch: usize) -> bool;

    /// Returns `true` if the creator of `branch` was caught forking.
    fn is_fork_detected(&self, branch: usize) -> bool;

    /// Returns the highest sequence observed on `branch`.
    fn seq(&self, branch: usize) -> Seq;

    /// Returns the lowest sequence observed on `branch`.
    fn min_seq(&self, branch: usize) -> Seq;

    /// Flag the creator of `branch` as forking.
    fn set_fork_detected(&mut self, branch: usize);

    /// Record the event itself (at sequence `seq`) on its own branch.
    fn init_with_event(&mut self, branch: usize, seq: Seq);

    /// Merge another vector (of a parent) into this one over the first `size` branches.
    fn collect_from(&mut self, other: &Self, size: usize);

    /// Collapse the branches `from` of `other` into the single slot `to`.
    fn gather_from(&mut self, to: usize, other: &Self, from: &[usize]);
}

/// Vector of the lowest sequence (per branch) of an event that observes a given event.
pub trait LowestAfter: Clone + Debug + Send + Sync + 'static {
    /// Returns the lowest observing sequence on `branch` (`0` if not observed yet).
    fn seq(&self, branch: usize) -> Seq;

    /// Record the event itself (at sequence `seq`) on its own branch.
    fn init_with_event(&mut self, branch: usize, seq: Seq);

    /// Record that an event at sequence `seq` on `branch` observes this event.
    ///
    /// Returns `false` (and leaves the vector untouched) if `branch` already observed it.
    fn visit(&mut self, branch: usize, seq: Seq) -> bool;
}

/// Capabilities the [Engine] requires from a concrete vector layout.
pub trait Vectors<D: Digest>: Send + Sync + 'static {
    /// Layout of _HighestBefore_ vectors.
    type HighestBefore: HighestBefore;

    /// Layout of _LowestAfter_ vectors.
    type LowestAfter: LowestAfter;

    /// Allocate an empty _HighestBefore_ vector with `size` branch slots.
    fn new_highest_before(&self, size: usize) -> Self::HighestBefore;

    /// Allocate an empty _LowestAfter_ vector with `size` branch slots.
    fn new_lowest_after(&self, size: usize) -> Self::LowestAfter;

    /// Load the _HighestBefore_ vector of an event.
    fn get_highest_before<S: kv::Store>(
        &self,
        db: &S,
        id: &D,
    ) -> Result<Option<Self::HighestBefore>, Error>;

    /// Load the _LowestAfter_ vector of an event.
    fn get_lowest_after<S: kv::Store>(
        &self,
        db: &S,
        id: &D,
    ) -> Result<Option<Self::LowestAfter>, Error>;

    /// Store the _HighestBefore_ vector of an event.
    fn set_highest_before<S: kv::Store>(
        &self,
        db: &mut S,
        id: &D,
        vector: Self::HighestBefore,
    ) -> Result<(), Error>;

    /// Store the _LowestAfter_ vector of an event.
    fn set_lowest_after<S: kv::Store>(
        &self,
        db: &mut S,
        id: &D,
        vector: Self::LowestAfter,
    ) -> Result<(), Error>;

    /// Called when the engine is bound to a new database (epoch change).
    fn on_reset(&self);

    /// Called when unflushed writes are discarded.
    ///
    /// Any cached vector may have been written but never persisted, so all caches must be purged.
    fn on_drop_not_flushed(&self);
}
