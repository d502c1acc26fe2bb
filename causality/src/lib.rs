//! Index causality and detect forks in a DAG of events.
//!
//! # Overview
//!
//! Validators contribute events to a shared DAG. Each event names a set of parents (the events
//! its creator had seen when creating it) and carries a per-creator sequence number. This crate
//! incrementally computes, for every event, two compact vectors:
//!
//! - _HighestBefore_: for every validator branch, the highest sequence number observed in the
//!   event's causal past (and whether that validator was caught forking).
//! - _LowestAfter_: for every validator branch, the lowest sequence number of an event that
//!   observes this event (filled in lazily as descendants arrive).
//!
//! Together they answer "does `a` forklessly cause `b`" (a quorum of non-forking weight observed
//! `a` in the causal past of `b`) without rescanning the DAG. This is the primitive from which an
//! aBFT ordering layer derives its decisions.
//!
//! # Structure
//!
//! - [validators]: the per-epoch registry of validators, their weights, and quorum accounting.
//! - [kv]: the byte-oriented storage interface, an in-memory store, and a flushable write buffer.
//! - [cache]: a bounded, weighted approximation of LRU used in front of every table.
//! - [engine]: the generic vector-clock engine, independent of the concrete vector layout.
//! - [fc]: the sequence-vector layout and the forkless-cause decision procedure.
//!
//! # Forks
//!
//! A fork (two events by the same validator that are not ordered by causality) is not an error.
//! Forks are tracked by giving the forking validator additional _branches_ and are recorded as a
//! flag inside the vectors of every event that observes them. Forked validators never contribute
//! weight to a forkless-cause quorum.
//!
//! # Status
//!
//! `commonware-causality` is **ALPHA** software and is not yet recommended for production use. Developers should
//! expect breaking changes and occasional instability.

use commonware_cryptography::Digest;
use std::{
    fmt::{Debug, Display},
    hash::Hash,
};

pub mod cache;
pub mod engine;
pub mod fc;
pub mod kv;
#[cfg(any(test, feature = "mocks"))]
pub mod mocks;
pub mod validators;

/// Per-creator sequence number of an event (the first event of a creator has sequence `1`).
pub type Seq = u32;

/// Stake weight of a validator.
pub type Weight = u64;

/// Identity of a validator.
pub trait Participant: Clone + Ord + Hash + Debug + Display + Send + Sync + 'static {}

impl<T> Participant for T where T: Clone + Ord + Hash + Debug + Display + Send + Sync + 'static {}

/// An immutable node of the DAG.
///
/// Events handed to this crate must already have passed admission (structural, epoch, and
/// parent-count checks) and all of their parents must already be indexed.
pub trait Event: Clone + Send + Sync + 'static {
    /// Identity of an event.
    type Digest: Digest;

    /// Identity of the validator that created the event.
    type PublicKey: Participant;

    /// Returns the identity of the event.
    fn id(&self) -> Self::Digest;

    /// Returns the validator that created the event.
    fn creator(&self) -> &Self::PublicKey;

    /// Returns the sequence number of the event within its creator's chain.
    fn seq(&self) -> Seq;

    /// Returns the parents of the event.
    ///
    /// For any event other than the first of its creator, the first parent is the self-parent.
    fn parents(&self) -> &[Self::Digest];

    /// Returns the timestamp claimed by the creator.
    fn timestamp(&self) -> u64;

    /// Returns the previous event of the same creator, if any.
    fn self_parent(&self) -> Option<&Self::Digest> {
        if self.seq() <= 1 {
            return None;
        }
        self.parents().first()
    }
}

/// Lookup of already-admitted events.
pub trait Source: Send + Sync + 'static {
    /// The type of event provided.
    type Event: Event;

    /// Returns whether the event is known.
    fn has_event(&self, id: &<Self::Event as Event>::Digest) -> bool;

    /// Returns the event, if known.
    fn get_event(&self, id: &<Self::Event as Event>::Digest) -> Option<Self::Event>;
}
