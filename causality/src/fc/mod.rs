//! Decide whether one event forklessly causes another.
//!
//! # Vectors
//!
//! Every indexed event stores two vectors (addressed by branch, see [crate::engine]):
//!
//! - [HighestBeforeSeq]: for every branch, the `[min_seq, seq]` range of events observed in the
//!   causal past of the event. A branch whose creator was caught forking holds
//!   [BranchSeq::FORKED] instead.
//! - [LowestAfterSeq]: for every branch, the sequence of the first event on that branch that
//!   observes the event (`0` until one is indexed).
//!
//! # Forkless Cause
//!
//! Event `a` forklessly causes event `b` if `b` does not see `a`'s branch as forked and
//! validators holding a quorum of weight each have an event on a non-forked branch that observes
//! `a` and is itself observed by `b`. With the vectors above, a branch qualifies if
//! `0 < LowestAfter(a)[branch] <= HighestBefore(b)[branch].seq`. Each validator is counted once
//! (no matter how many of its branches qualify) and forked validators never count.
//!
//! Results are cached per ordered pair of events until the index is [Index::reset] (or
//! unflushed events are dropped).
//!
//! # Storage
//!
//! Vectors are persisted in the database bound by [Index::reset] (tables `S` and `s`) behind
//! bounded caches sized by [Config]. The database of each epoch must be distinct (for example, a
//! [crate::kv::Prefixed] view of a shared store).

mod index;
pub use index::Index;
mod tables;
#[cfg(test)]
pub(crate) use tables::Sequences;
mod vector;
pub use vector::{BranchSeq, HighestBeforeSeq, LowestAfterSeq};

/// Multiplier applied to cache sizes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Scale {
    pub numerator: usize,
    pub denominator: usize,
}

impl Scale {
    /// Leave sizes untouched.
    pub const fn identity() -> Self {
        Self {
            numerator: 1,
            denominator: 1,
        }
    }

    /// Scale sizes by `numerator / denominator`.
    ///
    /// # Panics
    ///
    /// Panics if `denominator` is zero.
    pub fn ratio(numerator: usize, denominator: usize) -> Self {
        assert!(denominator > 0, "denominator must be non-zero");
        Self {
            numerator,
            denominator,
        }
    }

    /// Scale `value` (never below `1`).
    pub fn apply(&self, value: usize) -> usize {
        let scaled = value as u128 * self.numerator as u128 / self.denominator as u128;
        scaled.clamp(1, usize::MAX as u128) as usize
    }
}

impl Default for Scale {
    fn default() -> Self {
        Self::identity()
    }
}

/// Sizes of the caches of an [Index].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of cached forkless-cause results.
    pub forkless_cause_pairs: usize,

    /// Maximum number of bytes of cached _HighestBefore_ vectors.
    pub highest_before_size: usize,

    /// Maximum number of bytes of cached _LowestAfter_ vectors.
    pub lowest_after_size: usize,
}

/// Configuration for an [Index].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    pub caches: CacheConfig,
}

impl Config {
    /// The production preset with every cache scaled by `scale`.
    pub fn scaled(scale: Scale) -> Self {
        Self {
            caches: CacheConfig {
                forkless_cause_pairs: scale.apply(20_000),
                highest_before_size: scale.apply(160 * 1024),
                lowest_after_size: scale.apply(160 * 1024),
            },
        }
    }

    /// A reduced preset for constrained environments (and tests).
    pub fn lite() -> Self {
        Self {
            caches: CacheConfig {
                forkless_cause_pairs: 500,
                highest_before_size: 4 * 1024,
                lowest_after_size: 4 * 1024,
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::scaled(Scale::identity())
    }
}
