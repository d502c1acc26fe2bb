//! Weighted validator registry for a single epoch.
//!
//! A [Validators] registry is immutable. When the validator set changes (at an epoch boundary), a
//! new registry is constructed and bound to the index via reset.
//!
//! Validators are assigned a dense index (`0..len`) used to address vector slots. Validators are
//! ordered by weight (descending) and then by key (ascending), so heavier validators occupy the
//! lowest indices.

use crate::{Participant, Weight};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur when building a [Validators] registry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("no validator with non-zero weight")]
    Empty,
    #[error("total weight overflow")]
    TotalWeightOverflow,
}

/// An ordered set of validators and their weights.
#[derive(Clone, Debug)]
pub struct Validators<P: Participant> {
    keys: Vec<P>,
    weights: Vec<Weight>,
    indices: HashMap<P, usize>,
    total: Weight,
}

impl<P: Participant> Validators<P> {
    /// Create a new registry from `(validator, weight)` pairs.
    ///
    /// Validators with zero weight are ignored. If a validator is provided multiple times, the
    /// last weight wins.
    pub fn new(validators: impl IntoIterator<Item = (P, Weight)>) -> Result<Self, Error> {
        let mut weights: HashMap<P, Weight> = HashMap::new();
        for (key, weight) in validators {
            if weight == 0 {
                weights.remove(&key);
                continue;
            }
            weights.insert(key, weight);
        }
        if weights.is_empty() {
            return Err(Error::Empty);
        }

        // Sort by weight (descending) and then by key
        let mut sorted: Vec<(P, Weight)> = weights.into_iter().collect();
        sorted.sort_by(|(a_key, a_weight), (b_key, b_weight)| {
            b_weight.cmp(a_weight).then_with(|| a_key.cmp(b_key))
        });

        let mut total: Weight = 0;
        let mut keys = Vec::with_capacity(sorted.len());
        let mut values = Vec::with_capacity(sorted.len());
        let mut indices = HashMap::with_capacity(sorted.len());
        for (idx, (key, weight)) in sorted.into_iter().enumerate() {
            total = total.checked_add(weight).ok_or(Error::TotalWeightOverflow)?;
            indices.insert(key.clone(), idx);
            keys.push(key);
            values.push(weight);
        }
        Ok(Self {
            keys,
            weights: values,
            indices,
            total,
        })
    }

    /// Create a registry where every validator has weight `1`.
    pub fn equal(validators: impl IntoIterator<Item = P>) -> Result<Self, Error> {
        Self::new(validators.into_iter().map(|key| (key, 1)))
    }

    /// Returns the number of validators.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns `true` if there are no validators (never the case for a constructed registry).
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Returns the dense index of a validator, if it is part of the set.
    pub fn index(&self, key: &P) -> Option<usize> {
        self.indices.get(key).copied()
    }

    /// Returns the validator at a dense index.
    pub fn key(&self, idx: usize) -> Option<&P> {
        self.keys.get(idx)
    }

    /// Returns the weight of a validator (`0` if unknown).
    pub fn weight(&self, key: &P) -> Weight {
        self.index(key)
            .map(|idx| self.weights[idx])
            .unwrap_or_default()
    }

    /// Returns the weight of the validator at a dense index (`0` if out of range).
    pub fn weight_by_index(&self, idx: usize) -> Weight {
        self.weights.get(idx).copied().unwrap_or_default()
    }

    /// Returns the sum of all weights.
    pub fn total_weight(&self) -> Weight {
        self.total
    }

    /// Returns the minimum weight that is strictly greater than 2/3 of the total weight.
    pub fn quorum(&self) -> Weight {
        ((self.total as u128 * 2 / 3) as Weight) + 1
    }

    /// Returns an iterator over `(validator, weight)` in index order.
    pub fn iter(&self) -> impl Iterator<Item = (&P, Weight)> + '_ {
        self.keys.iter().zip(self.weights.iter().copied())
    }

    /// Returns a new [Counter] over this registry.
    pub fn counter(&self) -> Counter<'_, P> {
        Counter {
            validators: self,
            counted: vec![false; self.len()],
            sum: 0,
        }
    }
}

/// Accumulates the weight of distinct validators.
pub struct Counter<'a, P: Participant> {
    validators: &'a Validators<P>,
    counted: Vec<bool>,
    sum: Weight,
}

impl<P: Participant> Counter<'_, P> {
    /// Count a validator by key.
    ///
    /// Returns `false` if the validator is unknown or was already counted.
    pub fn count(&mut self, key: &P) -> bool {
        match self.validators.index(key) {
            Some(idx) => self.count_by_index(idx),
            None => false,
        }
    }

    /// Count a validator by dense index.
    ///
    /// Returns `false` if the index is out of range or was already counted.
    pub fn count_by_index(&mut self, idx: usize) -> bool {
        let Some(counted) = self.counted.get_mut(idx) else {
            return false;
        };
        if *counted {
            return false;
        }
        *counted = true;
        self.sum += self.validators.weights[idx];
        true
    }

    /// Returns the accumulated weight.
    pub fn sum(&self) -> Weight {
        self.sum
    }

    /// Returns whether the accumulated weight reaches the quorum.
    pub fn has_quorum(&self) -> bool {
        self.sum >= self.validators.quorum()
    }
}
