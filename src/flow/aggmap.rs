//! The immutable output of a rotation: two submaps (v4, v6) from [`EPHash`]
//! to [`Counters`]. See spec.md §3.

use rustc_hash::FxHashMap;

use super::counters::Counters;
use crate::packet::EPHash;

#[derive(Debug, Clone, Default)]
pub struct AggFlowMap {
    pub v4: FxHashMap<EPHash, Counters>,
    pub v6: FxHashMap<EPHash, Counters>,
}

impl AggFlowMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.v4.len() + self.v6.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EPHash, &Counters)> {
        self.v4.iter().chain(self.v6.iter())
    }

    /// Sum of all counters across both submaps — used to check rotation
    /// conservation (spec.md §8, property 4).
    pub fn total_counters(&self) -> Counters {
        let mut total = Counters::default();
        for (_, c) in self.iter() {
            total += *c;
        }
        total
    }
}
