//! Per-pool store of verified matches.
//!
//! Pairs are canonicalised to (min, max) on insert and mirrored into twin
//! adjacency lists so the explorer can walk the neighbours of one amplicon
//! in O(degree). `finalize` sorts every adjacency list by partner position,
//! which makes exploration deterministic for any verifier-thread count.

use rustc_hash::FxHashSet;

pub struct MatchStore {
    pairs: FxHashSet<(usize, usize)>,
    adjacency: Vec<Vec<(usize, usize)>>,
}

impl MatchStore {
    pub fn new(num_amplicons: usize) -> Self {
        Self {
            pairs: FxHashSet::default(),
            adjacency: vec![Vec::new(); num_amplicons],
        }
    }

    /// Record a verified match at distance `dist`.
    pub fn add(&mut self, a: usize, b: usize, dist: usize) {
        let key = (a.min(b), a.max(b));
        if self.pairs.insert(key) {
            self.adjacency[a].push((b, dist));
            self.adjacency[b].push((a, dist));
        }
    }

    pub fn contains(&self, a: usize, b: usize) -> bool {
        self.pairs.contains(&(a.min(b), a.max(b)))
    }

    pub fn num_matches(&self) -> usize {
        self.pairs.len()
    }

    pub fn neighbours(&self, i: usize) -> &[(usize, usize)] {
        &self.adjacency[i]
    }

    /// Merge the per-verifier partitions into one store.
    pub fn from_partitions(
        num_amplicons: usize,
        partitions: Vec<Vec<(usize, usize, usize)>>,
    ) -> Self {
        let mut store = Self::new(num_amplicons);
        for partition in partitions {
            for (a, b, dist) in partition {
                store.add(a, b, dist);
            }
        }
        store
    }

    /// Sort adjacency lists by partner position.
    pub fn finalize(&mut self) {
        for list in &mut self.adjacency {
            list.sort_unstable_by_key(|&(partner, _)| partner);
        }
    }
}
