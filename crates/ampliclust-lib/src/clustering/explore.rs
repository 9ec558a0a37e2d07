//! Abundance-ordered OTU growth over the match graph.

use rustc_hash::FxHashSet;

use super::matches::MatchStore;
use crate::amplicon::Pool;
use crate::config::ClusterConfig;

/// One amplicon inside an OTU, with its link back to the member it was
/// reached from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OtuMember {
    /// Amplicon position inside its pool.
    pub id: usize,
    /// Position of the parent amplicon; for a seed this is repurposed as
    /// the pool id (members with generation 0 mark a pool context switch).
    pub parent_id: usize,
    /// Edit distance to the parent.
    pub parent_dist: usize,
    /// BFS generation, 0 for the seed.
    pub gen: usize,
    /// Sum of distances along the chain back to the seed.
    pub rad: usize,
}

/// One cluster: the seed, its members in growth order and aggregate
/// statistics.
#[derive(Clone, Debug)]
pub struct Otu {
    pub pool_id: usize,
    pub seed: usize,
    pub seed_abundance: u64,
    pub members: Vec<OtuMember>,
    pub mass: u64,
    pub num_unique: usize,
    pub num_singletons: usize,
    pub max_gen: usize,
    pub max_rad: usize,
    /// Set when this OTU was grafted onto a heavy one.
    pub attached: bool,
}

impl Otu {
    pub fn size(&self) -> usize {
        self.members.len()
    }
}

/// Grow OTUs by BFS over the match store, most abundant seed first.
pub(crate) fn explore_pool(
    pool: &Pool,
    matches: &MatchStore,
    cfg: &ClusterConfig,
    pool_id: usize,
) -> Vec<Otu> {
    let mut order: Vec<usize> = (0..pool.len()).collect();
    order.sort_by(|&a, &b| {
        pool.abundance(b)
            .cmp(&pool.abundance(a))
            .then(a.cmp(&b))
    });

    let mut otus = Vec::new();
    let mut visited = vec![false; pool.len()];
    let mut non_uniques: FxHashSet<&[u8]> = FxHashSet::default();

    for &seed in &order {
        if visited[seed] {
            continue;
        }

        let mut otu = Otu {
            pool_id,
            seed,
            seed_abundance: pool.abundance(seed),
            members: vec![OtuMember {
                id: seed,
                parent_id: seed,
                parent_dist: 0,
                gen: 0,
                rad: 0,
            }],
            mass: 0,
            num_unique: 0,
            num_singletons: 0,
            max_gen: 0,
            max_rad: 0,
            attached: false,
        };
        visited[seed] = true;
        non_uniques.clear();

        let mut last_gen = 0;
        let mut pos = 0;
        while pos < otu.members.len() {
            // work through each generation by decreasing abundance
            if otu.members[pos].gen != last_gen {
                otu.members[pos..].sort_by(|a, b| {
                    pool.abundance(b.id)
                        .cmp(&pool.abundance(a.id))
                        .then(a.id.cmp(&b.id))
                });
            }

            let cur = otu.members[pos];
            let cur_abundance = pool.abundance(cur.id);
            let mut unique = true;

            otu.mass += cur_abundance;
            otu.num_singletons += usize::from(cur_abundance == 1);
            otu.max_gen = otu.max_gen.max(cur.gen);
            otu.max_rad = otu.max_rad.max(cur.rad);

            // an amplicon is claimed the first time it appears as a partner
            // so no other subseed can queue it again
            for &(partner, dist) in matches.neighbours(cur.id) {
                unique &= dist != 0;
                if !visited[partner]
                    && (cfg.no_otu_breaking || pool.abundance(partner) <= cur_abundance)
                {
                    otu.members.push(OtuMember {
                        id: partner,
                        parent_id: cur.id,
                        parent_dist: dist,
                        gen: cur.gen + 1,
                        rad: cur.rad + dist,
                    });
                    visited[partner] = true;
                }
            }

            // non-unique sequences count once, unless dereplicating
            unique = unique || cfg.dereplicate || non_uniques.insert(pool.seq(cur.id));
            otu.num_unique += usize::from(unique);

            last_gen = cur.gen;
            pos += 1;
        }

        otus.push(otu);
    }

    otus
}
