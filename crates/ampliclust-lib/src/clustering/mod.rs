//! The clustering engine.
//!
//! Per pool: segment filter -> bounded verification -> abundance-ordered
//! OTU exploration. Pools are independent and can run on parallel explorer
//! threads; inside a pool the filter can feed parallel verifier workers
//! through rotating bounded buffers. The optional fastidious phase grafts
//! light OTUs onto heavy ones afterwards.

use anyhow::{Context, Result};
use rayon::prelude::*;
use tracing::{debug, info};

mod buffer;
mod explore;
mod fastidious;
mod filter;
mod index;
mod matches;
pub mod segments;
pub mod verify;

pub use explore::{Otu, OtuMember};
pub use filter::Candidate;

use crate::amplicon::{
    subpool_boundaries, subpool_boundaries_backward, AmpliconPools, Pool, Subpool,
};
use crate::config::{ClusterConfig, FilterMode};
use buffer::RotatingBuffers;
use filter::filter_subpool;
use matches::MatchStore;
use verify::{bounded_affine_distance_with, bounded_edit_distance_with, AffineScratch};

/// Cluster all pools and return the flattened, ordered OTU list.
///
/// Attached OTUs (children of a fastidious graft) stay in the list with
/// their `attached` flag set; formatters skip them.
pub fn cluster(pools: &AmpliconPools, cfg: &ClusterConfig) -> Result<Vec<Otu>> {
    cfg.validate()?;
    info!(
        pools = pools.num_pools(),
        amplicons = pools.num_amplicons(),
        threshold = cfg.threshold,
        "clustering started"
    );

    let per_pool: Vec<Vec<Otu>> = if cfg.explorers > 1 {
        let thread_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(cfg.explorers)
            .build()
            .context("failed to start the explorer thread pool")?;
        thread_pool.install(|| {
            (0..pools.num_pools())
                .into_par_iter()
                .map(|p| explore_one(pools.get(p), p, cfg))
                .collect()
        })
    } else {
        (0..pools.num_pools())
            .map(|p| explore_one(pools.get(p), p, cfg))
            .collect()
    };

    process_otus(pools, per_pool, cfg)
}

fn explore_one(pool: &Pool, p: usize, cfg: &ClusterConfig) -> Vec<Otu> {
    let matches = find_matches(pool, cfg);
    debug!(pool = p, matches = matches.num_matches(), "pool verified");
    explore::explore_pool(pool, &matches, cfg, p)
}

fn verify_candidate(
    pool: &Pool,
    cand: &Candidate,
    tau: usize,
    cfg: &ClusterConfig,
    row: &mut Vec<usize>,
    affine: &mut AffineScratch,
) -> usize {
    if cfg.use_score {
        bounded_affine_distance_with(
            pool.seq(cand.first),
            pool.seq(cand.second),
            tau,
            &cfg.scoring,
            affine,
        )
    } else {
        bounded_edit_distance_with(pool.seq(cand.first), pool.seq(cand.second), tau, row)
    }
}

/// Run the segment filter over one pool and verify every candidate,
/// producing the pool's match store.
pub(crate) fn find_matches(pool: &Pool, cfg: &ClusterConfig) -> MatchStore {
    let tau = cfg.threshold;
    let k = cfg.extra_segments;
    let forward = matches!(
        cfg.filter_mode,
        FilterMode::Forward | FilterMode::ForwardBackward
    );
    let subpools: Vec<Subpool> = if cfg.filter_threads > 1 {
        if forward {
            subpool_boundaries(pool, cfg.filter_threads, tau)
        } else {
            subpool_boundaries_backward(pool, cfg.filter_threads, tau)
        }
    } else if forward {
        vec![Subpool::whole_forward(pool)]
    } else {
        vec![Subpool::whole_backward(pool)]
    };

    let mut store = if cfg.verifier_threads <= 1 && subpools.len() == 1 {
        // everything inline on the calling thread
        let mut store = MatchStore::new(pool.len());
        let mut row = Vec::new();
        let mut affine = AffineScratch::default();
        filter_subpool(pool, subpools[0], cfg.filter_mode, tau, k, &mut |batch| {
            for cand in batch {
                let dist = verify_candidate(pool, &cand, tau, cfg, &mut row, &mut affine);
                if dist <= tau {
                    store.add(cand.first, cand.second, dist);
                }
            }
        });
        store
    } else if cfg.verifier_threads <= 1 {
        // one inline-verifying filter worker per sub-pool
        let partitions: Vec<Vec<(usize, usize, usize)>> = std::thread::scope(|scope| {
            let handles: Vec<_> = subpools
                .iter()
                .map(|&sp| {
                    scope.spawn(move || {
                        let mut out = Vec::new();
                        let mut row = Vec::new();
                        let mut affine = AffineScratch::default();
                        filter_subpool(pool, sp, cfg.filter_mode, tau, k, &mut |batch| {
                            for cand in batch {
                                let dist = verify_candidate(
                                    pool, &cand, tau, cfg, &mut row, &mut affine,
                                );
                                if dist <= tau {
                                    out.push((cand.first, cand.second, dist));
                                }
                            }
                        });
                        out
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| match h.join() {
                    Ok(v) => v,
                    Err(e) => std::panic::resume_unwind(e),
                })
                .collect()
        });
        MatchStore::from_partitions(pool.len(), partitions)
    } else {
        // filter producer(s) feeding verifier workers over rotating buffers
        let (buffers, receivers) = RotatingBuffers::new(cfg.verifier_threads, cfg.buffer_capacity);
        let partitions: Vec<Vec<(usize, usize, usize)>> = std::thread::scope(|scope| {
            let verifiers: Vec<_> = receivers
                .into_iter()
                .map(|rx| {
                    scope.spawn(move || {
                        let mut out = Vec::new();
                        let mut row = Vec::new();
                        let mut affine = AffineScratch::default();
                        for batch in rx {
                            for cand in batch {
                                let dist = verify_candidate(
                                    pool, &cand, tau, cfg, &mut row, &mut affine,
                                );
                                if dist <= tau {
                                    out.push((cand.first, cand.second, dist));
                                }
                            }
                        }
                        out
                    })
                })
                .collect();

            if subpools.len() == 1 {
                filter_subpool(pool, subpools[0], cfg.filter_mode, tau, k, &mut |batch| {
                    buffers.push(batch)
                });
                drop(buffers);
            } else {
                for &sp in &subpools {
                    let producer = buffers.clone();
                    scope.spawn(move || {
                        filter_subpool(pool, sp, cfg.filter_mode, tau, k, &mut |batch| {
                            producer.push(batch)
                        });
                    });
                }
                // producers own their clones; dropping ours lets the
                // buffers close once the last producer finishes
                drop(buffers);
            }

            verifiers
                .into_iter()
                .map(|h| match h.join() {
                    Ok(v) => v,
                    Err(e) => std::panic::resume_unwind(e),
                })
                .collect()
        });
        MatchStore::from_partitions(pool.len(), partitions)
    };

    store.finalize();
    store
}

/// Attach pool ids, run the fastidious phase if requested and flatten the
/// per-pool OTU lists into the final output order.
fn process_otus(
    pools: &AmpliconPools,
    mut otus: Vec<Vec<Otu>>,
    cfg: &ClusterConfig,
) -> Result<Vec<Otu>> {
    let mut num_otus = 0;
    let mut max_size = 0;
    let mut max_gen = 0;
    for (p, pool_otus) in otus.iter_mut().enumerate() {
        for otu in pool_otus.iter_mut() {
            otu.pool_id = p;
            // generation-0 entries mark a pool context switch in the output
            otu.members[0].parent_id = p;
            max_size = max_size.max(otu.size());
            max_gen = max_gen.max(otu.max_gen);
        }
        num_otus += pool_otus.len();
    }
    info!(
        swarms = num_otus,
        largest = max_size,
        max_generation = max_gen,
        "first clustering phase finished"
    );

    let mut num_otus_adjusted = num_otus;
    if cfg.fastidious && cfg.threshold > 0 {
        let total_amplicons = pools.num_amplicons();
        let mut num_light = 0;
        let mut light_amplicons = 0;
        for otu in otus.iter().flatten() {
            if otu.mass < cfg.boundary {
                num_light += 1;
                light_amplicons += otu.size();
            }
        }
        info!(
            heavy = num_otus - num_light,
            heavy_amplicons = total_amplicons - light_amplicons,
            light = num_light,
            light_amplicons,
            "light and heavy swarms counted"
        );

        if num_light == 0 || num_light == num_otus {
            info!("only light or only heavy swarms, nothing to graft");
        } else {
            num_otus_adjusted -= fastidious::graft_otus(pools, &mut otus, cfg)?;
        }
    }

    let mut flat: Vec<Otu> = otus.into_iter().flatten().collect();
    if cfg.dereplicate {
        flat.sort_by(|a, b| {
            b.mass
                .cmp(&a.mass)
                .then(a.pool_id.cmp(&b.pool_id))
                .then(a.seed.cmp(&b.seed))
        });
    } else {
        flat.sort_by(|a, b| {
            b.seed_abundance
                .cmp(&a.seed_abundance)
                .then(a.pool_id.cmp(&b.pool_id))
                .then(a.seed.cmp(&b.seed))
        });
    }

    info!(swarms = num_otus_adjusted, "clustering finished");
    Ok(flat)
}
