//! Fastidious grafting of light OTUs onto heavy ones.
//!
//! For every pool, the members of all light OTUs are put into a rolling
//! inverted index at the doubled threshold. Heavy-OTU members of the pool
//! and of every neighbour pool within reach then probe that index; children
//! collecting enough segment hits are verified at the doubled threshold and
//! recorded as graft candidates, keeping the best parent per child. After
//! all pools are processed, the accepted grafts move each light OTU's
//! member list onto its heavy parent.

use parking_lot::Mutex;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use tracing::info;

use super::buffer::RotatingBuffers;
use super::explore::Otu;
use super::index::RollingIndices;
use super::segments::{select_segments, select_substrs, select_substrs_backward, Substrings};
use super::verify::{
    bounded_affine_distance_with, bounded_edit_distance_with, AffineScratch,
};
use crate::amplicon::{qgram_diff, AmpliconPools, Pool};
use crate::config::{ClusterConfig, FastidiousCheckMode};
use anyhow::{Context, Result};

/// Stable reference to a heavy-OTU member acting as graft parent.
#[derive(Clone, Copy, Debug)]
struct ParentRef {
    pool: usize,
    otu: usize,
    amplicon: usize,
}

/// Per-amplicon graft slot of one pool: the child coordinates are fixed
/// during indexing, the parent is raced for under the slot lock.
#[derive(Clone, Copy, Default)]
struct GraftSlot {
    parent: Option<ParentRef>,
    child_otu: Option<usize>,
}

/// An accepted graft: one light OTU and the heavy member it attaches to.
struct Graft {
    parent: ParentRef,
    child_pool: usize,
    child_otu: usize,
    child_rank: usize,
}

/// Candidate batch handed to the fastidious verifier workers: one heavy
/// parent and the children that passed the segment count.
struct FastidiousCandidate {
    parent: ParentRef,
    children: Vec<usize>,
}

/// Does `candidate` beat the parent currently recorded in `slot`?
fn is_better_parent(pools: &AmpliconPools, candidate: ParentRef, slot: &GraftSlot) -> bool {
    match slot.parent {
        None => true,
        Some(old) => {
            let new_ab = pools.get(candidate.pool).abundance(candidate.amplicon);
            let old_ab = pools.get(old.pool).abundance(old.amplicon);
            new_ab > old_ab
                || (new_ab == old_ab
                    && pools.get(candidate.pool).rank(candidate.amplicon)
                        < pools.get(old.pool).rank(old.amplicon))
        }
    }
}

/// Substring-window tables per heavy-member length, built lazily.
type SubstrsArchive = FxHashMap<usize, FxHashMap<usize, Vec<Substrings>>>;

fn substrs_for<'a>(
    archive: &'a mut SubstrsArchive,
    seq_len: usize,
    t2: usize,
    k: usize,
) -> &'a FxHashMap<usize, Vec<Substrings>> {
    archive.entry(seq_len).or_insert_with(|| {
        let m = t2 + k;
        let mut by_len = FxHashMap::default();
        for partner_len in seq_len.saturating_sub(t2).max(1)..=seq_len + t2 {
            let windows: Vec<Substrings> = (0..m)
                .map(|i| {
                    if partner_len <= seq_len {
                        select_substrs(seq_len, partner_len, i, t2, k)
                    } else {
                        select_substrs_backward(seq_len, partner_len, i, t2, k)
                    }
                })
                .collect();
            by_len.insert(partner_len, windows);
        }
        by_len
    })
}

/// Collect, for one heavy member, every indexed child with >= k segment
/// hits that also passes the q-gram pre-check.
fn probe_children(
    ac_otus: &Pool,
    ac_indices: &Pool,
    member_id: usize,
    indices: &RollingIndices<'_>,
    archive: &mut SubstrsArchive,
    cfg: &ClusterConfig,
    children: &mut Vec<usize>,
) {
    let t2 = cfg.effective_fastidious_threshold();
    let k = cfg.extra_segments;
    let seq = ac_otus.seq(member_id);
    let seq_len = seq.len();
    let substrs = substrs_for(archive, seq_len, t2, k);

    let mut cand_cnts: Vec<usize> = Vec::new();
    for len in seq_len.saturating_sub(t2).max(1)..=seq_len + t2 {
        if !indices.contains(len) {
            continue;
        }
        let Some(windows) = substrs.get(&len) else {
            continue;
        };
        cand_cnts.clear();
        for (i, subs) in windows.iter().enumerate() {
            if subs.first > subs.last {
                continue;
            }
            if let Some(column) = indices.get(len, i) {
                for pos in subs.first..=subs.last {
                    column.add_label_counts_of(&seq[pos..pos + subs.len], &mut cand_cnts);
                }
            }
        }
        cand_cnts.sort_unstable();

        let mut prev = if cand_cnts.is_empty() { 0 } else { cand_cnts[0] };
        let mut cnt = 0;
        let mut accept = |child: usize, cnt: usize| {
            if cnt >= k
                && (!cfg.qgram_filter
                    || qgram_diff(ac_otus.qgram(member_id), ac_indices.qgram(child))
                        <= cfg.threshold)
            {
                children.push(child);
            }
        };
        for &cand in &cand_cnts {
            if cand != prev {
                accept(prev, cnt);
                prev = cand;
                cnt = 1;
            } else {
                cnt += 1;
            }
        }
        if cnt > 0 {
            accept(prev, cnt);
        }
    }
}

fn verify_child_distance(
    parent_seq: &[u8],
    child_seq: &[u8],
    t2: usize,
    cfg: &ClusterConfig,
    row: &mut Vec<usize>,
    affine: &mut AffineScratch,
) -> usize {
    if cfg.use_score {
        bounded_affine_distance_with(parent_seq, child_seq, t2, &cfg.scoring, affine)
    } else {
        bounded_edit_distance_with(parent_seq, child_seq, t2, row)
    }
}

/// Verify one child against one parent and update the slot if it wins.
/// The lock is dropped around the DP so verification runs unlocked.
fn verify_and_record(
    pools: &AmpliconPools,
    ac_otus: &Pool,
    ac_indices: &Pool,
    parent: ParentRef,
    child: usize,
    slots: &Mutex<Vec<GraftSlot>>,
    cfg: &ClusterConfig,
    row: &mut Vec<usize>,
    affine: &mut AffineScratch,
) {
    let t2 = cfg.effective_fastidious_threshold();
    {
        let guard = slots.lock();
        if !is_better_parent(pools, parent, &guard[child]) {
            return;
        }
    }
    let dist = verify_child_distance(
        ac_otus.seq(parent.amplicon),
        ac_indices.seq(child),
        t2,
        cfg,
        row,
        affine,
    );
    if dist <= t2 {
        let mut guard = slots.lock();
        if is_better_parent(pools, parent, &guard[child]) {
            guard[child].parent = Some(parent);
        }
    }
}

/// Scan the heavy OTUs of pool `q` against the light-OTU index of pool `p`.
fn check_and_verify(
    pools: &AmpliconPools,
    otus: &[Vec<Otu>],
    q: usize,
    p: usize,
    indices: &RollingIndices<'_>,
    slots: &Mutex<Vec<GraftSlot>>,
    cfg: &ClusterConfig,
) {
    let ac_otus = pools.get(q);
    let ac_indices = pools.get(p);
    let mut archive = SubstrsArchive::default();

    if cfg.check_threads <= 1 {
        let mut row = Vec::new();
        let mut affine = AffineScratch::default();
        let mut children = Vec::new();
        for (oi, otu) in otus[q].iter().enumerate() {
            if otu.mass < cfg.boundary {
                continue;
            }
            for mem in &otu.members {
                children.clear();
                probe_children(ac_otus, ac_indices, mem.id, indices, &mut archive, cfg, &mut children);
                let parent = ParentRef { pool: q, otu: oi, amplicon: mem.id };
                for &child in &children {
                    verify_and_record(
                        pools, ac_otus, ac_indices, parent, child, slots, cfg, &mut row,
                        &mut affine,
                    );
                }
            }
        }
        return;
    }

    let (buffers, receivers) = RotatingBuffers::new(cfg.check_threads, cfg.buffer_capacity);
    std::thread::scope(|scope| {
        for rx in receivers {
            scope.spawn(move || {
                let mut row = Vec::new();
                let mut affine = AffineScratch::default();
                for batch in rx {
                    for cand in batch {
                        let FastidiousCandidate { parent, children } = cand;
                        for child in children {
                            verify_and_record(
                                pools, ac_otus, ac_indices, parent, child, slots, cfg,
                                &mut row, &mut affine,
                            );
                        }
                    }
                }
            });
        }

        for (oi, otu) in otus[q].iter().enumerate() {
            if otu.mass < cfg.boundary {
                continue;
            }
            for mem in &otu.members {
                let mut children = Vec::new();
                probe_children(ac_otus, ac_indices, mem.id, indices, &mut archive, cfg, &mut children);
                if !children.is_empty() {
                    buffers.push(vec![FastidiousCandidate {
                        parent: ParentRef { pool: q, otu: oi, amplicon: mem.id },
                        children,
                    }]);
                }
            }
        }
        drop(buffers);
    });
}

/// Build the light-OTU index for pool `p` and search it from every heavy
/// OTU in reach; returns the accepted graft candidates of the pool.
fn determine_grafts(
    pools: &AmpliconPools,
    otus: &[Vec<Otu>],
    p: usize,
    cfg: &ClusterConfig,
) -> Vec<Graft> {
    let ac = pools.get(p);
    let t2 = cfg.effective_fastidious_threshold();
    let k = cfg.extra_segments;
    let m = t2 + k;

    // the probe sweeps lengths in [len - t2, len + t2], so the index must
    // hold the full range and must not shrink
    let mut indices: RollingIndices<'_> = RollingIndices::new(2 * t2 + 1, m, true, false);
    let mut slots: Vec<GraftSlot> = vec![GraftSlot::default(); ac.len()];

    let mut segments_archive: FxHashMap<usize, Vec<(usize, usize)>> = FxHashMap::default();
    for (oi, otu) in otus[p].iter().enumerate() {
        if otu.mass >= cfg.boundary {
            continue;
        }
        for mem in &otu.members {
            let len = ac.length(mem.id);
            let segments = segments_archive.entry(len).or_insert_with(|| {
                select_segments(len, t2, k)
            });
            indices.roll(len);
            let seq = ac.seq(mem.id);
            for (i, &(start, seg_len)) in segments.iter().enumerate() {
                if let Some(column) = indices.get_mut(len, i) {
                    column.add(&seq[start..start + seg_len], mem.id);
                }
            }
            slots[mem.id].child_otu = Some(oi);
        }
    }

    let half_range = t2 / (cfg.threshold + 1);
    let min_p = p.saturating_sub(half_range);
    let max_p = (p + half_range).min(pools.num_pools() - 1);
    let slots = Mutex::new(slots);

    match cfg.check_mode {
        FastidiousCheckMode::Serial => {
            for q in min_p..=max_p {
                check_and_verify(pools, otus, q, p, &indices, &slots, cfg);
            }
        }
        FastidiousCheckMode::ParallelSelf => {
            std::thread::scope(|scope| {
                scope.spawn(|| check_and_verify(pools, otus, p, p, &indices, &slots, cfg));
                for q in (min_p..p).chain(p + 1..=max_p) {
                    check_and_verify(pools, otus, q, p, &indices, &slots, cfg);
                }
            });
        }
        FastidiousCheckMode::PerDirection => {
            std::thread::scope(|scope| {
                scope.spawn(|| check_and_verify(pools, otus, p, p, &indices, &slots, cfg));
                for d in 1..=half_range {
                    std::thread::scope(|pair| {
                        if d <= p - min_p {
                            pair.spawn(|| {
                                check_and_verify(pools, otus, p - d, p, &indices, &slots, cfg)
                            });
                        }
                        if d <= max_p - p {
                            pair.spawn(|| {
                                check_and_verify(pools, otus, p + d, p, &indices, &slots, cfg)
                            });
                        }
                    });
                }
            });
        }
    }

    slots
        .into_inner()
        .into_iter()
        .enumerate()
        .filter_map(|(amplicon, slot)| {
            let parent = slot.parent?;
            Some(Graft {
                parent,
                child_pool: p,
                child_otu: slot.child_otu?,
                child_rank: ac.rank(amplicon),
            })
        })
        .collect()
}

/// Search every pool for graft candidates and commit them best-first.
/// Returns the number of grafts performed.
pub(crate) fn graft_otus(
    pools: &AmpliconPools,
    otus: &mut [Vec<Otu>],
    cfg: &ClusterConfig,
) -> Result<usize> {
    let frozen: &[Vec<Otu>] = otus;
    let per_pool: Vec<Vec<Graft>> = if cfg.grafters > 1 {
        let thread_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(cfg.grafters)
            .build()
            .context("failed to start the grafter thread pool")?;
        thread_pool.install(|| {
            (0..pools.num_pools())
                .into_par_iter()
                .map(|p| determine_grafts(pools, frozen, p, cfg))
                .collect()
        })
    } else {
        (0..pools.num_pools())
            .map(|p| determine_grafts(pools, frozen, p, cfg))
            .collect()
    };

    let mut grafts: Vec<Graft> = per_pool.into_iter().flatten().collect();
    info!(candidates = grafts.len(), "collected graft candidates");

    grafts.sort_by(|a, b| {
        let a_mass = otus[a.parent.pool][a.parent.otu].mass;
        let b_mass = otus[b.parent.pool][b.parent.otu].mass;
        let a_ab = pools.get(a.parent.pool).abundance(a.parent.amplicon);
        let b_ab = pools.get(b.parent.pool).abundance(b.parent.amplicon);
        let a_rank = pools.get(a.parent.pool).rank(a.parent.amplicon);
        let b_rank = pools.get(b.parent.pool).rank(b.parent.amplicon);
        b_mass
            .cmp(&a_mass)
            .then(b_ab.cmp(&a_ab))
            .then(a_rank.cmp(&b_rank))
            .then(a.child_rank.cmp(&b.child_rank))
    });

    let mut num_grafts = 0;
    for graft in &grafts {
        if otus[graft.child_pool][graft.child_otu].attached {
            continue;
        }

        let child = &mut otus[graft.child_pool][graft.child_otu];
        let members = std::mem::take(&mut child.members);
        let child_mass = child.mass;
        let child_unique = child.num_unique;
        let child_singletons = child.num_singletons;
        child.attached = true;

        // member entries move unchanged; the grafting link itself is not
        // recorded, and the parent's maximum generation and radius keep
        // their pre-graft values
        let parent = &mut otus[graft.parent.pool][graft.parent.otu];
        parent.members.extend(members);
        parent.mass += child_mass;
        parent.num_unique += child_unique;
        parent.num_singletons += child_singletons;
        num_grafts += 1;
    }

    info!(grafts = num_grafts, "grafting finished");
    Ok(num_grafts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amplicon::InputRecord;
    use crate::clustering::explore::explore_pool;
    use crate::clustering::find_matches;

    fn cluster_pools(
        records: Vec<(&str, &str, u64)>,
        cfg: &ClusterConfig,
    ) -> (AmpliconPools, Vec<Vec<Otu>>) {
        let records = records
            .into_iter()
            .map(|(id, seq, ab)| InputRecord::new(id, seq.as_bytes().to_vec(), ab))
            .collect();
        let pools = AmpliconPools::build(records, cfg.threshold).unwrap();
        let otus = (0..pools.num_pools())
            .map(|p| {
                let pool = pools.get(p);
                let matches = find_matches(pool, cfg);
                explore_pool(pool, &matches, cfg, p)
            })
            .collect();
        (pools, otus)
    }

    #[test]
    fn test_light_otu_attaches_to_heavy() {
        let heavy = "AAAAAAAAAAAA";
        let light = "AACCAAAAAAAA"; // distance 2: beyond the first phase, within t2
        let cfg = ClusterConfig {
            threshold: 1,
            fastidious: true,
            boundary: 3,
            ..ClusterConfig::default()
        };
        let (pools, mut otus) = cluster_pools(
            vec![("h", heavy, 100), ("l", light, 1)],
            &cfg,
        );
        assert_eq!(otus[0].len(), 2, "seeds differ by 2, so two OTUs before grafting");

        let num = graft_otus(&pools, &mut otus, &cfg).unwrap();
        assert_eq!(num, 1);

        let flat: Vec<&Otu> = otus.iter().flatten().collect();
        let surviving: Vec<&&Otu> = flat.iter().filter(|o| !o.attached).collect();
        assert_eq!(surviving.len(), 1);
        assert_eq!(surviving[0].mass, 101);
        assert_eq!(surviving[0].size(), 2);
        let attached: Vec<&&Otu> = flat.iter().filter(|o| o.attached).collect();
        assert_eq!(attached.len(), 1);
    }

    #[test]
    fn test_heavier_parent_wins_the_child() {
        // two heavy OTUs both within t2 of the light seed
        let cfg = ClusterConfig {
            threshold: 1,
            fastidious: true,
            boundary: 10,
            ..ClusterConfig::default()
        };
        let (pools, mut otus) = cluster_pools(
            vec![
                ("h1", "AAAAAAAAAACC", 50),
                ("h2", "AAAAAAAAAATT", 80),
                ("l", "AAAAAAAAAAAA", 1),
            ],
            &cfg,
        );
        // all pairwise distances are 2: no first-phase links, two heavy OTUs
        assert_eq!(otus[0].len(), 3);
        assert_eq!(otus[0].iter().filter(|o| o.mass >= 10).count(), 2);

        graft_otus(&pools, &mut otus, &cfg).unwrap();
        let winner = otus[0]
            .iter()
            .find(|o| !o.attached && o.size() == 2)
            .expect("one heavy OTU must have absorbed the light one");
        assert_eq!(pools.get(0).id(winner.seed), b"h2");
    }

    #[test]
    fn test_no_graft_beyond_fastidious_threshold() {
        let cfg = ClusterConfig {
            threshold: 1,
            fastidious: true,
            boundary: 3,
            ..ClusterConfig::default()
        };
        let (pools, mut otus) = cluster_pools(
            vec![("h", "AAAAAAAAAAAA", 100), ("l", "AACCCAAAAAAA", 1)],
            &cfg,
        );
        let num = graft_otus(&pools, &mut otus, &cfg).unwrap();
        assert_eq!(num, 0, "distance 3 exceeds t2 = 2");
        assert!(otus[0].iter().all(|o| !o.attached));
    }

    #[test]
    fn test_graft_mass_respects_boundary_invariant() {
        let cfg = ClusterConfig {
            threshold: 1,
            fastidious: true,
            boundary: 4,
            ..ClusterConfig::default()
        };
        // h is heavy; l1 and l2 chain into one light OTU two edits from h
        let (pools, mut otus) = cluster_pools(
            vec![
                ("h", "AAAAAAAAAAAA", 6),
                ("l1", "AAAACCAAAAAA", 2),
                ("l2", "AAAACCAAAAAT", 1),
            ],
            &cfg,
        );
        assert_eq!(otus[0].len(), 2);
        let pre_masses: Vec<u64> = otus[0].iter().map(|o| o.mass).collect();
        graft_otus(&pools, &mut otus, &cfg).unwrap();
        for (i, otu) in otus[0].iter().enumerate() {
            if otu.attached {
                assert!(pre_masses[i] < 4, "only light OTUs may be attached");
            }
        }
    }

    #[test]
    fn test_check_threads_do_not_change_the_result() {
        let serial_cfg = ClusterConfig {
            threshold: 1,
            fastidious: true,
            boundary: 3,
            ..ClusterConfig::default()
        };
        let records = vec![
            ("h", "AAAAAAAAAAAA", 100),
            ("l1", "AACCAAAAAAAA", 1),
            ("l2", "AAAAAAAACCAA", 1),
        ];
        let (pools, mut serial_otus) = cluster_pools(records.clone(), &serial_cfg);
        let serial_grafts = graft_otus(&pools, &mut serial_otus, &serial_cfg).unwrap();

        let threaded_cfg = ClusterConfig {
            check_threads: 3,
            check_mode: FastidiousCheckMode::ParallelSelf,
            grafters: 2,
            ..serial_cfg
        };
        let (pools2, mut threaded_otus) = cluster_pools(records, &threaded_cfg);
        let threaded_grafts = graft_otus(&pools2, &mut threaded_otus, &threaded_cfg).unwrap();

        assert_eq!(serial_grafts, threaded_grafts);
        let masses = |otus: &Vec<Vec<Otu>>| -> Vec<u64> {
            otus.iter()
                .flatten()
                .filter(|o| !o.attached)
                .map(|o| o.mass)
                .collect()
        };
        assert_eq!(masses(&serial_otus), masses(&threaded_otus));
    }
}
