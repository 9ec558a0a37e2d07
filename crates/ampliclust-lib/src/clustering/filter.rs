//! The pigeonhole segment filter.
//!
//! Amplicons are scanned in pool order. On every length change the rolling
//! indices advance and the substring-window tables for all feasible partner
//! lengths are recomputed. For each amplicon, every window position is
//! probed against the matching index column; partners collecting at least k
//! segment hits become candidates. The amplicon is indexed afterwards, so
//! every emitted pair points from the current amplicon to an earlier one.
//!
//! The two-stage modes re-run the opposite-direction substring test on the
//! surviving partner before emitting, which removes most false positives
//! ahead of verification.

use super::index::RollingIndices;
use super::segments::{select_segments, select_substrs, select_substrs_backward, Substrings};
use crate::amplicon::{Pool, Subpool};
use crate::config::FilterMode;

/// Unverified pair: `first` is the amplicon whose scan emitted the pair,
/// `second` the indexed partner.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub first: usize,
    pub second: usize,
}

/// Run the segment filter over one sub-pool, handing each amplicon's
/// candidate batch to `sink`.
///
/// Forward modes expect forward sub-pool boundaries, backward modes
/// backward ones.
pub(crate) fn filter_subpool<'p>(
    pool: &'p Pool,
    sp: Subpool,
    mode: FilterMode,
    tau: usize,
    k: usize,
    sink: &mut dyn FnMut(Vec<Candidate>),
) {
    match mode {
        FilterMode::Forward => filter_forward(pool, sp, tau, k, false, sink),
        FilterMode::ForwardBackward => filter_forward(pool, sp, tau, k, true, sink),
        FilterMode::Backward => filter_backward(pool, sp, tau, k, false, sink),
        FilterMode::BackwardForward => filter_backward(pool, sp, tau, k, true, sink),
    }
}

fn filter_forward<'p>(
    pool: &'p Pool,
    sp: Subpool,
    tau: usize,
    k: usize,
    two_stage: bool,
    sink: &mut dyn FnMut(Vec<Candidate>),
) {
    let m = tau + k;
    let mut indices: RollingIndices<'p> = RollingIndices::new(tau + 1, m, true, true);
    let mut substrs = vec![vec![Substrings::default(); m]; tau + 1];
    let mut segments: Vec<(usize, usize)> = Vec::new();
    let mut cand_cnts: Vec<usize> = Vec::new();
    let mut seq_len = 0usize;

    // shared index prefix
    for cur in sp.begin_index..sp.begin_match {
        let len = pool.length(cur);
        if len != seq_len {
            seq_len = len;
            indices.roll(seq_len);
            segments = select_segments(seq_len, tau, k);
        }
        index_amplicon(&mut indices, pool.seq(cur), &segments, seq_len, cur);
    }

    seq_len = 0; // force the window tables on the first filtered amplicon
    for cur in sp.begin_match..sp.end {
        let len = pool.length(cur);
        if len != seq_len {
            seq_len = len;
            indices.roll(seq_len);
            for len_diff in 0..=tau {
                for (i, slot) in substrs[len_diff].iter_mut().enumerate() {
                    *slot = if len_diff < seq_len {
                        select_substrs(seq_len, seq_len - len_diff, i, tau, k)
                    } else {
                        Substrings { first: 1, last: 0, len: 0 }
                    };
                }
            }
            segments = select_segments(seq_len, tau, k);
        }

        let seq = pool.seq(cur);
        let seg_strs: Vec<&[u8]> = segments.iter().map(|&(s, l)| &seq[s..s + l]).collect();
        let mut batch: Vec<Candidate> = Vec::new();

        for len in seq_len.saturating_sub(tau)..=seq_len {
            if !indices.contains(len) {
                continue;
            }
            cand_cnts.clear();
            for i in 0..m {
                let subs = &substrs[seq_len - len][i];
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

            if two_stage {
                let cand_subs: Vec<Substrings> = (0..m)
                    .map(|i| select_substrs_backward(len, seq_len, i, tau, k))
                    .collect();
                scan_counts(&cand_cnts, k, |partner| {
                    if opposite_check(pool, partner, &seg_strs, &cand_subs, k) {
                        batch.push(Candidate { first: cur, second: partner });
                    }
                });
            } else {
                scan_counts(&cand_cnts, k, |partner| {
                    batch.push(Candidate { first: cur, second: partner });
                });
            }
        }

        index_amplicon(&mut indices, seq, &segments, seq_len, cur);
        sink(batch);
    }
}

fn filter_backward<'p>(
    pool: &'p Pool,
    sp: Subpool,
    tau: usize,
    k: usize,
    two_stage: bool,
    sink: &mut dyn FnMut(Vec<Candidate>),
) {
    let m = tau + k;
    let mut indices: RollingIndices<'p> = RollingIndices::new(tau + 1, m, false, true);
    let mut substrs = vec![vec![Substrings::default(); m]; tau + 1];
    let mut segments: Vec<(usize, usize)> = Vec::new();
    let mut cand_cnts: Vec<usize> = Vec::new();
    let mut seq_len = 0usize;

    // shared index suffix, read right to left
    for cur in (sp.begin_index..sp.end).rev() {
        let len = pool.length(cur);
        if len != seq_len {
            seq_len = len;
            indices.roll(seq_len);
            segments = select_segments(seq_len, tau, k);
        }
        index_amplicon(&mut indices, pool.seq(cur), &segments, seq_len, cur);
    }

    seq_len = 0;
    for cur in (sp.begin_match..sp.begin_index).rev() {
        let len = pool.length(cur);
        if len != seq_len {
            seq_len = len;
            indices.roll(seq_len);
            for len_diff in 0..=tau {
                for (i, slot) in substrs[len_diff].iter_mut().enumerate() {
                    *slot = select_substrs_backward(seq_len, seq_len + len_diff, i, tau, k);
                }
            }
            segments = select_segments(seq_len, tau, k);
        }

        let seq = pool.seq(cur);
        let seg_strs: Vec<&[u8]> = segments.iter().map(|&(s, l)| &seq[s..s + l]).collect();
        let mut batch: Vec<Candidate> = Vec::new();

        for len in (seq_len..=seq_len + tau).rev() {
            if !indices.contains(len) {
                continue;
            }
            cand_cnts.clear();
            for i in 0..m {
                let subs = &substrs[len - seq_len][i];
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

            if two_stage {
                let cand_subs: Vec<Substrings> = (0..m)
                    .map(|i| select_substrs(len, seq_len, i, tau, k))
                    .collect();
                scan_counts(&cand_cnts, k, |partner| {
                    if opposite_check(pool, partner, &seg_strs, &cand_subs, k) {
                        batch.push(Candidate { first: cur, second: partner });
                    }
                });
            } else {
                scan_counts(&cand_cnts, k, |partner| {
                    batch.push(Candidate { first: cur, second: partner });
                });
            }
        }

        index_amplicon(&mut indices, seq, &segments, seq_len, cur);
        sink(batch);
    }
}

fn index_amplicon<'p>(
    indices: &mut RollingIndices<'p>,
    seq: &'p [u8],
    segments: &[(usize, usize)],
    len: usize,
    cur: usize,
) {
    for (i, &(start, seg_len)) in segments.iter().enumerate() {
        if let Some(column) = indices.get_mut(len, i) {
            column.add(&seq[start..start + seg_len], cur);
        }
    }
}

/// Walk the sorted id list and accept every partner with at least `k` hits.
fn scan_counts(cand_cnts: &[usize], k: usize, mut accept: impl FnMut(usize)) {
    if cand_cnts.is_empty() {
        return;
    }
    let mut prev = cand_cnts[0];
    let mut cnt = 0;
    for &cand in cand_cnts {
        if cand != prev {
            if cnt >= k {
                accept(prev);
            }
            prev = cand;
            cnt = 1;
        } else {
            cnt += 1;
        }
    }
    if cnt >= k {
        accept(prev);
    }
}

/// Opposite-direction re-check: count how many of the current amplicon's
/// segments occur inside the partner's substring windows.
fn opposite_check(
    pool: &Pool,
    partner: usize,
    seg_strs: &[&[u8]],
    cand_subs: &[Substrings],
    k: usize,
) -> bool {
    let cand_seq = pool.seq(partner);
    let mut cnt = 0;
    for (i, subs) in cand_subs.iter().enumerate() {
        if cnt >= k {
            break;
        }
        if subs.first > subs.last {
            continue;
        }
        let window_end = (subs.last + subs.len).min(cand_seq.len());
        let window = &cand_seq[subs.first..window_end];
        let needle = seg_strs[i];
        if needle.is_empty()
            || (needle.len() <= window.len()
                && window.windows(needle.len()).any(|w| w == needle))
        {
            cnt += 1;
        }
    }
    cnt >= k
}
