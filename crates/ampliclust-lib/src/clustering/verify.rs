//! Bounded verification of candidate pairs.
//!
//! `bounded_edit_distance` computes the unit-cost edit distance inside a
//! length-aware diagonal band with one-row storage; `bounded_affine_distance`
//! computes the number of edit operations along an optimal Gotoh alignment.
//! Both return `bound + 1` as the "too far" sentinel and never fail.
//! `gotoh_cigar` backtracks a full Gotoh matrix for the uclust writer.

use crate::config::Scoring;

const POS_INF: usize = usize::MAX / 2;
const NEG_INF: i64 = i64::MIN / 4;

/// Unit-cost edit distance of `s` and `t` if it is <= `bound`, else `bound + 1`.
pub fn bounded_edit_distance(s: &[u8], t: &[u8], bound: usize) -> usize {
    bounded_edit_distance_with(s, t, bound, &mut Vec::new())
}

/// As [`bounded_edit_distance`], reusing `row` as scratch space.
pub fn bounded_edit_distance_with(
    s: &[u8],
    t: &[u8],
    bound: usize,
    row: &mut Vec<usize>,
) -> usize {
    // lengths differing by more than the bound need no DP at all
    if s.len().abs_diff(t.len()) > bound {
        return bound + 1;
    }
    if bound == 0 {
        return usize::from(s != t);
    }

    let (shorter, longer) = if s.len() < t.len() { (s, t) } else { (t, s) };
    let diff = longer.len() - shorter.len();
    let band_low = (bound - diff) / 2;
    let band_high = (bound + diff) / 2;

    // a single feasible diagonal leaves substitutions as the only operation
    if band_low == 0 && band_high == 0 {
        let mut diffs = 0;
        for (a, b) in shorter.iter().zip(longer.iter()) {
            diffs += usize::from(a != b);
            if diffs > bound {
                break;
            }
        }
        return diffs.min(bound + 1);
    }

    row.clear();
    row.resize(longer.len() + 1, 0);
    for (j, cell) in row.iter_mut().enumerate().take(band_high.min(longer.len()) + 1) {
        *cell = j;
    }

    for i in 1..=shorter.len() {
        let mut early = true;

        let j_start = 1 + if i > band_low { i - band_low - 1 } else { 0 };
        let mut diag = row[j_start - 1];
        // band edges: out-of-band cells read as infinity
        row[j_start - 1] = if i <= band_low { i } else { POS_INF };
        if i + band_high <= longer.len() {
            row[i + band_high] = POS_INF;
        }

        let j_end = (i + band_high).min(longer.len());
        for j in j_start..=j_end {
            let sub = diag + usize::from(shorter[i - 1] != longer[j - 1]);
            let del = row[j] + 1;
            let ins = row[j - 1] + 1;
            let value = sub.min(del).min(ins);
            diag = row[j];
            row[j] = value;

            early &= value + (diff + i).abs_diff(j) > bound;
        }

        // all remaining paths through this row already exceed the bound
        if early {
            return bound + 1;
        }
    }

    if row[longer.len()] > bound {
        bound + 1
    } else {
        row[longer.len()]
    }
}

/// Scratch buffers for the banded Gotoh computation, sized on demand.
#[derive(Default)]
pub struct AffineScratch {
    d: Vec<i64>,
    p: Vec<i64>,
    cnt_d: Vec<usize>,
    cnt_p: Vec<usize>,
}

/// Number of edit operations along an optimal Gotoh alignment of `s` and
/// `t` if it is <= `bound`, else `bound + 1`.
pub fn bounded_affine_distance(s: &[u8], t: &[u8], bound: usize, scoring: &Scoring) -> usize {
    bounded_affine_distance_with(s, t, bound, scoring, &mut AffineScratch::default())
}

/// As [`bounded_affine_distance`], reusing the caller's scratch buffers.
pub fn bounded_affine_distance_with(
    s: &[u8],
    t: &[u8],
    bound: usize,
    scoring: &Scoring,
    scratch: &mut AffineScratch,
) -> usize {
    if s.len().abs_diff(t.len()) > bound {
        return bound + 1;
    }
    if bound == 0 {
        return usize::from(s != t);
    }

    let (shorter, longer) = if s.len() < t.len() { (s, t) } else { (t, s) };
    let diff = longer.len() - shorter.len();
    let band_low = (bound - diff) / 2;
    let band_high = (bound + diff) / 2;

    if band_low == 0 && band_high == 0 {
        let mut diffs = 0;
        for (a, b) in shorter.iter().zip(longer.iter()) {
            diffs += usize::from(a != b);
            if diffs > bound {
                break;
            }
        }
        return diffs.min(bound + 1);
    }

    let reward = scoring.match_reward as i64;
    let penalty = scoring.mismatch_penalty as i64;
    let gap_open = (scoring.gap_open_penalty + scoring.gap_extend_penalty) as i64;
    let gap_extend = scoring.gap_extend_penalty as i64;

    let width = longer.len() + 1;
    let d = &mut scratch.d;
    let p = &mut scratch.p;
    let cnt_d = &mut scratch.cnt_d;
    let cnt_p = &mut scratch.cnt_p;
    d.clear();
    d.resize(width, NEG_INF);
    p.clear();
    p.resize(width, NEG_INF);
    cnt_d.clear();
    cnt_d.resize(width, POS_INF);
    cnt_p.clear();
    cnt_p.resize(width, POS_INF);

    d[0] = 0;
    cnt_d[0] = 0;
    for j in 1..=band_high.min(longer.len()) {
        d[j] = -(scoring.gap_open_penalty as i64) - j as i64 * gap_extend;
        cnt_d[j] = j;
    }

    for i in 1..=shorter.len() {
        let mut early = true;

        let j_start = 1 + if i > band_low { i - band_low - 1 } else { 0 };
        let mut diag = d[j_start - 1];
        let mut diag_cnt = cnt_d[j_start - 1];

        // left band edge: epsilon column inside the band, wall outside it
        if i <= band_low {
            d[0] = -(scoring.gap_open_penalty as i64) - i as i64 * gap_extend;
            cnt_d[0] = i;
            p[0] = d[0];
            cnt_p[0] = i;
        } else {
            d[j_start - 1] = NEG_INF;
            cnt_d[j_start - 1] = POS_INF;
            p[j_start - 1] = NEG_INF;
            cnt_p[j_start - 1] = POS_INF;
        }
        if i + band_high <= longer.len() {
            d[i + band_high] = NEG_INF;
            cnt_d[i + band_high] = POS_INF;
            p[i + band_high] = NEG_INF;
            cnt_p[i + band_high] = POS_INF;
        }

        // horizontal-gap state is confined to the current row
        let mut q = NEG_INF;
        let mut cnt_q = POS_INF;

        let j_end = (i + band_high).min(longer.len());
        for j in j_start..=j_end {
            // vertical gap ending at (i, j)
            let p_open = d[j].saturating_add(-gap_open);
            let p_extend = p[j].saturating_add(-gap_extend);
            let (p_score, p_cnt) = if p_open > p_extend || (p_open == p_extend && cnt_d[j] <= cnt_p[j]) {
                (p_open, cnt_d[j].saturating_add(1))
            } else {
                (p_extend, cnt_p[j].saturating_add(1))
            };

            // horizontal gap ending at (i, j)
            let q_open = d[j - 1].saturating_add(-gap_open);
            let q_extend = q.saturating_add(-gap_extend);
            if q_open > q_extend || (q_open == q_extend && cnt_d[j - 1] <= cnt_q) {
                q = q_open;
                cnt_q = cnt_d[j - 1].saturating_add(1);
            } else {
                q = q_extend;
                cnt_q = cnt_q.saturating_add(1);
            }

            let is_match = shorter[i - 1] == longer[j - 1];
            let m_score = diag.saturating_add(if is_match { reward } else { -penalty });
            let m_cnt = diag_cnt.saturating_add(usize::from(!is_match));

            // best score; ties prefer the diagonal, then the vertical gap,
            // and always the smaller operation count
            let (mut value, mut cnt) = (m_score, m_cnt);
            if p_score > value || (p_score == value && p_cnt < cnt) {
                value = p_score;
                cnt = p_cnt;
            }
            if q > value || (q == value && cnt_q < cnt) {
                value = q;
                cnt = cnt_q;
            }

            diag = d[j];
            diag_cnt = cnt_d[j];
            d[j] = value;
            cnt_d[j] = cnt;
            p[j] = p_score;
            cnt_p[j] = p_cnt;

            early &= cnt.saturating_add((diff + i).abs_diff(j)) > bound;
        }

        if early {
            return bound + 1;
        }
    }

    if cnt_d[longer.len()] > bound {
        bound + 1
    } else {
        cnt_d[longer.len()]
    }
}

/// Alignment summary produced by [`gotoh_cigar`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AlignmentInfo {
    /// CIGAR over M (diagonal), D (consumes `s`), I (consumes `t`).
    pub cigar: String,
    /// Number of alignment columns.
    pub length: usize,
    /// Mismatches plus gap columns along the alignment.
    pub num_diffs: usize,
}

// backtrack sources
const BT_DIAG: u8 = 0;
const BT_UP: u8 = 1;
const BT_LEFT: u8 = 2;

/// Full Gotoh alignment of `s` (rows) against `t` (columns) with backtrack.
pub fn gotoh_cigar(s: &[u8], t: &[u8], scoring: &Scoring) -> AlignmentInfo {
    let gap_open = (scoring.gap_open_penalty + scoring.gap_extend_penalty) as i64;
    let gap_extend = scoring.gap_extend_penalty as i64;
    let reward = scoring.match_reward as i64;
    let penalty = scoring.mismatch_penalty as i64;

    let rows = s.len() + 1;
    let cols = t.len() + 1;

    let mut d = vec![NEG_INF; rows * cols];
    let mut p = vec![NEG_INF; rows * cols];
    let mut q = vec![NEG_INF; rows * cols];
    let mut bt = vec![BT_DIAG; rows * cols];
    // whether the chosen gap continues an earlier one
    let mut p_ext = vec![false; rows * cols];
    let mut q_ext = vec![false; rows * cols];

    let at = |i: usize, j: usize| i * cols + j;

    d[at(0, 0)] = 0;
    for i in 1..rows {
        let cell = at(i, 0);
        d[cell] = -(scoring.gap_open_penalty as i64) - i as i64 * gap_extend;
        p[cell] = d[cell];
        bt[cell] = BT_UP;
        p_ext[cell] = i > 1;
    }
    for j in 1..cols {
        let cell = at(0, j);
        d[cell] = -(scoring.gap_open_penalty as i64) - j as i64 * gap_extend;
        q[cell] = d[cell];
        bt[cell] = BT_LEFT;
        q_ext[cell] = j > 1;
    }

    for i in 1..rows {
        for j in 1..cols {
            let cell = at(i, j);

            let open_up = d[at(i - 1, j)] - gap_open;
            let extend_up = p[at(i - 1, j)] - gap_extend;
            p[cell] = open_up.max(extend_up);
            p_ext[cell] = extend_up > open_up;

            let open_left = d[at(i, j - 1)] - gap_open;
            let extend_left = q[at(i, j - 1)] - gap_extend;
            q[cell] = open_left.max(extend_left);
            q_ext[cell] = extend_left > open_left;

            let m = d[at(i - 1, j - 1)] + if s[i - 1] == t[j - 1] { reward } else { -penalty };

            let mut best = m;
            let mut src = BT_DIAG;
            if p[cell] > best {
                best = p[cell];
                src = BT_UP;
            }
            if q[cell] > best {
                best = q[cell];
                src = BT_LEFT;
            }
            d[cell] = best;
            bt[cell] = src;
        }
    }

    // backtrack into alignment operations
    let mut ops: Vec<u8> = Vec::with_capacity(s.len() + t.len());
    let mut num_diffs = 0;
    let mut i = s.len();
    let mut j = t.len();
    while i > 0 || j > 0 {
        match bt[at(i, j)] {
            BT_DIAG if i > 0 && j > 0 => {
                ops.push(b'M');
                num_diffs += usize::from(s[i - 1] != t[j - 1]);
                i -= 1;
                j -= 1;
            }
            BT_UP | BT_DIAG if i > 0 => {
                // BT_DIAG with j == 0 cannot occur; rows with j == 0 are BT_UP
                let mut extending = true;
                while extending && i > 0 {
                    extending = p_ext[at(i, j)];
                    ops.push(b'D');
                    num_diffs += 1;
                    i -= 1;
                    if !extending {
                        break;
                    }
                }
            }
            _ => {
                let mut extending = true;
                while extending && j > 0 {
                    extending = q_ext[at(i, j)];
                    ops.push(b'I');
                    num_diffs += 1;
                    j -= 1;
                    if !extending {
                        break;
                    }
                }
            }
        }
    }
    ops.reverse();

    let mut cigar = String::new();
    let mut run_start = 0;
    for k in 1..=ops.len() {
        if k == ops.len() || ops[k] != ops[run_start] {
            cigar.push_str(&(k - run_start).to_string());
            cigar.push(ops[run_start] as char);
            run_start = k;
        }
    }

    AlignmentInfo {
        cigar,
        length: ops.len(),
        num_diffs,
    }
}
