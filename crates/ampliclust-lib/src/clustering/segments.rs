//! Segment partition and substring windows of the pigeonhole filter.
//!
//! A sequence of length L is cut into t + k consecutive segments: with
//! d = L mod (t + k), the first t + k - d segments have length
//! floor(L / (t + k)) and the last d are one longer. For two sequences at
//! edit distance <= t, at least k of the shorter one's segments must occur
//! inside the corresponding substring window of the longer one.

/// Substring window inside the self sequence: all start positions
/// `first..=last` of length-`len` substrings to compare against one
/// partner segment. `first > last` encodes an empty window.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Substrings {
    pub first: usize,
    pub last: usize,
    pub len: usize,
}

const EMPTY: Substrings = Substrings {
    first: 1,
    last: 0,
    len: 0,
};

/// Even partition of a length-`seq_len` sequence into t + k segments,
/// as (start, length) pairs.
pub fn select_segments(seq_len: usize, t: usize, k: usize) -> Vec<(usize, usize)> {
    let m = t + k;
    let q = seq_len / m;
    let d = seq_len % m;
    let mut segments = Vec::with_capacity(m);
    let mut start = 0;
    for i in 0..m {
        let len = if i < m - d { q } else { q + 1 };
        segments.push((start, len));
        start += len;
    }
    segments
}

/// Start position and length of segment `seg_index` in the even partition.
fn segment_position(seq_len: usize, seg_index: usize, m: usize) -> (usize, usize) {
    let q = seq_len / m;
    let d = seq_len % m;
    let longer_before = (seg_index + d).saturating_sub(m);
    let len = if seg_index < m - d { q } else { q + 1 };
    (seg_index * q + longer_before, len)
}

/// Window in the (longer) self sequence where segment `seg_index` of a
/// shorter partner may start, given distance bound `t`.
///
/// Requires `partner_len <= self_len`.
pub fn select_substrs(
    self_len: usize,
    partner_len: usize,
    seg_index: usize,
    t: usize,
    k: usize,
) -> Substrings {
    let m = t + k;
    let (p, len) = segment_position(partner_len, seg_index, m);
    if len > self_len {
        return EMPTY;
    }
    let diff = self_len - partner_len;
    let tail = m - 1 - seg_index;

    let first = p
        .saturating_sub(seg_index)
        .max((p + diff).saturating_sub(tail));
    let last = (p + seg_index).min(p + diff + tail).min(self_len - len);
    if first > last {
        return EMPTY;
    }
    Substrings { first, last, len }
}

/// Window in the (shorter) self sequence where segment `seg_index` of a
/// longer partner may start, given distance bound `t`.
///
/// Requires `partner_len >= self_len`.
pub fn select_substrs_backward(
    self_len: usize,
    partner_len: usize,
    seg_index: usize,
    t: usize,
    k: usize,
) -> Substrings {
    let m = t + k;
    let (p, len) = segment_position(partner_len, seg_index, m);
    if len > self_len {
        return EMPTY;
    }
    let diff = partner_len - self_len;
    let tail = m - 1 - seg_index;

    let first = p
        .saturating_sub(seg_index)
        .max(p.saturating_sub(diff + tail));
    let last = (p + seg_index)
        .min((p + tail).saturating_sub(diff))
        .min(self_len - len);
    if first > last {
        return EMPTY;
    }
    Substrings { first, last, len }
}
