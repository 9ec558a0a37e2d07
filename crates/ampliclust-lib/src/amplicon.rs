//! Arena-backed amplicon storage.
//!
//! All identifier and sequence bytes of a pool live in one contiguous byte
//! arena; `Amplicon` records are plain offset/length views into it plus the
//! abundance, the input rank and the q-gram parity vector. Pools partition
//! the input at length gaps larger than the clustering threshold, so no link
//! at distance <= threshold can cross a pool boundary.

use anyhow::{bail, Context, Result};
use tracing::debug;

/// q-gram length of the parity vectors.
pub const QGRAM_LENGTH: usize = 5;
/// One parity bit per possible q-gram: 4^5 bits = 128 bytes.
pub const QGRAM_VECTOR_BYTES: usize = (1 << (2 * QGRAM_LENGTH)) / 8;

/// A single input sequence with its abundance, before pooling.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputRecord {
    pub id: Vec<u8>,
    pub seq: Vec<u8>,
    pub abundance: u64,
}

impl InputRecord {
    pub fn new(id: impl Into<Vec<u8>>, seq: impl Into<Vec<u8>>, abundance: u64) -> Self {
        Self {
            id: id.into(),
            seq: seq.into(),
            abundance,
        }
    }
}

/// One amplicon: offset views into the pool arena plus per-record metadata.
#[derive(Clone)]
pub struct Amplicon {
    id_off: usize,
    id_len: usize,
    seq_off: usize,
    seq_len: usize,
    abundance: u64,
    /// Position in the (filtered) input, used for rank tie-breaks.
    rank: usize,
    qgram: [u8; QGRAM_VECTOR_BYTES],
}

/// A maximal run of equal-length amplicons inside a pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LengthGroup {
    pub len: usize,
    pub start: usize,
    pub count: usize,
}

/// Length-contiguous block of amplicons sharing one byte arena.
///
/// Amplicons are ordered by (length asc, abundance desc, input rank asc).
pub struct Pool {
    text: Vec<u8>,
    amplicons: Vec<Amplicon>,
    groups: Vec<LengthGroup>,
}

impl Pool {
    fn from_records(records: &[InputRecord], members: &[usize]) -> Result<Self> {
        let mut capacity: usize = 0;
        for &i in members {
            capacity = capacity
                .checked_add(records[i].id.len())
                .and_then(|c| c.checked_add(records[i].seq.len()))
                .context("amplicon arena exceeds the addressable size")?;
        }

        let mut text = Vec::with_capacity(capacity);
        let mut amplicons = Vec::with_capacity(members.len());
        let mut groups: Vec<LengthGroup> = Vec::new();

        for &i in members {
            let rec = &records[i];
            let id_off = text.len();
            text.extend_from_slice(&rec.id);
            let seq_off = text.len();
            text.extend_from_slice(&rec.seq);

            match groups.last_mut() {
                Some(g) if g.len == rec.seq.len() => g.count += 1,
                _ => groups.push(LengthGroup {
                    len: rec.seq.len(),
                    start: amplicons.len(),
                    count: 1,
                }),
            }

            amplicons.push(Amplicon {
                id_off,
                id_len: rec.id.len(),
                seq_off,
                seq_len: rec.seq.len(),
                abundance: rec.abundance,
                rank: i,
                qgram: qgram_vector(&rec.seq),
            });
        }

        Ok(Self {
            text,
            amplicons,
            groups,
        })
    }

    pub fn len(&self) -> usize {
        self.amplicons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.amplicons.is_empty()
    }

    pub fn id(&self, i: usize) -> &[u8] {
        let a = &self.amplicons[i];
        &self.text[a.id_off..a.id_off + a.id_len]
    }

    pub fn seq(&self, i: usize) -> &[u8] {
        let a = &self.amplicons[i];
        &self.text[a.seq_off..a.seq_off + a.seq_len]
    }

    pub fn length(&self, i: usize) -> usize {
        self.amplicons[i].seq_len
    }

    pub fn abundance(&self, i: usize) -> u64 {
        self.amplicons[i].abundance
    }

    pub fn rank(&self, i: usize) -> usize {
        self.amplicons[i].rank
    }

    pub fn qgram(&self, i: usize) -> &[u8; QGRAM_VECTOR_BYTES] {
        &self.amplicons[i].qgram
    }

    /// Length runs in pool order (ascending length).
    pub fn groups(&self) -> &[LengthGroup] {
        &self.groups
    }

    pub fn min_len(&self) -> usize {
        self.groups.first().map_or(0, |g| g.len)
    }

    pub fn max_len(&self) -> usize {
        self.groups.last().map_or(0, |g| g.len)
    }

    /// Smallest index whose length is >= `len` (pool length if none).
    fn first_index_with_length_at_least(&self, len: usize) -> usize {
        match self.groups.binary_search_by(|g| g.len.cmp(&len)) {
            Ok(g) => self.groups[g].start,
            Err(g) => self
                .groups
                .get(g)
                .map_or(self.amplicons.len(), |g| g.start),
        }
    }

    /// Smallest group-start index >= `i` (pool length if none).
    fn next_group_boundary(&self, i: usize) -> usize {
        if i >= self.amplicons.len() {
            return self.amplicons.len();
        }
        for g in &self.groups {
            if g.start >= i {
                return g.start;
            }
        }
        self.amplicons.len()
    }
}

/// Sub-range of a pool handed to one filter worker.
///
/// Forward reading (left to right): amplicons in `[begin_index, begin_match)`
/// are indexed only, those in `[begin_match, end)` are filtered and indexed.
/// Backward reading (right to left): `[begin_index, end)` is indexed only,
/// `[begin_match, begin_index)` is filtered and indexed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Subpool {
    pub begin_index: usize,
    pub begin_match: usize,
    pub end: usize,
}

impl Subpool {
    /// The whole pool as a single forward sub-pool.
    pub fn whole_forward(pool: &Pool) -> Self {
        Self {
            begin_index: 0,
            begin_match: 0,
            end: pool.len(),
        }
    }

    /// The whole pool as a single backward sub-pool.
    pub fn whole_backward(pool: &Pool) -> Self {
        Self {
            begin_index: pool.len(),
            begin_match: 0,
            end: pool.len(),
        }
    }
}

/// Cut a pool into at most `num` forward sub-pools.
///
/// Cuts fall on length-group boundaries; each sub-pool's index-only prefix
/// reaches back to the first amplicon whose length is still within
/// `threshold` of the sub-pool's first filtered amplicon, so the worker sees
/// the same index state a full-pool scan would have.
pub fn subpool_boundaries(pool: &Pool, num: usize, threshold: usize) -> Vec<Subpool> {
    let n = pool.len();
    if num <= 1 || n == 0 {
        return vec![Subpool::whole_forward(pool)];
    }

    let chunk = n.div_ceil(num);
    let mut subpools = Vec::new();
    let mut begin_match = 0;
    while begin_match < n {
        let end = pool.next_group_boundary((begin_match + chunk).min(n));
        let begin_index = if begin_match == 0 {
            0
        } else {
            pool.first_index_with_length_at_least(
                pool.length(begin_match).saturating_sub(threshold),
            )
        };
        subpools.push(Subpool {
            begin_index,
            begin_match,
            end,
        });
        begin_match = end;
    }
    subpools
}

/// Cut a pool into at most `num` backward sub-pools (read right to left).
pub fn subpool_boundaries_backward(pool: &Pool, num: usize, threshold: usize) -> Vec<Subpool> {
    let n = pool.len();
    if num <= 1 || n == 0 {
        return vec![Subpool::whole_backward(pool)];
    }

    let chunk = n.div_ceil(num);
    let mut subpools = Vec::new();
    let mut begin_match = 0;
    while begin_match < n {
        let begin_index = pool.next_group_boundary((begin_match + chunk).min(n));
        let end = if begin_index == n {
            n
        } else {
            // index-only suffix: everything reachable from the last filtered length
            pool.first_index_with_length_at_least(pool.length(begin_index - 1) + threshold + 1)
        };
        subpools.push(Subpool {
            begin_index,
            begin_match,
            end,
        });
        begin_match = begin_index;
    }
    subpools
}

/// All pools of one clustering run.
pub struct AmpliconPools {
    pools: Vec<Pool>,
}

impl AmpliconPools {
    /// Normalise, sort and partition the input records into pools.
    ///
    /// Sequences are uppercased; a byte outside {A,C,G,T,U} is an alphabet
    /// violation and fatal here (the reader filters such records up front).
    /// Pool boundaries sit at length gaps larger than `threshold`.
    pub fn build(mut records: Vec<InputRecord>, threshold: usize) -> Result<Self> {
        for rec in &mut records {
            for b in &mut rec.seq {
                let up = b.to_ascii_uppercase();
                if !matches!(up, b'A' | b'C' | b'G' | b'T' | b'U') {
                    bail!(
                        "alphabet violation in amplicon '{}': byte 0x{:02x}",
                        String::from_utf8_lossy(&rec.id),
                        b
                    );
                }
                *b = up;
            }
            if rec.seq.is_empty() {
                bail!(
                    "empty sequence for amplicon '{}'",
                    String::from_utf8_lossy(&rec.id)
                );
            }
            if rec.abundance == 0 {
                bail!(
                    "abundance of amplicon '{}' must be positive",
                    String::from_utf8_lossy(&rec.id)
                );
            }
        }

        let mut order: Vec<usize> = (0..records.len()).collect();
        order.sort_by(|&a, &b| {
            records[a]
                .seq
                .len()
                .cmp(&records[b].seq.len())
                .then(records[b].abundance.cmp(&records[a].abundance))
                .then(a.cmp(&b))
        });

        let mut pools = Vec::new();
        let mut members: Vec<usize> = Vec::new();
        let mut prev_len = 0;
        for &i in &order {
            let len = records[i].seq.len();
            if !members.is_empty() && len - prev_len > threshold {
                pools.push(Pool::from_records(&records, &members)?);
                members.clear();
            }
            members.push(i);
            prev_len = len;
        }
        if !members.is_empty() {
            pools.push(Pool::from_records(&records, &members)?);
        }

        debug!(
            pools = pools.len(),
            amplicons = records.len(),
            "built amplicon pools"
        );
        Ok(Self { pools })
    }

    pub fn num_pools(&self) -> usize {
        self.pools.len()
    }

    pub fn num_amplicons(&self) -> usize {
        self.pools.iter().map(Pool::len).sum()
    }

    pub fn get(&self, i: usize) -> &Pool {
        &self.pools[i]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pool> {
        self.pools.iter()
    }
}

fn base_code(b: u8) -> u64 {
    // U shares T's code, so the parity vectors treat them as identical
    match b {
        b'A' => 0,
        b'C' => 1,
        b'G' => 2,
        _ => 3,
    }
}

/// q-gram parity vector: one bit per 5-mer, flipped on every occurrence.
fn qgram_vector(seq: &[u8]) -> [u8; QGRAM_VECTOR_BYTES] {
    let mut vector = [0u8; QGRAM_VECTOR_BYTES];
    let mut qgram: u64 = 0;
    let mut j = 0;
    while j < QGRAM_LENGTH - 1 && j < seq.len() {
        qgram = (qgram << 2) | base_code(seq[j]);
        j += 1;
    }
    while j < seq.len() {
        qgram = (qgram << 2) | base_code(seq[j]);
        let bit = (qgram & ((1 << (2 * QGRAM_LENGTH)) - 1)) as usize;
        vector[bit >> 3] ^= 1 << (bit & 7);
        j += 1;
    }
    vector
}

/// Lower bound on the edit distance between the two underlying sequences:
/// one edit operation flips at most 2 * QGRAM_LENGTH parity bits.
pub fn qgram_diff(a: &[u8; QGRAM_VECTOR_BYTES], b: &[u8; QGRAM_VECTOR_BYTES]) -> usize {
    let mismatches: u32 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (x ^ y).count_ones())
        .sum();
    (mismatches as usize).div_ceil(2 * QGRAM_LENGTH)
}
