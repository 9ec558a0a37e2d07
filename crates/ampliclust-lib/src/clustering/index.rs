//! Inverted segment indices with a rolling length window.
//!
//! A row of indices exists per sequence length; each row has one column per
//! segment position. Keys are byte ranges borrowed from the pool arena, so
//! no segment is ever copied. Rows whose length can no longer participate in
//! a match are dropped when the window rolls.

use rustc_hash::FxHashMap;

/// One column: segment bytes -> positions of the amplicons carrying that
/// segment at this column's position.
#[derive(Default)]
pub struct InvertedIndex<'a> {
    map: FxHashMap<&'a [u8], Vec<usize>>,
}

impl<'a> InvertedIndex<'a> {
    pub fn add(&mut self, segment: &'a [u8], id: usize) {
        self.map.entry(segment).or_default().push(id);
    }

    /// Append all ids stored under `segment` to `counts`.
    pub fn add_label_counts_of(&self, segment: &[u8], counts: &mut Vec<usize>) {
        if let Some(ids) = self.map.get(segment) {
            counts.extend_from_slice(ids);
        }
    }

    pub fn labels_of(&self, segment: &[u8]) -> &[usize] {
        self.map.get(segment).map_or(&[], Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Grid of inverted indices: rows keyed by sequence length, `width` columns
/// per row. `height` bounds the number of live rows when auto-shrink is on:
/// a forward window keeps lengths in `[len - height + 1, len]`, a backward
/// window keeps `[len, len + height - 1]`.
pub struct RollingIndices<'a> {
    height: usize,
    width: usize,
    forward: bool,
    auto_shrink: bool,
    rows: FxHashMap<usize, Vec<InvertedIndex<'a>>>,
}

impl<'a> RollingIndices<'a> {
    pub fn new(height: usize, width: usize, forward: bool, auto_shrink: bool) -> Self {
        Self {
            height,
            width,
            forward,
            auto_shrink,
            rows: FxHashMap::default(),
        }
    }

    /// Open the row for `len` (if absent) and drop out-of-window rows.
    pub fn roll(&mut self, len: usize) {
        if !self.rows.contains_key(&len) {
            let mut row = Vec::with_capacity(self.width);
            row.resize_with(self.width, InvertedIndex::default);
            self.rows.insert(len, row);
            if self.auto_shrink {
                self.shrink(len);
            }
        }
    }

    /// Drop all rows outside the window anchored at `len`. Idempotent.
    pub fn shrink(&mut self, len: usize) {
        let (lo, hi) = if self.forward {
            (len.saturating_sub(self.height - 1), len)
        } else {
            (len, len + self.height - 1)
        };
        self.rows.retain(|&l, _| l >= lo && l <= hi);
    }

    pub fn contains(&self, len: usize) -> bool {
        self.rows.contains_key(&len)
    }

    /// Column `i` of the row for `len`, if that row is live.
    pub fn get(&self, len: usize, i: usize) -> Option<&InvertedIndex<'a>> {
        self.rows.get(&len).and_then(|row| row.get(i))
    }

    /// Mutable column `i` of the row for `len`; the row must have been rolled in.
    pub fn get_mut(&mut self, len: usize, i: usize) -> Option<&mut InvertedIndex<'a>> {
        self.rows.get_mut(&len).and_then(|row| row.get_mut(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_roll_evicts_short_rows() {
        let mut indices = RollingIndices::new(3, 2, true, true);
        for len in [10, 11, 12, 13, 14] {
            indices.roll(len);
        }
        // window anchored at 14 with height 3 keeps [12, 14]
        assert!(!indices.contains(10));
        assert!(!indices.contains(11));
        assert!(indices.contains(12));
        assert!(indices.contains(13));
        assert!(indices.contains(14));
    }

    #[test]
    fn test_backward_roll_evicts_long_rows() {
        let mut indices = RollingIndices::new(3, 2, false, true);
        for len in [14, 13, 12, 11, 10] {
            indices.roll(len);
        }
        assert!(indices.contains(10));
        assert!(indices.contains(11));
        assert!(indices.contains(12));
        assert!(!indices.contains(13));
        assert!(!indices.contains(14));
    }

    #[test]
    fn test_shrink_is_idempotent() {
        let mut indices = RollingIndices::new(2, 1, true, true);
        indices.roll(5);
        indices.roll(6);
        indices.shrink(6);
        assert!(indices.contains(5));
        assert!(indices.contains(6));
        indices.shrink(6);
        assert!(indices.contains(5));
        assert!(indices.contains(6));
    }

    #[test]
    fn test_disabled_shrink_keeps_all_rows() {
        let mut indices = RollingIndices::new(2, 1, true, false);
        for len in 1..20 {
            indices.roll(len);
        }
        for len in 1..20 {
            assert!(indices.contains(len));
        }
    }

    #[test]
    fn test_rolling_existing_row_does_not_evict() {
        let mut indices = RollingIndices::new(3, 1, true, true);
        indices.roll(10);
        indices.roll(11);
        indices.roll(10);
        assert!(indices.contains(10));
        assert!(indices.contains(11));
    }

    #[test]
    fn test_index_lookup_by_content() {
        let arena: Vec<u8> = b"ACGTACGT".to_vec();
        let mut index = InvertedIndex::default();
        index.add(&arena[0..4], 7);
        index.add(&arena[4..8], 9);

        // lookups compare content, not provenance
        let mut counts = Vec::new();
        index.add_label_counts_of(b"ACGT", &mut counts);
        assert_eq!(counts, vec![7, 9]);
        index.add_label_counts_of(b"TTTT", &mut counts);
        assert_eq!(counts, vec![7, 9]);
        assert_eq!(index.labels_of(&arena[1..5]), &[] as &[usize]);
    }
}
