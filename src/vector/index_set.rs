//! Ordered sets of global indices used to drive scatter and gather.

use std::ops::Range;

/// An ordered list of indices.
///
/// Position `k` of the set maps to index `get(k)`; scatter and gather use the
/// set to translate between a block's own numbering (the position) and a
/// composite numbering (the stored index).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexSet {
    /// `start, start + 1, ..., start + len - 1`
    Contiguous { start: usize, len: usize },
    /// An arbitrary ordered list.
    General(Vec<usize>),
}

impl IndexSet {
    /// The set `[start, start + len)`.
    pub fn contiguous(start: usize, len: usize) -> Self {
        IndexSet::Contiguous { start, len }
    }

    pub fn len(&self) -> usize {
        match self {
            IndexSet::Contiguous { len, .. } => *len,
            IndexSet::General(indices) => indices.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The index stored at position `k`.
    ///
    /// # Panics
    ///
    /// Panics if `k >= self.len()`.
    pub fn get(&self, k: usize) -> usize {
        match self {
            IndexSet::Contiguous { start, len } => {
                assert!(k < *len, "position {} out of range for index set of length {}", k, len);
                start + k
            }
            IndexSet::General(indices) => indices[k],
        }
    }

    /// Iterates over the stored indices in order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len()).map(move |k| self.get(k))
    }

    /// All indices, materialised.
    pub fn indices(&self) -> Vec<usize> {
        self.iter().collect()
    }

    /// The range covered by a contiguous set.
    pub fn as_range(&self) -> Option<Range<usize>> {
        match self {
            IndexSet::Contiguous { start, len } => Some(*start..start + len),
            IndexSet::General(_) => None,
        }
    }
}
