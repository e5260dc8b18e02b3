//! Parallel layouts: which rank owns which global indices.

use std::ops::Range;

use crate::comm::ProcessGroup;
use crate::error::{ConfigurationError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Segment {
    start: usize,
    end: usize,
    rank: usize,
    local_offset: usize,
}

/// The distribution of a global index space `[0, global_size)` over a group.
///
/// Each rank owns an ordered list of disjoint ranges; its local storage holds
/// those ranges back to back, in list order. The description is replicated:
/// every rank holds the full layout, so ownership queries need no
/// communication.
///
/// Plain vectors use one range per rank in rank order
/// ([`Layout::from_local_sizes`]). A nested matrix uses several ranges per rank,
/// one per block, so that each block's locally owned part stays contiguous in
/// local storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    global_size: usize,
    owned: Vec<Vec<Range<usize>>>,
    segments: Vec<Segment>,
}

impl Layout {
    /// A contiguous layout where rank `p` owns `sizes[p]` consecutive indices.
    pub fn from_local_sizes(sizes: &[usize]) -> Self {
        let mut start = 0;
        let owned = sizes
            .iter()
            .map(|&n| {
                let range = start..start + n;
                start += n;
                if n == 0 {
                    Vec::new()
                } else {
                    vec![range]
                }
            })
            .collect();

        Self::build(owned)
    }

    /// A layout with the whole index space on a single rank.
    pub fn serial(n: usize) -> Self {
        Self::from_local_sizes(&[n])
    }

    /// Collective: builds a contiguous layout from each rank's local size.
    pub fn contiguous(group: &dyn ProcessGroup, local_size: usize) -> Result<Self> {
        let sizes: Vec<usize> = group
            .all_gather_sizes(&[local_size])?
            .into_iter()
            .map(|v| v.first().copied().unwrap_or(0))
            .collect();
        Ok(Self::from_local_sizes(&sizes))
    }

    /// A layout from explicit per-rank ownership lists.
    ///
    /// Fails unless the ranges tile `[0, n)` exactly, with no gaps or overlaps.
    pub fn from_owned_ranges(owned: Vec<Vec<Range<usize>>>) -> Result<Self> {
        // Empty ranges are dropped and touching ranges merged, so equal
        // ownership always compares equal.
        let owned: Vec<Vec<Range<usize>>> = owned
            .into_iter()
            .map(|ranges| {
                let mut merged: Vec<Range<usize>> = Vec::with_capacity(ranges.len());
                for range in ranges.into_iter().filter(|r| !r.is_empty()) {
                    match merged.last_mut() {
                        Some(last) if last.end == range.start => last.end = range.end,
                        _ => merged.push(range),
                    }
                }
                merged
            })
            .collect();

        let layout = Self::build(owned);
        let mut expected = 0;
        for segment in &layout.segments {
            if segment.start != expected {
                return Err(ConfigurationError::InvalidLayout(format!(
                    "index {} is owned {}",
                    expected.min(segment.start),
                    if segment.start > expected { "by no rank" } else { "twice" }
                ))
                .into());
            }
            expected = segment.end;
        }

        Ok(layout)
    }

    fn build(owned: Vec<Vec<Range<usize>>>) -> Self {
        let mut segments = Vec::new();
        for (rank, ranges) in owned.iter().enumerate() {
            let mut local_offset = 0;
            for range in ranges {
                segments.push(Segment {
                    start: range.start,
                    end: range.end,
                    rank,
                    local_offset,
                });
                local_offset += range.len();
            }
        }
        segments.sort_by_key(|s| s.start);

        let global_size = segments.iter().map(|s| s.end - s.start).sum();
        Self {
            global_size,
            owned,
            segments,
        }
    }

    pub fn global_size(&self) -> usize {
        self.global_size
    }

    /// Number of ranks the layout describes.
    pub fn num_ranks(&self) -> usize {
        self.owned.len()
    }

    /// The ranges owned by `rank`, in local storage order.
    pub fn owned(&self, rank: usize) -> &[Range<usize>] {
        self.owned.get(rank).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn local_size(&self, rank: usize) -> usize {
        self.owned(rank).iter().map(|r| r.len()).sum()
    }

    /// The single range owned by `rank`, if its ownership is contiguous.
    pub fn local_range(&self, rank: usize) -> Option<Range<usize>> {
        match self.owned(rank) {
            [] => Some(0..0),
            [range] => Some(range.clone()),
            _ => None,
        }
    }

    /// Global indices owned by `rank`, in local storage order.
    pub fn global_indices(&self, rank: usize) -> impl Iterator<Item = usize> + '_ {
        self.owned(rank).iter().flat_map(|r| r.clone())
    }

    /// The owning rank of `global` and its position in that rank's storage.
    pub fn owner_of(&self, global: usize) -> Option<(usize, usize)> {
        let k = self.segments.partition_point(|s| s.end <= global);
        let segment = self.segments.get(k)?;
        if segment.start <= global {
            Some((segment.rank, segment.local_offset + global - segment.start))
        } else {
            None
        }
    }

    /// Position of `global` in `rank`'s local storage, if `rank` owns it.
    pub fn local_position(&self, rank: usize, global: usize) -> Option<usize> {
        self.owner_of(global)
            .and_then(|(owner, pos)| if owner == rank { Some(pos) } else { None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contiguous_layout() {
        let layout = Layout::from_local_sizes(&[2, 0, 3]);
        assert_eq!(layout.global_size(), 5);
        assert_eq!(layout.owned(0), &[0..2]);
        assert!(layout.owned(1).is_empty());
        assert_eq!(layout.local_range(2), Some(2..5));
        assert_eq!(layout.owner_of(3), Some((2, 1)));
        assert_eq!(layout.owner_of(5), None);
    }

    #[test]
    fn test_interleaved_layout() {
        // rank 0 owns [0,2) and [5,6), rank 1 owns [2,5) and [6,8)
        let layout = Layout::from_owned_ranges(vec![vec![0..2, 5..6], vec![2..5, 6..8]]).unwrap();
        assert_eq!(layout.global_size(), 8);
        assert_eq!(layout.local_size(0), 3);
        assert_eq!(layout.local_range(0), None);
        assert_eq!(layout.owner_of(5), Some((0, 2)));
        assert_eq!(layout.local_position(1, 7), Some(4));
        assert_eq!(layout.local_position(0, 7), None);
        assert_eq!(layout.global_indices(1).collect::<Vec<_>>(), vec![2, 3, 4, 6, 7]);
    }

    #[test]
    fn test_touching_ranges_are_merged() {
        let layout = Layout::from_owned_ranges(vec![vec![0..2, 2..2, 2..5]]).unwrap();
        assert_eq!(layout, Layout::serial(5));
    }

    #[test]
    fn test_gap_is_rejected() {
        assert!(Layout::from_owned_ranges(vec![vec![0..2], vec![3..4]]).is_err());
        assert!(Layout::from_owned_ranges(vec![vec![0..3], vec![2..4]]).is_err());
    }
}
