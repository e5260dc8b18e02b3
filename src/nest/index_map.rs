//! # Index maps
//!
//! Two index sets per block row and per block column:
//!
//! - **global**: the contiguous range `[offset, offset + len)` the block
//!   occupies in the composite numbering;
//! - **local**: the contiguous range of the calling rank's local storage that
//!   holds the block's locally owned entries, blocks concatenated in block
//!   order.
//!
//! The composite layout built here owns, on each rank, the block-local
//! ownership of every block shifted by the block's offset. A vector using that
//! layout is scattered and gathered with plain local copies through the local
//! index sets. Any other layout goes through the global index sets and a
//! collective exchange.

use std::ops::Range;
use std::sync::Arc;

use tracing::trace;

use crate::comm::ProcessGroup;
use crate::error::{Axis, MatrixError, Result};
use crate::nest::layout::BlockLayout;
use crate::utils::exclusive_scan;
use crate::vector::{DistVector, IndexSet, Layout};

#[derive(Debug, Clone)]
struct AxisMap {
    global: Vec<IndexSet>,
    local: Vec<IndexSet>,
    composite: Arc<Layout>,
}

impl AxisMap {
    fn build(rank: usize, n_ranks: usize, lens: &[usize], offsets: &[usize], layouts: &[Arc<Layout>]) -> Result<Self> {
        let global = lens
            .iter()
            .zip(offsets)
            .map(|(&len, &offset)| IndexSet::contiguous(offset, len))
            .collect();

        let local_lens: Vec<usize> = layouts.iter().map(|l| l.local_size(rank)).collect();
        let local_offsets = exclusive_scan(&local_lens);
        let local = local_lens
            .iter()
            .zip(&local_offsets)
            .map(|(&len, &offset)| IndexSet::contiguous(offset, len))
            .collect();

        let owned: Vec<Vec<Range<usize>>> = (0..n_ranks)
            .map(|p| {
                layouts
                    .iter()
                    .zip(offsets)
                    .flat_map(|(layout, &offset)| {
                        layout
                            .owned(p)
                            .iter()
                            .map(move |r| r.start + offset..r.end + offset)
                    })
                    .collect()
            })
            .collect();
        let composite = Arc::new(Layout::from_owned_ranges(owned)?);

        Ok(Self {
            global,
            local,
            composite,
        })
    }
}

/// Global and local index sets for every block row and block column.
#[derive(Debug, Clone)]
pub struct IndexMap {
    rows: AxisMap,
    cols: AxisMap,
}

impl IndexMap {
    /// Builds the maps for `layout` as seen by the calling rank.
    ///
    /// Layouts are replicated, so no communication is needed.
    pub fn build(group: &dyn ProcessGroup, layout: &BlockLayout) -> Result<Self> {
        let rank = group.rank();
        let n_ranks = group.size();
        let rows = AxisMap::build(
            rank,
            n_ranks,
            layout.row_len(),
            layout.row_offsets(),
            layout.layouts(Axis::Row),
        )?;
        let cols = AxisMap::build(
            rank,
            n_ranks,
            layout.col_len(),
            layout.col_offsets(),
            layout.layouts(Axis::Column),
        )?;
        Ok(Self { rows, cols })
    }

    fn axis(&self, axis: Axis) -> &AxisMap {
        match axis {
            Axis::Row => &self.rows,
            Axis::Column => &self.cols,
        }
    }

    /// Composite index set of block `block` along `axis`.
    pub fn global(&self, axis: Axis, block: usize) -> &IndexSet {
        &self.axis(axis).global[block]
    }

    /// Local storage range of block `block` along `axis` on the calling rank.
    pub fn local(&self, axis: Axis, block: usize) -> &IndexSet {
        &self.axis(axis).local[block]
    }

    /// The composite layout along `axis`.
    pub fn composite(&self, axis: Axis) -> &Arc<Layout> {
        &self.axis(axis).composite
    }

    /// Copies the part of `x` that belongs to block `block` into `target`.
    ///
    /// Collective unless `x` uses the composite layout.
    pub fn scatter_to_local(
        &self,
        axis: Axis,
        block: usize,
        x: &DistVector,
        target: &mut DistVector,
    ) -> Result<()> {
        let map = self.axis(axis);
        if x.same_layout(&map.composite) {
            let range = local_range(&map.local[block]);
            let source = x.slice(range)?;
            if source.len() != target.local_len() {
                return Err(MatrixError::LayoutMismatch {
                    expected: target.local_len(),
                    actual: source.len(),
                });
            }
            target.local_mut().copy_from_slice(source);
            return Ok(());
        }

        if x.len() != map.composite.global_size() {
            return Err(MatrixError::LayoutMismatch {
                expected: map.composite.global_size(),
                actual: x.len(),
            });
        }
        trace!(%axis, block, "scatter through global index set");
        *target = x.scatter(&map.global[block], Arc::clone(target.layout()))?;
        Ok(())
    }

    /// Adds the block vector `source` into the part of `y` that belongs to
    /// block `block`.
    ///
    /// Collective unless `y` uses the composite layout.
    pub fn gather_from_local(
        &self,
        axis: Axis,
        block: usize,
        source: &DistVector,
        y: &mut DistVector,
    ) -> Result<()> {
        let map = self.axis(axis);
        if y.same_layout(&map.composite) {
            let range = local_range(&map.local[block]);
            if range.len() != source.local_len() {
                return Err(MatrixError::LayoutMismatch {
                    expected: range.len(),
                    actual: source.local_len(),
                });
            }
            for (dst, src) in y.local_mut()[range].iter_mut().zip(source.local()) {
                *dst += src;
            }
            return Ok(());
        }

        if y.len() != map.composite.global_size() {
            return Err(MatrixError::LayoutMismatch {
                expected: map.composite.global_size(),
                actual: y.len(),
            });
        }
        trace!(%axis, block, "gather through global index set");
        y.gather_add(source, &map.global[block])
    }
}

fn local_range(is: &IndexSet) -> Range<usize> {
    // Local index sets are always built contiguous.
    is.as_range().unwrap_or(0..0)
}
