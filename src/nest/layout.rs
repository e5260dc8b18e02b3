//! # Block layout
//!
//! Derives the extent of every block row and block column from the blocks
//! present in it, and checks that all blocks of a line agree.
//!
//! For block row `i`, the first present block fixes the extent (and the
//! distribution of rows over ranks); every later present block of the row must
//! report the same. Columns work the same way. Offsets are prefix sums of the
//! extents, so the block extents tile the composite index space with no gap
//! and no overlap.

use std::sync::Arc;

use crate::comm::ProcessGroup;
use crate::error::{Axis, ConfigurationError, MatrixError, Result};
use crate::matrix::{MatrixHandle, NestConfig};
use crate::utils::{exclusive_scan, locate_block};
use crate::vector::Layout;

/// Extents and distributions of the block rows and block columns of a grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockLayout {
    row_len: Vec<usize>,
    col_len: Vec<usize>,
    row_offsets: Vec<usize>,
    col_offsets: Vec<usize>,
    row_layouts: Vec<Arc<Layout>>,
    col_layouts: Vec<Arc<Layout>>,
}

impl BlockLayout {
    /// Computes the layout of an `nr × nc` grid stored row-major in `blocks`.
    pub fn compute(
        group: &dyn ProcessGroup,
        nr: usize,
        nc: usize,
        blocks: &[Option<MatrixHandle>],
        config: &NestConfig,
    ) -> Result<Self> {
        if nr == 0 || nc == 0 {
            return Err(ConfigurationError::EmptyGrid.into());
        }
        if blocks.len() != nr * nc {
            return Err(ConfigurationError::GridShape {
                nr,
                nc,
                expected: nr * nc,
                actual: blocks.len(),
            }
            .into());
        }

        let empty = Arc::new(Layout::from_local_sizes(&vec![0; group.size()]));

        let row_layouts = (0..nr)
            .map(|i| {
                let cells = (0..nc).map(|j| (i, j, &blocks[i * nc + j]));
                infer_line(Axis::Row, i, cells, group.size(), &empty, config)
            })
            .collect::<Result<Vec<_>>>()?;

        let col_layouts = (0..nc)
            .map(|j| {
                let cells = (0..nr).map(|i| (i, j, &blocks[i * nc + j]));
                infer_line(Axis::Column, j, cells, group.size(), &empty, config)
            })
            .collect::<Result<Vec<_>>>()?;

        let row_len: Vec<usize> = row_layouts.iter().map(|l| l.global_size()).collect();
        let col_len: Vec<usize> = col_layouts.iter().map(|l| l.global_size()).collect();

        Ok(Self {
            row_offsets: exclusive_scan(&row_len),
            col_offsets: exclusive_scan(&col_len),
            row_len,
            col_len,
            row_layouts,
            col_layouts,
        })
    }

    pub fn nr(&self) -> usize {
        self.row_len.len()
    }

    pub fn nc(&self) -> usize {
        self.col_len.len()
    }

    /// Global extent of every block row.
    pub fn row_len(&self) -> &[usize] {
        &self.row_len
    }

    /// Global extent of every block column.
    pub fn col_len(&self) -> &[usize] {
        &self.col_len
    }

    /// Prefix sums of [`row_len`](Self::row_len), `nr + 1` entries.
    pub fn row_offsets(&self) -> &[usize] {
        &self.row_offsets
    }

    pub fn col_offsets(&self) -> &[usize] {
        &self.col_offsets
    }

    pub fn total_rows(&self) -> usize {
        self.row_offsets[self.nr()]
    }

    pub fn total_cols(&self) -> usize {
        self.col_offsets[self.nc()]
    }

    /// Distribution of the rows of block row `i`, in the block's numbering.
    pub fn row_layout(&self, i: usize) -> &Arc<Layout> {
        &self.row_layouts[i]
    }

    pub fn col_layout(&self, j: usize) -> &Arc<Layout> {
        &self.col_layouts[j]
    }

    /// Block-local extents along `axis`.
    pub fn lens(&self, axis: Axis) -> &[usize] {
        match axis {
            Axis::Row => &self.row_len,
            Axis::Column => &self.col_len,
        }
    }

    pub fn offsets(&self, axis: Axis) -> &[usize] {
        match axis {
            Axis::Row => &self.row_offsets,
            Axis::Column => &self.col_offsets,
        }
    }

    pub fn layouts(&self, axis: Axis) -> &[Arc<Layout>] {
        match axis {
            Axis::Row => &self.row_layouts,
            Axis::Column => &self.col_layouts,
        }
    }

    /// Translates a composite index along `axis` into `(block, index within block)`.
    pub fn locate(&self, axis: Axis, index: usize) -> Result<(usize, usize)> {
        let offsets = self.offsets(axis);
        locate_block(offsets, index).ok_or(MatrixError::IndexOutOfRange {
            axis,
            index,
            extent: offsets[offsets.len() - 1],
        })
    }
}

/// Infers the distribution of one block row or column from its cells.
fn infer_line<'a>(
    axis: Axis,
    line: usize,
    cells: impl Iterator<Item = (usize, usize, &'a Option<MatrixHandle>)>,
    group_size: usize,
    empty: &Arc<Layout>,
    config: &NestConfig,
) -> Result<Arc<Layout>> {
    let mut first: Option<Arc<Layout>> = None;

    for (row, col, cell) in cells {
        let Some(block) = cell else { continue };
        let block = block
            .try_borrow()
            .map_err(|_| MatrixError::BlockInUse { row, col })?;

        let (rows, cols) = block.size();
        let (extent, layout) = match axis {
            Axis::Row => (rows, block.row_layout()),
            Axis::Column => (cols, block.col_layout()),
        };
        if layout.num_ranks() != group_size {
            return Err(ConfigurationError::GroupMismatch {
                row,
                col,
                ranks: layout.num_ranks(),
                group_size,
            }
            .into());
        }

        match &first {
            None => first = Some(layout),
            Some(expected) => {
                if expected.global_size() != extent {
                    return Err(ConfigurationError::ExtentMismatch {
                        axis,
                        line,
                        expected: expected.global_size(),
                        found: extent,
                    }
                    .into());
                }
                if **expected != *layout {
                    return Err(ConfigurationError::DistributionMismatch { axis, line, row, col }.into());
                }
            }
        }
    }

    match first {
        Some(layout) => Ok(layout),
        None if config.empty_lines.allows_empty() => Ok(Arc::clone(empty)),
        None => Err(ConfigurationError::EmptyLine { axis, line }.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{SerialGroup, ThreadGroup};
    use crate::matrix::{handle, AijMatrix};

    fn grid(cells: Vec<Option<(usize, usize)>>) -> Vec<Option<MatrixHandle>> {
        cells
            .into_iter()
            .map(|c| c.map(|(r, c)| handle(AijMatrix::zeros(r, c))))
            .collect()
    }

    #[test]
    fn test_extents_and_offsets() {
        let blocks = grid(vec![Some((2, 2)), None, None, Some((3, 4))]);
        let layout =
            BlockLayout::compute(&SerialGroup, 2, 2, &blocks, &NestConfig::default()).unwrap();

        assert_eq!(layout.row_len(), &[2, 3]);
        assert_eq!(layout.col_len(), &[2, 4]);
        assert_eq!(layout.row_offsets(), &[0, 2, 5]);
        assert_eq!(layout.total_cols(), 6);
        assert_eq!(layout.locate(Axis::Column, 3).unwrap(), (1, 1));
    }

    #[test]
    fn test_row_extent_mismatch_names_the_row() {
        // Row 0: a 2x2 block, then a block claiming 3 rows
        let blocks = grid(vec![Some((2, 2)), Some((3, 3)), None, Some((3, 3))]);
        let err = BlockLayout::compute(&SerialGroup, 2, 2, &blocks, &NestConfig::default())
            .unwrap_err();

        assert_eq!(
            err,
            MatrixError::Configuration(ConfigurationError::ExtentMismatch {
                axis: Axis::Row,
                line: 0,
                expected: 2,
                found: 3,
            })
        );
    }

    #[test]
    fn test_empty_line_policy() {
        let blocks = grid(vec![Some((2, 2)), None, None, None]);
        let err = BlockLayout::compute(&SerialGroup, 2, 2, &blocks, &NestConfig::default())
            .unwrap_err();
        assert_eq!(
            err,
            MatrixError::Configuration(ConfigurationError::EmptyLine {
                axis: Axis::Row,
                line: 1
            })
        );

        let layout =
            BlockLayout::compute(&SerialGroup, 2, 2, &blocks, &NestConfig::allow_empty_lines())
                .unwrap();
        assert_eq!(layout.row_len(), &[2, 0]);
        assert_eq!(layout.col_len(), &[2, 0]);
        assert!(layout.locate(Axis::Row, 2).is_err());
    }

    #[test]
    fn test_serial_block_in_parallel_group_is_rejected() {
        let groups = ThreadGroup::create(2);
        let blocks = grid(vec![Some((2, 2))]);
        let err = BlockLayout::compute(groups[0].as_ref(), 1, 1, &blocks, &NestConfig::default())
            .unwrap_err();

        assert_eq!(
            err,
            MatrixError::Configuration(ConfigurationError::GroupMismatch {
                row: 0,
                col: 0,
                ranks: 1,
                group_size: 2,
            })
        );
    }

    #[test]
    fn test_grid_shape_is_checked() {
        let blocks = grid(vec![Some((1, 1))]);
        assert!(matches!(
            BlockLayout::compute(&SerialGroup, 1, 2, &blocks, &NestConfig::default()),
            Err(MatrixError::Configuration(ConfigurationError::GridShape { .. }))
        ));
        assert!(matches!(
            BlockLayout::compute(&SerialGroup, 0, 1, &[], &NestConfig::default()),
            Err(MatrixError::Configuration(ConfigurationError::EmptyGrid))
        ));
    }
}
