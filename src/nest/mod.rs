//! # Nested matrices
//!
//! A [`NestedMatrix`] is one logical operator assembled from an `nr × nc` grid
//! of sub-matrices. Cells may be empty; an empty (absent) cell is an exact zero
//! block of its row's and column's extent.
//!
//! ## Components
//!
//! 1. **[`BlockLayout`]**: extents and distributions of block rows/columns,
//!    validated across each line.
//! 2. **[`IndexMap`]**: global and local index sets per block, plus scatter
//!    (copy) and gather (additive) between composite and block vectors.
//! 3. **[`ScratchVectors`]**: staging vectors for multiplies, created on first
//!    use and dropped whenever the grid changes.
//!
//! ## Collective calls
//!
//! Multiplies and the assembly pair are collective: every rank of the group
//! must call them in the same order on nests with the same grid. A nest cannot
//! check this locally. Errors returned by collective calls must be checked on
//! every rank before continuing, or the ranks drift apart and hang.

mod index_map;
mod layout;
mod scratch;

pub use index_map::IndexMap;
pub use layout::BlockLayout;
pub use scratch::ScratchVectors;

use std::cell::{Ref, RefMut};
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::comm::GroupHandle;
use crate::error::{Axis, ConfigurationError, MatrixError, Result};
use crate::matrix::{check_len, AssemblyState, Matrix, MatrixHandle, NestConfig};
use crate::vector::{DistVector, Layout};

/// A matrix built from a grid of sub-matrices.
///
/// Blocks are shared handles: the nest never owns its blocks exclusively and
/// the caller may keep using them. A block must not be mutably borrowed by the
/// caller while the nest works on it (reported as
/// [`MatrixError::BlockInUse`]).
///
/// # Examples
///
/// ```
/// use nestmat::{handle, AijMatrix, DistVector, Matrix, NestedMatrix, SerialGroup};
///
/// let blocks = vec![
///     Some(handle(AijMatrix::identity(2))),
///     None,
///     None,
///     Some(handle(AijMatrix::identity(3))),
/// ];
/// let mut nest = NestedMatrix::create(SerialGroup::handle(), 2, 2, blocks).unwrap();
///
/// let x = DistVector::serial(vec![1.0; 5]);
/// let mut y = DistVector::serial(vec![0.0; 5]);
/// nest.multiply(&x, &mut y).unwrap();
///
/// assert_eq!(y.local(), &[1.0; 5]);
/// assert_eq!(nest.get_value(1, 3).unwrap(), 0.0);
/// ```
#[derive(Debug)]
pub struct NestedMatrix {
    group: GroupHandle,
    nr: usize,
    nc: usize,
    /// Row-major grid, `blocks[i * nc + j]`
    blocks: Vec<Option<MatrixHandle>>,
    layout: BlockLayout,
    index_map: IndexMap,
    scratch: Option<ScratchVectors>,
    state: AssemblyState,
    config: NestConfig,
}

impl NestedMatrix {
    /// Creates a nest from a row-major `nr × nc` grid with the default config.
    pub fn create(
        group: GroupHandle,
        nr: usize,
        nc: usize,
        blocks: Vec<Option<MatrixHandle>>,
    ) -> Result<Self> {
        Self::with_config(group, nr, nc, blocks, NestConfig::default())
    }

    /// Creates a nest from a row-major `nr × nc` grid.
    pub fn with_config(
        group: GroupHandle,
        nr: usize,
        nc: usize,
        blocks: Vec<Option<MatrixHandle>>,
        config: NestConfig,
    ) -> Result<Self> {
        let layout = BlockLayout::compute(group.as_ref(), nr, nc, &blocks, &config)?;
        let index_map = IndexMap::build(group.as_ref(), &layout)?;

        debug!(
            rank = group.rank(),
            nr,
            nc,
            rows = layout.total_rows(),
            cols = layout.total_cols(),
            "nest: created"
        );

        Ok(Self {
            group,
            nr,
            nc,
            blocks,
            layout,
            index_map,
            scratch: None,
            state: AssemblyState::Unassembled,
            config,
        })
    }

    /// Creates a nest from a list of block rows.
    pub fn from_rows(group: GroupHandle, rows: Vec<Vec<Option<MatrixHandle>>>) -> Result<Self> {
        let nr = rows.len();
        let nc = rows.first().map(Vec::len).unwrap_or(0);
        if rows.iter().any(|row| row.len() != nc) {
            return Err(ConfigurationError::GridShape {
                nr,
                nc,
                expected: nr * nc,
                actual: rows.iter().map(Vec::len).sum(),
            }
            .into());
        }
        Self::create(group, nr, nc, rows.into_iter().flatten().collect())
    }

    /// `(nr, nc)`: number of block rows and block columns.
    pub fn block_dims(&self) -> (usize, usize) {
        (self.nr, self.nc)
    }

    /// Global extent of each block row.
    pub fn row_lengths(&self) -> &[usize] {
        self.layout.row_len()
    }

    /// Global extent of each block column.
    pub fn col_lengths(&self) -> &[usize] {
        self.layout.col_len()
    }

    pub fn block_layout(&self) -> &BlockLayout {
        &self.layout
    }

    pub fn index_map(&self) -> &IndexMap {
        &self.index_map
    }

    pub fn config(&self) -> &NestConfig {
        &self.config
    }

    pub fn group(&self) -> &GroupHandle {
        &self.group
    }

    /// The block at `(i, j)`, `None` if the cell is absent.
    pub fn sub_matrix(&self, i: usize, j: usize) -> Result<Option<MatrixHandle>> {
        self.check_block(i, j)?;
        Ok(self.cell(i, j).cloned())
    }

    /// The whole grid, row-major.
    pub fn sub_matrices(&self) -> &[Option<MatrixHandle>] {
        &self.blocks
    }

    /// Replaces the block at `(i, j)` and recomputes the layout and index maps.
    ///
    /// On error the nest is left unchanged. On success the scratch vectors are
    /// dropped and the nest must be assembled again.
    pub fn set_sub_matrix(&mut self, i: usize, j: usize, block: Option<MatrixHandle>) -> Result<()> {
        self.check_block(i, j)?;

        let mut blocks = self.blocks.clone();
        blocks[i * self.nc + j] = block;
        let layout = BlockLayout::compute(self.group.as_ref(), self.nr, self.nc, &blocks, &self.config)?;
        let index_map = IndexMap::build(self.group.as_ref(), &layout)?;

        self.blocks = blocks;
        self.layout = layout;
        self.index_map = index_map;
        self.scratch = None;
        self.state = AssemblyState::Unassembled;

        debug!(
            rank = self.group.rank(),
            row = i,
            col = j,
            "nest: block replaced, layout recomputed"
        );
        Ok(())
    }

    /// Whether staging vectors are currently allocated.
    pub fn has_scratch(&self) -> bool {
        self.scratch.is_some()
    }

    /// A `(right, left)` pair of zero vectors in the nest's own column and row
    /// layouts. Multiplying with these needs no data exchange between blocks.
    pub fn create_vecs(&self) -> (DistVector, DistVector) {
        (
            DistVector::create(Arc::clone(&self.group), self.col_layout()),
            DistVector::create(Arc::clone(&self.group), self.row_layout()),
        )
    }

    fn check_block(&self, i: usize, j: usize) -> Result<()> {
        if i < self.nr && j < self.nc {
            Ok(())
        } else {
            Err(MatrixError::BlockIndexOutOfRange {
                row: i,
                col: j,
                nr: self.nr,
                nc: self.nc,
            })
        }
    }

    fn cell(&self, i: usize, j: usize) -> Option<&MatrixHandle> {
        self.blocks[i * self.nc + j].as_ref()
    }

    fn line_is_present(&self, axis: Axis, line: usize) -> bool {
        match axis {
            Axis::Row => (0..self.nc).any(|j| self.cell(line, j).is_some()),
            Axis::Column => (0..self.nr).any(|i| self.cell(i, line).is_some()),
        }
    }

    /// Present blocks, each distinct handle once, in row-major order.
    fn distinct_blocks(&self) -> Vec<(usize, usize, &MatrixHandle)> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for i in 0..self.nr {
            for j in 0..self.nc {
                if let Some(block) = self.cell(i, j) {
                    if seen.insert(Rc::as_ptr(block) as *const ()) {
                        out.push((i, j, block));
                    }
                }
            }
        }
        out
    }

    /// The cached state, demoted to `Unassembled` when a block was modified
    /// through a handle the nest does not see.
    fn current_state(&self) -> AssemblyState {
        if self.state != AssemblyState::Assembled {
            return self.state;
        }
        let stale = self.distinct_blocks().into_iter().any(|(_, _, block)| {
            block
                .try_borrow()
                .map_or(true, |b| b.assembly_state() != AssemblyState::Assembled)
        });
        if stale {
            AssemblyState::Unassembled
        } else {
            AssemblyState::Assembled
        }
    }

    fn take_scratch(&mut self) -> ScratchVectors {
        match self.scratch.take() {
            Some(scratch) => scratch,
            None => ScratchVectors::create(&self.group, &self.layout),
        }
    }

    fn restore_scratch(&mut self, scratch: ScratchVectors) {
        if !self.config.release_scratch {
            self.scratch = Some(scratch);
        }
    }

    /// `y += A x` using `scratch` for the block slices.
    fn apply(&self, scratch: &mut ScratchVectors, x: &DistVector, y: &mut DistVector) -> Result<()> {
        let (rows, cols) = scratch.split_mut();

        // Each column slice of x is scattered once, however many blocks use it.
        for (j, col) in cols.iter_mut().enumerate() {
            if self.line_is_present(Axis::Column, j) {
                self.index_map.scatter_to_local(Axis::Column, j, x, col)?;
            }
        }

        for (i, acc) in rows.iter_mut().enumerate() {
            if !self.line_is_present(Axis::Row, i) {
                continue;
            }
            acc.set_all(0.0);
            for (j, col) in cols.iter().enumerate() {
                if let Some(block) = self.cell(i, j) {
                    trace!(row = i, col = j, "nest: multiply block");
                    borrow_mut(block, i, j)?.multiply_add(col, acc)?;
                }
            }
            // The row is complete; only now does it reach y.
            self.index_map.gather_from_local(Axis::Row, i, acc, y)?;
        }
        Ok(())
    }

    /// `y = Aᵀ x`, block column by block column.
    fn apply_transpose(
        &self,
        scratch: &mut ScratchVectors,
        x: &DistVector,
        y: &mut DistVector,
    ) -> Result<()> {
        let (rows, cols) = scratch.split_mut();

        for (i, row) in rows.iter_mut().enumerate() {
            if self.line_is_present(Axis::Row, i) {
                self.index_map.scatter_to_local(Axis::Row, i, x, row)?;
            }
        }

        for (j, acc) in cols.iter_mut().enumerate() {
            if !self.line_is_present(Axis::Column, j) {
                continue;
            }
            acc.set_all(0.0);
            let mut product = acc.zeros_like();
            for (i, row) in rows.iter().enumerate() {
                if let Some(block) = self.cell(i, j) {
                    trace!(row = i, col = j, "nest: transpose multiply block");
                    borrow_mut(block, i, j)?.multiply_transpose(row, &mut product)?;
                    acc.axpy(1.0, &product)?;
                }
            }
            self.index_map.gather_from_local(Axis::Column, j, acc, y)?;
        }
        Ok(())
    }
}

fn borrow(block: &MatrixHandle, row: usize, col: usize) -> Result<Ref<'_, dyn Matrix + 'static>> {
    block
        .try_borrow()
        .map_err(|_| MatrixError::BlockInUse { row, col })
}

fn borrow_mut(block: &MatrixHandle, row: usize, col: usize) -> Result<RefMut<'_, dyn Matrix + 'static>> {
    block
        .try_borrow_mut()
        .map_err(|_| MatrixError::BlockInUse { row, col })
}

impl Matrix for NestedMatrix {
    fn type_name(&self) -> &'static str {
        "nest"
    }

    fn size(&self) -> (usize, usize) {
        (self.layout.total_rows(), self.layout.total_cols())
    }

    fn local_size(&self) -> (usize, usize) {
        let rank = self.group.rank();
        (
            self.index_map.composite(Axis::Row).local_size(rank),
            self.index_map.composite(Axis::Column).local_size(rank),
        )
    }

    fn row_layout(&self) -> Arc<Layout> {
        Arc::clone(self.index_map.composite(Axis::Row))
    }

    fn col_layout(&self) -> Arc<Layout> {
        Arc::clone(self.index_map.composite(Axis::Column))
    }

    fn multiply(&mut self, x: &DistVector, y: &mut DistVector) -> Result<()> {
        check_len(x, self.layout.total_cols())?;
        check_len(y, self.layout.total_rows())?;
        y.set_all(0.0);
        self.multiply_add(x, y)
    }

    fn multiply_add(&mut self, x: &DistVector, y: &mut DistVector) -> Result<()> {
        check_len(x, self.layout.total_cols())?;
        check_len(y, self.layout.total_rows())?;

        let mut scratch = self.take_scratch();
        let result = self.apply(&mut scratch, x, y);
        self.restore_scratch(scratch);
        result
    }

    fn multiply_transpose(&mut self, x: &DistVector, y: &mut DistVector) -> Result<()> {
        check_len(x, self.layout.total_rows())?;
        check_len(y, self.layout.total_cols())?;
        y.set_all(0.0);

        let mut scratch = self.take_scratch();
        let result = self.apply_transpose(&mut scratch, x, y);
        self.restore_scratch(scratch);
        result
    }

    fn get_value(&self, row: usize, col: usize) -> Result<f64> {
        let (i, r) = self.layout.locate(Axis::Row, row)?;
        let (j, c) = self.layout.locate(Axis::Column, col)?;
        match self.cell(i, j) {
            None => Ok(0.0),
            Some(block) => borrow(block, i, j)?.get_value(r, c),
        }
    }

    fn set_value(&mut self, row: usize, col: usize, value: f64) -> Result<()> {
        let (i, r) = self.layout.locate(Axis::Row, row)?;
        let (j, c) = self.layout.locate(Axis::Column, col)?;
        let block = self
            .cell(i, j)
            .ok_or(MatrixError::NullBlockAccess { row: i, col: j })?;
        borrow_mut(block, i, j)?.set_value(r, c, value)?;
        self.state = AssemblyState::Unassembled;
        Ok(())
    }

    fn add_value(&mut self, row: usize, col: usize, value: f64) -> Result<()> {
        let (i, r) = self.layout.locate(Axis::Row, row)?;
        let (j, c) = self.layout.locate(Axis::Column, col)?;
        let block = self
            .cell(i, j)
            .ok_or(MatrixError::NullBlockAccess { row: i, col: j })?;
        borrow_mut(block, i, j)?.add_value(r, c, value)?;
        self.state = AssemblyState::Unassembled;
        Ok(())
    }

    fn zero_entries(&mut self) -> Result<()> {
        for (i, j, block) in self.distinct_blocks() {
            borrow_mut(block, i, j)?.zero_entries()?;
        }
        Ok(())
    }

    fn scale(&mut self, alpha: f64) -> Result<()> {
        for (i, j, block) in self.distinct_blocks() {
            borrow_mut(block, i, j)?.scale(alpha)?;
        }
        Ok(())
    }

    /// Begins assembly of every distinct block.
    ///
    /// The nest is `Assembling` from the first block on, so a failure part
    /// way through leaves the earlier blocks begun. Beginning a block twice is
    /// harmless; calling again after the error is cleared reaches the rest.
    fn assembly_begin(&mut self) -> Result<()> {
        self.state = AssemblyState::Assembling;
        for (i, j, block) in self.distinct_blocks() {
            borrow_mut(block, i, j)?.assembly_begin()?;
        }
        debug!(rank = self.group.rank(), "nest: assembly begun");
        Ok(())
    }

    fn assembly_end(&mut self) -> Result<bool> {
        match self.current_state() {
            AssemblyState::Assembled => Ok(true),
            AssemblyState::Unassembled => Err(ConfigurationError::AssemblyNotStarted.into()),
            AssemblyState::Assembling => {
                // Every block's end is entered even after one reports
                // incomplete: the ends are collective.
                let mut incomplete = None;
                for (i, j, block) in self.distinct_blocks() {
                    let done = borrow_mut(block, i, j)?.assembly_end()?;
                    if !done && incomplete.is_none() {
                        incomplete = Some((i, j));
                    }
                }
                if let Some((row, col)) = incomplete {
                    return Err(ConfigurationError::BlockNotAssembled { row, col }.into());
                }

                self.state = AssemblyState::Assembled;
                debug!(rank = self.group.rank(), "nest: assembled");
                Ok(true)
            }
        }
    }

    fn assembly_state(&self) -> AssemblyState {
        self.current_state()
    }
}

impl fmt::Display for NestedMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (rows, cols) = self.size();
        writeln!(
            f,
            "Matrix object: type=nest, rows={}, cols={} (global {} x {})",
            self.nr, self.nc, rows, cols
        )?;
        for i in 0..self.nr {
            for j in 0..self.nc {
                write!(f, "  ({}, {}) : ", i, j)?;
                match self.cell(i, j).map(|b| b.try_borrow()) {
                    None => writeln!(f, "absent ({} x {})", self.layout.row_len()[i], self.layout.col_len()[j])?,
                    Some(Err(_)) => writeln!(f, "(in use)")?,
                    Some(Ok(block)) => {
                        let (m, n) = block.size();
                        writeln!(f, "type={}, rows={}, cols={}", block.type_name(), m, n)?
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SerialGroup;
    use crate::matrix::{handle, AijMatrix};

    fn identity_nest() -> NestedMatrix {
        let blocks = vec![
            Some(handle(AijMatrix::identity(2))),
            None,
            None,
            Some(handle(AijMatrix::identity(3))),
        ];
        NestedMatrix::create(SerialGroup::handle(), 2, 2, blocks).unwrap()
    }

    #[test]
    fn test_identity_composite() {
        let mut nest = identity_nest();
        assert_eq!(nest.size(), (5, 5));
        assert_eq!(nest.row_lengths(), &[2, 3]);

        let x = DistVector::serial(vec![1.0; 5]);
        let mut y = DistVector::serial(vec![0.0; 5]);
        nest.multiply(&x, &mut y).unwrap();
        assert_eq!(y.local(), &[1.0; 5]);

        assert_eq!(nest.get_value(1, 3).unwrap(), 0.0);
        assert_eq!(nest.get_value(3, 3).unwrap(), 1.0);
    }

    #[test]
    fn test_absent_block_rejects_writes() {
        let mut nest = identity_nest();
        assert_eq!(
            nest.set_value(0, 4, 1.0),
            Err(MatrixError::NullBlockAccess { row: 0, col: 1 })
        );
    }

    #[test]
    fn test_scratch_is_lazy_and_invalidated() {
        let mut nest = identity_nest();
        assert!(!nest.has_scratch());

        let (x, mut y) = nest.create_vecs();
        nest.multiply(&x, &mut y).unwrap();
        assert!(nest.has_scratch());

        nest.set_sub_matrix(0, 1, Some(handle(AijMatrix::zeros(2, 3))))
            .unwrap();
        assert!(!nest.has_scratch());
    }

    #[test]
    fn test_failed_reshape_keeps_old_state() {
        let mut nest = identity_nest();
        let (x, mut y) = nest.create_vecs();
        nest.multiply(&x, &mut y).unwrap();

        let err = nest.set_sub_matrix(0, 1, Some(handle(AijMatrix::zeros(4, 3))));
        assert!(matches!(err, Err(MatrixError::Configuration(_))));
        assert!(nest.has_scratch());
        assert!(nest.sub_matrix(0, 1).unwrap().is_none());
    }

    #[test]
    fn test_interrupted_begin_can_be_retried() {
        let a = handle(AijMatrix::identity(2));
        let blocks = vec![Some(Rc::clone(&a)), None, None, Some(handle(AijMatrix::identity(3)))];
        let mut nest = NestedMatrix::create(SerialGroup::handle(), 2, 2, blocks).unwrap();

        let guard = a.borrow_mut();
        assert_eq!(
            nest.assembly_begin(),
            Err(MatrixError::BlockInUse { row: 0, col: 0 })
        );
        assert_eq!(nest.assembly_state(), AssemblyState::Assembling);
        drop(guard);

        nest.assembly_begin().unwrap();
        assert_eq!(nest.assembly_end(), Ok(true));
        assert_eq!(nest.assembly_state(), AssemblyState::Assembled);
    }

    #[test]
    fn test_display_lists_blocks() {
        let view = identity_nest().to_string();
        assert!(view.contains("type=nest"));
        assert!(view.contains("(0, 0) : type=aij, rows=2, cols=2"));
        assert!(view.contains("(1, 0) : absent (3 x 2)"));
    }
}
