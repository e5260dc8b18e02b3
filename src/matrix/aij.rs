//! Row-distributed sparse (AIJ) matrix
//!
//! Each rank owns a contiguous range of rows and keeps them in CSR form
//! (`sprs::CsMat`) with global column indices:
//! - row_ptr: Array of size local_rows + 1 into the column/value arrays
//! - col_idx: global column of every stored entry
//! - values: the stored entries
//!
//! Values written since the last assembly sit in a pending map and are visible
//! to reads right away. Values written into rows owned by another rank are
//! stashed and shipped to their owner by `assembly_end`.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use sprs::CsMat;
use tracing::debug;

use crate::comm::{Entry, GroupHandle, SerialGroup};
use crate::error::{Axis, ConfigurationError, MatrixError, Result};
use crate::matrix::{check_index, check_layout, check_len, AssemblyState, Matrix};
use crate::vector::{DistVector, Layout};

/// A sparse matrix whose rows are split over a process group
pub struct AijMatrix {
    group: GroupHandle,
    rows: Arc<Layout>,
    cols: Arc<Layout>,

    /// First global row owned by this rank
    row_start: usize,

    /// Assembled local rows (local_rows × global cols)
    local: CsMat<f64>,

    /// Writes to local rows since the last assembly, keyed by (local row, col)
    pending: BTreeMap<(usize, usize), f64>,

    /// Writes to rows of other ranks, by mode
    stash_insert: Vec<Entry>,
    stash_add: Vec<Entry>,

    state: AssemblyState,
}

impl AijMatrix {
    /// Collective: creates an empty matrix owning `local_rows` rows and
    /// `local_cols` columns on the calling rank.
    pub fn create(group: GroupHandle, local_rows: usize, local_cols: usize) -> Result<Self> {
        let rows = Arc::new(Layout::contiguous(group.as_ref(), local_rows)?);
        let cols = Arc::new(Layout::contiguous(group.as_ref(), local_cols)?);
        Self::with_layouts(group, rows, cols)
    }

    /// Creates an empty matrix over existing row and column layouts.
    ///
    /// The row layout must give each rank a contiguous range; columns may be
    /// distributed any way. Both layouts must describe every rank of `group`.
    pub fn with_layouts(group: GroupHandle, rows: Arc<Layout>, cols: Arc<Layout>) -> Result<Self> {
        let rank = group.rank();
        for (axis, layout) in [("row", &rows), ("column", &cols)] {
            if layout.num_ranks() != group.size() {
                return Err(ConfigurationError::InvalidLayout(format!(
                    "{} layout describes {} ranks, the group has {}",
                    axis,
                    layout.num_ranks(),
                    group.size()
                ))
                .into());
            }
        }
        let owned = rows.local_range(rank).ok_or_else(|| {
            ConfigurationError::InvalidLayout(format!(
                "rank {} owns non-contiguous rows {:?}",
                rank,
                rows.owned(rank)
            ))
        })?;
        Ok(Self::from_parts(group, rows, cols, owned))
    }

    fn from_parts(group: GroupHandle, rows: Arc<Layout>, cols: Arc<Layout>, owned: Range<usize>) -> Self {
        let local = CsMat::zero((owned.len(), cols.global_size()));
        Self {
            group,
            rows,
            cols,
            row_start: owned.start,
            local,
            pending: BTreeMap::new(),
            stash_insert: Vec::new(),
            stash_add: Vec::new(),
            state: AssemblyState::Unassembled,
        }
    }

    /// Creates an empty serial matrix with the given dimensions
    pub fn zeros(n_rows: usize, n_cols: usize) -> Self {
        Self::from_parts(
            SerialGroup::handle(),
            Arc::new(Layout::serial(n_rows)),
            Arc::new(Layout::serial(n_cols)),
            0..n_rows,
        )
    }

    /// Creates an assembled serial identity matrix of the given size
    pub fn identity(n: usize) -> Self {
        let mut matrix = Self::zeros(n, n);
        matrix.local = CsMat::eye(n);
        matrix.state = AssemblyState::Assembled;
        matrix
    }

    /// Collective: an assembled identity with `local_n` rows and columns on
    /// the calling rank.
    pub fn identity_in(group: GroupHandle, local_n: usize) -> Result<Self> {
        let mut matrix = Self::create(group, local_n, local_n)?;
        let start = matrix.row_start;
        let row_ptr: Vec<usize> = (0..=local_n).collect();
        let col_idx: Vec<usize> = (start..start + local_n).collect();
        matrix.local = CsMat::new(
            (local_n, matrix.cols.global_size()),
            row_ptr,
            col_idx,
            vec![1.0; local_n],
        );
        matrix.state = AssemblyState::Assembled;
        Ok(matrix)
    }

    /// Builds an assembled serial matrix from `(row, col, value)` triplets.
    /// Duplicate coordinates are summed.
    pub fn from_triplets(n_rows: usize, n_cols: usize, triplets: &[Entry]) -> Result<Self> {
        let mut matrix = Self::zeros(n_rows, n_cols);
        for &(row, col, value) in triplets {
            matrix.add_value(row, col, value)?;
        }
        matrix.assembly_begin()?;
        matrix.assembly_end()?;
        Ok(matrix)
    }

    /// Wraps an `sprs` matrix as an assembled serial matrix
    pub fn from_sprs(matrix: CsMat<f64>) -> Self {
        // Ensure matrix is in CSR format
        let matrix = if matrix.is_csr() { matrix } else { matrix.to_csr() };
        let (n_rows, n_cols) = matrix.shape();

        let mut result = Self::zeros(n_rows, n_cols);
        result.local = matrix;
        result.state = AssemblyState::Assembled;
        result
    }

    /// The assembled local rows as an `sprs` matrix
    pub fn to_sprs(&self) -> CsMat<f64> {
        self.local.clone()
    }

    /// Number of stored entries in the assembled local rows
    pub fn nnz(&self) -> usize {
        self.local.nnz()
    }

    /// The assembled entries of local row `i` as `(global col, value)` pairs
    pub fn row_entries(&self, i: usize) -> Vec<(usize, f64)> {
        self.local
            .outer_view(i)
            .map(|row| row.iter().map(|(col, &v)| (col, v)).collect())
            .unwrap_or_default()
    }

    fn local_row(&self, row: usize) -> Option<usize> {
        let n_local = self.local.rows();
        if row >= self.row_start && row < self.row_start + n_local {
            Some(row - self.row_start)
        } else {
            None
        }
    }

    fn stored(&self, local_row: usize, col: usize) -> f64 {
        self.pending
            .get(&(local_row, col))
            .or_else(|| self.local.get(local_row, col))
            .copied()
            .unwrap_or(0.0)
    }

    fn check_entry(&self, row: usize, col: usize) -> Result<()> {
        let (n_rows, n_cols) = self.size();
        check_index(Axis::Row, row, n_rows)?;
        check_index(Axis::Column, col, n_cols)
    }

    /// Ships stashed off-process writes to their owners.
    fn exchange_stash(&mut self) -> Result<()> {
        let inserts = self.group.all_gather_entries(&self.stash_insert)?;
        let adds = self.group.all_gather_entries(&self.stash_add)?;
        self.stash_insert.clear();
        self.stash_add.clear();

        let mut received = 0;
        for (row, col, value) in inserts.into_iter().flatten() {
            if let Some(r) = self.local_row(row) {
                self.pending.insert((r, col), value);
                received += 1;
            }
        }
        for (row, col, value) in adds.into_iter().flatten() {
            if let Some(r) = self.local_row(row) {
                let current = self.stored(r, col);
                self.pending.insert((r, col), current + value);
                received += 1;
            }
        }

        if received > 0 {
            debug!(rank = self.group.rank(), received, "aij: received off-process values");
        }
        Ok(())
    }

    /// Folds pending values into the CSR storage.
    fn merge_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }

        let mut entries: BTreeMap<(usize, usize), f64> = BTreeMap::new();
        for (r, row) in self.local.outer_iterator().enumerate() {
            for (col, &v) in row.iter() {
                entries.insert((r, col), v);
            }
        }
        entries.append(&mut self.pending);

        let (n_local, n_cols) = self.local.shape();
        let mut row_ptr = Vec::with_capacity(n_local + 1);
        let mut col_idx = Vec::with_capacity(entries.len());
        let mut values = Vec::with_capacity(entries.len());

        row_ptr.push(0);
        let mut current = 0;
        for ((r, col), v) in entries {
            while current < r {
                row_ptr.push(col_idx.len());
                current += 1;
            }
            col_idx.push(col);
            values.push(v);
        }
        while row_ptr.len() < n_local + 1 {
            row_ptr.push(col_idx.len());
        }

        self.local = CsMat::new((n_local, n_cols), row_ptr, col_idx, values);
    }

    fn require_assembled(&self) -> Result<()> {
        if self.state == AssemblyState::Assembled {
            Ok(())
        } else {
            Err(MatrixError::NotAssembled("aij"))
        }
    }

    /// Accumulates `A x` into the local part of `y`.
    fn apply(&self, x: &DistVector, y: &mut DistVector, accumulate: bool) -> Result<()> {
        self.require_assembled()?;
        check_len(x, self.cols.global_size())?;
        check_layout(y, &self.rows)?;

        let xg = x.to_global()?;
        let out = y.local_mut();
        for (r, row) in self.local.outer_iterator().enumerate() {
            let sum: f64 = row.iter().map(|(col, &v)| v * xg[col]).sum();
            if accumulate {
                out[r] += sum;
            } else {
                out[r] = sum;
            }
        }
        Ok(())
    }
}

impl Matrix for AijMatrix {
    fn type_name(&self) -> &'static str {
        "aij"
    }

    fn size(&self) -> (usize, usize) {
        (self.rows.global_size(), self.cols.global_size())
    }

    fn local_size(&self) -> (usize, usize) {
        let rank = self.group.rank();
        (self.rows.local_size(rank), self.cols.local_size(rank))
    }

    fn row_layout(&self) -> Arc<Layout> {
        Arc::clone(&self.rows)
    }

    fn col_layout(&self) -> Arc<Layout> {
        Arc::clone(&self.cols)
    }

    fn multiply(&mut self, x: &DistVector, y: &mut DistVector) -> Result<()> {
        self.apply(x, y, false)
    }

    fn multiply_add(&mut self, x: &DistVector, y: &mut DistVector) -> Result<()> {
        self.apply(x, y, true)
    }

    fn multiply_transpose(&mut self, x: &DistVector, y: &mut DistVector) -> Result<()> {
        self.require_assembled()?;
        check_layout(x, &self.rows)?;
        check_len(y, self.cols.global_size())?;

        let mut contributions = vec![0.0; self.cols.global_size()];
        for (r, row) in self.local.outer_iterator().enumerate() {
            let xr = x.local()[r];
            for (col, &v) in row.iter() {
                contributions[col] += v * xr;
            }
        }

        let full = self.group.all_sum(&contributions)?;
        let layout = Arc::clone(y.layout());
        let rank = self.group.rank();
        for (slot, g) in y.local_mut().iter_mut().zip(layout.global_indices(rank)) {
            *slot = full[g];
        }
        Ok(())
    }

    fn get_value(&self, row: usize, col: usize) -> Result<f64> {
        self.check_entry(row, col)?;
        let r = self.local_row(row).ok_or_else(|| MatrixError::NonLocalAccess {
            row,
            rank: self.group.rank(),
            owned: self.rows.owned(self.group.rank()).to_vec(),
        })?;
        Ok(self.stored(r, col))
    }

    fn set_value(&mut self, row: usize, col: usize, value: f64) -> Result<()> {
        self.check_entry(row, col)?;
        match self.local_row(row) {
            Some(r) => {
                self.pending.insert((r, col), value);
            }
            None => self.stash_insert.push((row, col, value)),
        }
        self.state = AssemblyState::Unassembled;
        Ok(())
    }

    fn add_value(&mut self, row: usize, col: usize, value: f64) -> Result<()> {
        self.check_entry(row, col)?;
        match self.local_row(row) {
            Some(r) => {
                let current = self.stored(r, col);
                self.pending.insert((r, col), current + value);
            }
            None => self.stash_add.push((row, col, value)),
        }
        self.state = AssemblyState::Unassembled;
        Ok(())
    }

    fn zero_entries(&mut self) -> Result<()> {
        self.local.data_mut().iter_mut().for_each(|v| *v = 0.0);
        self.pending.values_mut().for_each(|v| *v = 0.0);
        self.stash_insert.clear();
        self.stash_add.clear();
        Ok(())
    }

    fn scale(&mut self, alpha: f64) -> Result<()> {
        self.require_assembled()?;
        self.local.data_mut().iter_mut().for_each(|v| *v *= alpha);
        Ok(())
    }

    fn assembly_begin(&mut self) -> Result<()> {
        self.state = AssemblyState::Assembling;
        Ok(())
    }

    fn assembly_end(&mut self) -> Result<bool> {
        match self.state {
            AssemblyState::Assembled => Ok(true),
            AssemblyState::Unassembled => Ok(false),
            AssemblyState::Assembling => {
                self.exchange_stash()?;
                self.merge_pending();
                self.state = AssemblyState::Assembled;
                Ok(true)
            }
        }
    }

    fn assembly_state(&self) -> AssemblyState {
        self.state
    }
}

impl fmt::Debug for AijMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (n_rows, n_cols) = self.size();
        writeln!(f, "AijMatrix {{")?;
        writeln!(f, "  dimensions: {} × {}", n_rows, n_cols)?;
        writeln!(f, "  rank: {}, local rows from {}", self.group.rank(), self.row_start)?;
        writeln!(f, "  nnz: {} (+{} pending)", self.nnz(), self.pending.len())?;

        // Print a sample of the matrix content
        let max_rows_to_print = 5.min(self.local.rows());

        if max_rows_to_print > 0 {
            writeln!(f, "  content sample:")?;

            for i in 0..max_rows_to_print {
                write!(f, "    row {}: ", self.row_start + i)?;
                let entries = self.row_entries(i);

                if entries.is_empty() {
                    writeln!(f, "(empty)")?;
                } else {
                    let max_elements = 5.min(entries.len());

                    for (col, v) in &entries[..max_elements] {
                        write!(f, "({}, {:?}) ", col, v)?;
                    }

                    if entries.len() > max_elements {
                        write!(f, "... ({} more)", entries.len() - max_elements)?;
                    }

                    writeln!(f)?;
                }
            }

            if self.local.rows() > max_rows_to_print {
                writeln!(f, "    ... ({} more rows)", self.local.rows() - max_rows_to_print)?;
            }
        }

        write!(f, "}}")
    }
}
