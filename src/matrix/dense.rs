//! Row-distributed dense matrix backed by `ndarray`

use std::fmt;
use std::sync::Arc;

use ndarray::{Array2, ArrayView1};
use rayon::prelude::*;

use crate::comm::{GroupHandle, SerialGroup};
use crate::error::{Axis, MatrixError, Result};
use crate::matrix::config::KernelConfig;
use crate::matrix::{check_index, check_layout, check_len, AssemblyState, Matrix};
use crate::vector::{DistVector, Layout};

/// A dense matrix whose rows are split over a process group.
///
/// Unlike [`AijMatrix`](crate::AijMatrix), writes go straight into local
/// storage; writing a row owned by another rank is an error.
pub struct DenseMatrix {
    group: GroupHandle,
    rows: Arc<Layout>,
    cols: Arc<Layout>,
    row_start: usize,
    /// Local rows × global columns
    data: Array2<f64>,
    state: AssemblyState,
    kernel: KernelConfig,
}

impl DenseMatrix {
    /// Collective: creates a zero matrix owning `local_rows` rows and
    /// `local_cols` columns on the calling rank.
    pub fn create(group: GroupHandle, local_rows: usize, local_cols: usize) -> Result<Self> {
        let rows = Arc::new(Layout::contiguous(group.as_ref(), local_rows)?);
        let cols = Arc::new(Layout::contiguous(group.as_ref(), local_cols)?);
        let row_start = rows.local_range(group.rank()).map(|r| r.start).unwrap_or(0);
        let data = Array2::zeros((local_rows, cols.global_size()));

        Ok(Self {
            group,
            rows,
            cols,
            row_start,
            data,
            state: AssemblyState::Unassembled,
            kernel: KernelConfig::default(),
        })
    }

    /// Wraps a full array as an assembled serial matrix.
    pub fn from_array(data: Array2<f64>) -> Self {
        let (n_rows, n_cols) = data.dim();
        Self {
            group: SerialGroup::handle(),
            rows: Arc::new(Layout::serial(n_rows)),
            cols: Arc::new(Layout::serial(n_cols)),
            row_start: 0,
            data,
            state: AssemblyState::Assembled,
            kernel: KernelConfig::default(),
        }
    }

    pub fn with_kernel(mut self, kernel: KernelConfig) -> Self {
        self.kernel = kernel;
        self
    }

    /// The locally owned rows.
    pub fn local_rows(&self) -> &Array2<f64> {
        &self.data
    }

    fn local_row(&self, row: usize) -> Result<usize> {
        if row >= self.row_start && row < self.row_start + self.data.nrows() {
            Ok(row - self.row_start)
        } else {
            Err(MatrixError::NonLocalAccess {
                row,
                rank: self.group.rank(),
                owned: self.rows.owned(self.group.rank()).to_vec(),
            })
        }
    }

    fn locate(&self, row: usize, col: usize) -> Result<(usize, usize)> {
        check_index(Axis::Row, row, self.rows.global_size())?;
        check_index(Axis::Column, col, self.cols.global_size())?;
        Ok((self.local_row(row)?, col))
    }

    fn apply(&self, x: &DistVector, y: &mut DistVector, accumulate: bool) -> Result<()> {
        if self.state != AssemblyState::Assembled {
            return Err(MatrixError::NotAssembled("dense"));
        }
        check_len(x, self.cols.global_size())?;
        check_layout(y, &self.rows)?;

        let xg = x.to_global()?;
        let xv = ArrayView1::from(&xg[..]);
        let data = &self.data;
        let row_product = |r: usize, yr: &mut f64| {
            let sum = data.row(r).dot(&xv);
            if accumulate {
                *yr += sum;
            } else {
                *yr = sum;
            }
        };

        let out = y.local_mut();
        if out.len() >= self.kernel.parallel_row_threshold {
            out.par_iter_mut()
                .enumerate()
                .for_each(|(r, yr)| row_product(r, yr));
        } else {
            out.iter_mut()
                .enumerate()
                .for_each(|(r, yr)| row_product(r, yr));
        }
        Ok(())
    }
}

impl Matrix for DenseMatrix {
    fn type_name(&self) -> &'static str {
        "dense"
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
        if self.state != AssemblyState::Assembled {
            return Err(MatrixError::NotAssembled("dense"));
        }
        check_layout(x, &self.rows)?;
        check_len(y, self.cols.global_size())?;

        let contributions = self.data.t().dot(&ArrayView1::from(x.local())).to_vec();
        let full = self.group.all_sum(&contributions)?;
        let layout = Arc::clone(y.layout());
        let rank = self.group.rank();
        for (slot, g) in y.local_mut().iter_mut().zip(layout.global_indices(rank)) {
            *slot = full[g];
        }
        Ok(())
    }

    fn get_value(&self, row: usize, col: usize) -> Result<f64> {
        let (r, c) = self.locate(row, col)?;
        Ok(self.data[[r, c]])
    }

    fn set_value(&mut self, row: usize, col: usize, value: f64) -> Result<()> {
        let (r, c) = self.locate(row, col)?;
        self.data[[r, c]] = value;
        self.state = AssemblyState::Unassembled;
        Ok(())
    }

    fn add_value(&mut self, row: usize, col: usize, value: f64) -> Result<()> {
        let (r, c) = self.locate(row, col)?;
        self.data[[r, c]] += value;
        self.state = AssemblyState::Unassembled;
        Ok(())
    }

    fn zero_entries(&mut self) -> Result<()> {
        self.data.fill(0.0);
        Ok(())
    }

    fn scale(&mut self, alpha: f64) -> Result<()> {
        self.data.mapv_inplace(|v| v * alpha);
        Ok(())
    }

    fn assembly_begin(&mut self) -> Result<()> {
        self.state = AssemblyState::Assembling;
        Ok(())
    }

    fn assembly_end(&mut self) -> Result<bool> {
        if self.state == AssemblyState::Assembling {
            self.state = AssemblyState::Assembled;
        }
        Ok(self.state == AssemblyState::Assembled)
    }

    fn assembly_state(&self) -> AssemblyState {
        self.state
    }
}

impl fmt::Debug for DenseMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DenseMatrix")
            .field("size", &self.size())
            .field("rank", &self.group.rank())
            .field("row_start", &self.row_start)
            .field("state", &self.state)
            .finish()
    }
}
