//! The matrix capability and its concrete storage kinds

pub mod aij;
pub mod config;
pub mod dense;

pub use aij::AijMatrix;
pub use config::{EmptyLinePolicy, KernelConfig, NestConfig};
pub use dense::DenseMatrix;

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use crate::error::{Axis, MatrixError, Result};
use crate::vector::{DistVector, Layout};

/// Assembly progress of a matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AssemblyState {
    /// Values were set since the last completed assembly, or none ever was.
    #[default]
    Unassembled,
    /// `assembly_begin` was called, `assembly_end` not yet.
    Assembling,
    /// All pending values are in place.
    Assembled,
}

/// The capability set every block of a nest provides, and that a nest
/// provides in turn.
///
/// Row and column indices passed to value accessors are global indices in the
/// matrix's own numbering. `multiply`, `multiply_add`, `multiply_transpose`
/// and the assembly pair are collective.
pub trait Matrix: fmt::Debug {
    /// Short name of the storage kind, used by views.
    fn type_name(&self) -> &'static str;

    /// Global `(rows, cols)`.
    fn size(&self) -> (usize, usize);

    /// `(rows, cols)` owned by the calling rank.
    fn local_size(&self) -> (usize, usize);

    /// Distribution of rows (and of vectors `y` in `y = A x`).
    fn row_layout(&self) -> Arc<Layout>;

    /// Distribution of columns (and of vectors `x` in `y = A x`).
    fn col_layout(&self) -> Arc<Layout>;

    /// `y = A x`.
    fn multiply(&mut self, x: &DistVector, y: &mut DistVector) -> Result<()>;

    /// `y += A x`.
    fn multiply_add(&mut self, x: &DistVector, y: &mut DistVector) -> Result<()> {
        let mut product = y.zeros_like();
        self.multiply(x, &mut product)?;
        y.axpy(1.0, &product)
    }

    /// `y = Aᵀ x`.
    fn multiply_transpose(&mut self, x: &DistVector, y: &mut DistVector) -> Result<()>;

    /// Reads one entry. Entries never set read as zero.
    fn get_value(&self, row: usize, col: usize) -> Result<f64>;

    /// Overwrites one entry.
    fn set_value(&mut self, row: usize, col: usize, value: f64) -> Result<()>;

    /// Adds to one entry.
    fn add_value(&mut self, row: usize, col: usize, value: f64) -> Result<()>;

    /// Sets every stored entry to zero, keeping the structure.
    fn zero_entries(&mut self) -> Result<()>;

    /// `A = alpha A`.
    fn scale(&mut self, alpha: f64) -> Result<()>;

    fn assembly_begin(&mut self) -> Result<()>;

    /// Finishes assembly; returns whether the matrix is now fully assembled.
    fn assembly_end(&mut self) -> Result<bool>;

    fn assembly_state(&self) -> AssemblyState;
}

/// A shared reference to a matrix of any kind.
///
/// Blocks are shared with whoever built them; a nest only holds a handle and
/// never assumes it is the sole user.
pub type MatrixHandle = Rc<RefCell<dyn Matrix>>;

/// Wraps a matrix into a shareable handle.
pub fn handle<M: Matrix + 'static>(matrix: M) -> MatrixHandle {
    Rc::new(RefCell::new(matrix))
}

/// Checks that `index` lies in `[0, extent)`.
pub(crate) fn check_index(axis: Axis, index: usize, extent: usize) -> Result<()> {
    if index < extent {
        Ok(())
    } else {
        Err(MatrixError::IndexOutOfRange {
            axis,
            index,
            extent,
        })
    }
}

/// Checks that `v` is distributed exactly like `layout`.
pub(crate) fn check_layout(v: &DistVector, layout: &Layout) -> Result<()> {
    if v.same_layout(layout) {
        Ok(())
    } else {
        Err(MatrixError::LayoutMismatch {
            expected: layout.global_size(),
            actual: v.len(),
        })
    }
}

/// Checks that `v` has global length `n`.
pub(crate) fn check_len(v: &DistVector, n: usize) -> Result<()> {
    if v.len() == n {
        Ok(())
    } else {
        Err(MatrixError::LayoutMismatch {
            expected: n,
            actual: v.len(),
        })
    }
}
