//! # nestmat: nested block matrices
//!
//! A nested matrix presents one logical linear operator built from an
//! `nr × nc` grid of sub-matrices, as used for coupled multi-field problems
//! (velocity/pressure, displacement/temperature). The blocks keep their own
//! storage kind and parallel distribution; the nest derives the composite
//! numbering and routes vector slices between the composite vectors and the
//! blocks.
//!
//! ## Overview
//!
//! - Block extents are inferred from the present blocks, and every block of a
//!   block row (column) must agree on its extent and distribution.
//! - Absent cells are exact zero blocks: they contribute nothing to products,
//!   read back as `0.0` and reject writes.
//! - Multiplies go through per-block scratch vectors, allocated lazily and
//!   dropped whenever the grid changes.
//! - Assembly is delegated to every distinct block, and the nest only reports
//!   success when every block does.
//!
//! ## Components
//!
//! 1. **Process groups** ([`comm`]): explicit handles for collective
//!    communication, with a serial group and an in-process thread group.
//! 2. **Vectors** ([`vector`]): distributed vectors, layouts and index sets.
//! 3. **Matrices** ([`matrix`]): the [`Matrix`] capability and the
//!    [`AijMatrix`] and [`DenseMatrix`] storage kinds.
//! 4. **Nests** ([`nest`]): [`NestedMatrix`] with its [`BlockLayout`],
//!    [`IndexMap`] and [`ScratchVectors`].
//!
//! ## Usage
//!
//! A 2×2 saddle-point operator with an absent lower-right block:
//!
//! ```
//! use nestmat::{handle, AijMatrix, Matrix, NestedMatrix, SerialGroup};
//!
//! let a = AijMatrix::from_triplets(2, 2, &[(0, 0, 4.0), (1, 1, 4.0)]).unwrap();
//! let b = AijMatrix::from_triplets(1, 2, &[(0, 0, 1.0), (0, 1, 1.0)]).unwrap();
//! let bt = AijMatrix::from_triplets(2, 1, &[(0, 0, 1.0), (1, 0, 1.0)]).unwrap();
//!
//! let mut nest = NestedMatrix::from_rows(
//!     SerialGroup::handle(),
//!     vec![
//!         vec![Some(handle(a)), Some(handle(bt))],
//!         vec![Some(handle(b)), None],
//!     ],
//! )
//! .unwrap();
//!
//! let (mut x, mut y) = nest.create_vecs();
//! x.set_all(1.0);
//! nest.multiply(&x, &mut y).unwrap();
//! assert_eq!(y.to_global().unwrap(), vec![5.0, 5.0, 2.0]);
//! ```

pub mod comm;
pub mod error;
pub mod matrix;
pub mod nest;
pub mod utils;
pub mod vector;

// Re-export primary components
pub use comm::{GroupHandle, ProcessGroup, SerialGroup, ThreadGroup};
pub use error::{Axis, ConfigurationError, MatrixError, Result};
pub use matrix::{handle, AssemblyState, Matrix, MatrixHandle};
pub use matrix::{AijMatrix, DenseMatrix};
pub use matrix::config::{EmptyLinePolicy, KernelConfig, NestConfig};
pub use nest::{BlockLayout, IndexMap, NestedMatrix, ScratchVectors};
pub use utils::local_dense;
pub use vector::{DistVector, IndexSet, Layout};

/// Version information for the nestmat library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
