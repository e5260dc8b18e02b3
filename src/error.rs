//! Error types for nested matrices and their collaborators.

use std::fmt;

use thiserror::Error;

/// Which side of a matrix an index or extent refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    Row,
    Column,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::Row => write!(f, "row"),
            Axis::Column => write!(f, "column"),
        }
    }
}

/// Inconsistencies in a block grid or in the assembly protocol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    /// Two present blocks of the same block row (or column) disagree on its extent.
    #[error("block {axis} {line}: block reports extent {found}, but an earlier block fixed it at {expected}")]
    ExtentMismatch {
        axis: Axis,
        line: usize,
        expected: usize,
        found: usize,
    },

    /// Two present blocks of the same line are distributed differently.
    #[error("block {axis} {line}: block ({row}, {col}) is distributed differently from the first block of the line")]
    DistributionMismatch {
        axis: Axis,
        line: usize,
        row: usize,
        col: usize,
    },

    /// A block row (or column) has no present block to infer its extent from.
    #[error("block {axis} {line} has no present block; its extent cannot be inferred")]
    EmptyLine { axis: Axis, line: usize },

    /// The grid passed at construction does not hold `nr * nc` cells.
    #[error("block grid of {nr}x{nc} needs {expected} cells, got {actual}")]
    GridShape {
        nr: usize,
        nc: usize,
        expected: usize,
        actual: usize,
    },

    /// A grid needs at least one block row and one block column.
    #[error("block grid must have at least one block row and one block column")]
    EmptyGrid,

    /// A block is distributed over a different number of ranks than the nest.
    #[error("block ({row}, {col}) is distributed over {ranks} ranks, the nest's group has {group_size}")]
    GroupMismatch {
        row: usize,
        col: usize,
        ranks: usize,
        group_size: usize,
    },

    /// A block did not report a completed assembly.
    #[error("block ({row}, {col}) did not complete its assembly")]
    BlockNotAssembled { row: usize, col: usize },

    /// `assembly_end` was called without a preceding `assembly_begin`.
    #[error("assembly_end called before assembly_begin")]
    AssemblyNotStarted,

    /// A vector layout that does not tile its global index space.
    #[error("invalid layout: {0}")]
    InvalidLayout(String),
}

/// Errors that can occur in matrix and vector operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatrixError {
    /// The block grid or the assembly protocol is inconsistent.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// A global row or column index outside the matrix.
    #[error("{axis} index {index} out of range for extent {extent}")]
    IndexOutOfRange {
        axis: Axis,
        index: usize,
        extent: usize,
    },

    /// A block coordinate outside the grid.
    #[error("block ({row}, {col}) out of range for a {nr}x{nc} grid")]
    BlockIndexOutOfRange {
        row: usize,
        col: usize,
        nr: usize,
        nc: usize,
    },

    /// A write into a block that is structurally zero.
    #[error("block ({row}, {col}) is absent and cannot hold values")]
    NullBlockAccess { row: usize, col: usize },

    /// A collective call failed or ranks disagreed on the call sequence.
    #[error("communication error: {0}")]
    Communication(String),

    /// Reading a row that lives on another process.
    #[error("row {row} is owned by another process (rank {rank} owns {owned:?})")]
    NonLocalAccess {
        row: usize,
        rank: usize,
        owned: Vec<std::ops::Range<usize>>,
    },

    /// Arithmetic requested before the matrix was assembled.
    #[error("{0} matrix used before assembly completed")]
    NotAssembled(&'static str),

    /// A sub-matrix handle that is already mutably borrowed elsewhere.
    #[error("block ({row}, {col}) is borrowed elsewhere")]
    BlockInUse { row: usize, col: usize },

    /// A vector whose layout does not match what the operation needs.
    #[error("vector layout mismatch: expected {expected} entries, got {actual}")]
    LayoutMismatch { expected: usize, actual: usize },
}

/// Result type for nested matrix operations.
pub type Result<T> = std::result::Result<T, MatrixError>;
