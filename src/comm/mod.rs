//! # Process groups
//!
//! Every collective operation in the crate goes through an explicit
//! [`ProcessGroup`] handle instead of ambient global state. A group is a fixed
//! set of cooperating ranks that execute the same sequence of operations
//! (SPMD). Collectives must be entered by every rank in the same order, or the
//! group deadlocks; this is an obligation of the caller.
//!
//! Two groups are provided:
//!
//! - [`SerialGroup`]: a single rank, every collective is a local copy.
//! - [`ThreadGroup`]: `n` ranks living on `n` threads of the current process.

mod threads;

pub use threads::ThreadGroup;

use std::fmt;
use std::sync::Arc;

use crate::error::Result;

/// A `(row, col, value)` triplet exchanged during assembly.
pub type Entry = (usize, usize, f64);

/// Shared handle to a process group.
pub type GroupHandle = Arc<dyn ProcessGroup>;

/// Collective communication used by vectors, matrices and nests.
///
/// Every method except [`rank`](ProcessGroup::rank) and
/// [`size`](ProcessGroup::size) is collective.
pub trait ProcessGroup: Send + Sync + fmt::Debug {
    /// Rank of the calling process, in `0..size()`.
    fn rank(&self) -> usize;

    /// Number of processes in the group.
    fn size(&self) -> usize;

    /// Gathers one list of counts from every rank, indexed by rank.
    fn all_gather_sizes(&self, values: &[usize]) -> Result<Vec<Vec<usize>>>;

    /// Gathers one list of scalars from every rank, indexed by rank.
    fn all_gather_scalars(&self, values: &[f64]) -> Result<Vec<Vec<f64>>>;

    /// Gathers `(index, value)` pairs from every rank, indexed by rank.
    fn all_gather_indexed(&self, values: &[(usize, f64)]) -> Result<Vec<Vec<(usize, f64)>>>;

    /// Gathers matrix triplets from every rank, indexed by rank.
    fn all_gather_entries(&self, entries: &[Entry]) -> Result<Vec<Vec<Entry>>>;

    /// Returns `(start, total)`: the sum of `value` over lower ranks and over all ranks.
    fn exclusive_scan(&self, value: usize) -> Result<(usize, usize)> {
        let counts = self.all_gather_sizes(&[value])?;
        let start = counts[..self.rank()].iter().map(|c| c[0]).sum();
        let total = counts.iter().map(|c| c[0]).sum();
        Ok((start, total))
    }

    /// Element-wise sum of `values` over all ranks.
    fn all_sum(&self, values: &[f64]) -> Result<Vec<f64>> {
        let gathered = self.all_gather_scalars(values)?;
        let mut sum = vec![0.0; values.len()];
        for part in &gathered {
            if part.len() != sum.len() {
                return Err(crate::MatrixError::Communication(format!(
                    "all_sum: ranks contributed {} and {} values",
                    sum.len(),
                    part.len()
                )));
            }
            for (acc, v) in sum.iter_mut().zip(part) {
                *acc += v;
            }
        }
        Ok(sum)
    }
}

/// The trivial group of one process.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialGroup;

impl SerialGroup {
    /// A shared handle to the serial group.
    pub fn handle() -> GroupHandle {
        Arc::new(SerialGroup)
    }
}

impl ProcessGroup for SerialGroup {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn all_gather_sizes(&self, values: &[usize]) -> Result<Vec<Vec<usize>>> {
        Ok(vec![values.to_vec()])
    }

    fn all_gather_scalars(&self, values: &[f64]) -> Result<Vec<Vec<f64>>> {
        Ok(vec![values.to_vec()])
    }

    fn all_gather_indexed(&self, values: &[(usize, f64)]) -> Result<Vec<Vec<(usize, f64)>>> {
        Ok(vec![values.to_vec()])
    }

    fn all_gather_entries(&self, entries: &[Entry]) -> Result<Vec<Vec<Entry>>> {
        Ok(vec![entries.to_vec()])
    }
}
