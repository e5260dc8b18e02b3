//! Distributed vectors, their layouts and index sets

mod index_set;
mod layout;

pub use index_set::IndexSet;
pub use layout::Layout;

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use crate::comm::{GroupHandle, SerialGroup};
use crate::error::{MatrixError, Result};

/// A vector distributed over a process group.
///
/// Each rank stores the entries its [`Layout`] assigns to it, in layout order.
/// Operations that need values from other ranks are collective and say so.
#[derive(Clone)]
pub struct DistVector {
    group: GroupHandle,
    layout: Arc<Layout>,
    values: Vec<f64>,
}

impl DistVector {
    /// Creates a zero vector with the given layout.
    pub fn create(group: GroupHandle, layout: Arc<Layout>) -> Self {
        let n = layout.local_size(group.rank());
        Self {
            group,
            layout,
            values: vec![0.0; n],
        }
    }

    /// Wraps this rank's owned values.
    pub fn from_local(group: GroupHandle, layout: Arc<Layout>, values: Vec<f64>) -> Result<Self> {
        let expected = layout.local_size(group.rank());
        if values.len() != expected {
            return Err(MatrixError::LayoutMismatch {
                expected,
                actual: values.len(),
            });
        }
        Ok(Self {
            group,
            layout,
            values,
        })
    }

    /// Picks this rank's owned entries out of a full, replicated vector.
    pub fn from_global(group: GroupHandle, layout: Arc<Layout>, global: &[f64]) -> Result<Self> {
        if global.len() != layout.global_size() {
            return Err(MatrixError::LayoutMismatch {
                expected: layout.global_size(),
                actual: global.len(),
            });
        }
        let values = layout.global_indices(group.rank()).map(|g| global[g]).collect();
        Ok(Self {
            group,
            layout,
            values,
        })
    }

    /// A vector on the serial group owning all of `values`.
    pub fn serial(values: Vec<f64>) -> Self {
        let layout = Arc::new(Layout::serial(values.len()));
        Self {
            group: SerialGroup::handle(),
            layout,
            values,
        }
    }

    /// A zero vector with the same group and layout.
    pub fn zeros_like(&self) -> Self {
        Self::create(Arc::clone(&self.group), Arc::clone(&self.layout))
    }

    pub fn group(&self) -> &GroupHandle {
        &self.group
    }

    pub fn layout(&self) -> &Arc<Layout> {
        &self.layout
    }

    /// Global length.
    pub fn len(&self) -> usize {
        self.layout.global_size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of entries stored on this rank.
    pub fn local_len(&self) -> usize {
        self.values.len()
    }

    pub fn local(&self) -> &[f64] {
        &self.values
    }

    pub fn local_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    /// A slice of local storage.
    pub fn slice(&self, range: Range<usize>) -> Result<&[f64]> {
        if range.end > self.values.len() || range.start > range.end {
            return Err(MatrixError::LayoutMismatch {
                expected: self.values.len(),
                actual: range.end,
            });
        }
        Ok(&self.values[range])
    }

    /// Whether `other` is distributed exactly like `self`.
    pub fn same_layout(&self, other: &Layout) -> bool {
        std::ptr::eq(Arc::as_ptr(&self.layout), other) || *self.layout == *other
    }

    pub fn set_all(&mut self, value: f64) {
        self.values.iter_mut().for_each(|v| *v = value);
    }

    pub fn scale(&mut self, alpha: f64) {
        self.values.iter_mut().for_each(|v| *v *= alpha);
    }

    /// `self += alpha * x`; both vectors must share a layout.
    pub fn axpy(&mut self, alpha: f64, x: &DistVector) -> Result<()> {
        if !self.same_layout(&x.layout) {
            return Err(MatrixError::LayoutMismatch {
                expected: self.local_len(),
                actual: x.local_len(),
            });
        }
        for (y, &xv) in self.values.iter_mut().zip(&x.values) {
            *y += alpha * xv;
        }
        Ok(())
    }

    /// Collective dot product.
    pub fn dot(&self, other: &DistVector) -> Result<f64> {
        if !self.same_layout(&other.layout) {
            return Err(MatrixError::LayoutMismatch {
                expected: self.local_len(),
                actual: other.local_len(),
            });
        }
        let local: f64 = self.values.iter().zip(&other.values).map(|(a, b)| a * b).sum();
        Ok(self.group.all_sum(&[local])?[0])
    }

    /// Collective Euclidean norm.
    pub fn norm(&self) -> Result<f64> {
        self.dot(self).map(f64::sqrt)
    }

    /// Collective: the full vector in global order, replicated on every rank.
    pub fn to_global(&self) -> Result<Vec<f64>> {
        let gathered = self.group.all_gather_scalars(&self.values)?;
        let mut global = vec![0.0; self.len()];
        for (rank, values) in gathered.iter().enumerate() {
            for (g, &v) in self.layout.global_indices(rank).zip(values) {
                global[g] = v;
            }
        }
        Ok(global)
    }

    /// Collective scatter: entry `k` of the result (numbered by `target`) is
    /// entry `is.get(k)` of `self`.
    ///
    /// Every rank contributes its values to an all-gather, then keeps the
    /// entries its part of `target` needs.
    pub fn scatter(&self, is: &IndexSet, target: Arc<Layout>) -> Result<DistVector> {
        if is.len() != target.global_size() {
            return Err(MatrixError::LayoutMismatch {
                expected: target.global_size(),
                actual: is.len(),
            });
        }

        let gathered = self.group.all_gather_scalars(&self.values)?;
        let rank = self.group.rank();
        let mut values = Vec::with_capacity(target.local_size(rank));
        for k in target.global_indices(rank) {
            let g = is.get(k);
            let (owner, pos) = self.layout.owner_of(g).ok_or(MatrixError::IndexOutOfRange {
                axis: crate::Axis::Row,
                index: g,
                extent: self.len(),
            })?;
            values.push(gathered[owner][pos]);
        }

        Ok(DistVector {
            group: Arc::clone(&self.group),
            layout: target,
            values,
        })
    }

    /// Collective additive gather: entry `k` of `source` is added into entry
    /// `is.get(k)` of `self`. Contributions to the same entry sum.
    pub fn gather_add(&mut self, source: &DistVector, is: &IndexSet) -> Result<()> {
        if is.len() != source.len() {
            return Err(MatrixError::LayoutMismatch {
                expected: source.len(),
                actual: is.len(),
            });
        }

        let rank = self.group.rank();
        let outgoing: Vec<(usize, f64)> = source
            .layout
            .global_indices(rank)
            .zip(&source.values)
            .map(|(k, &v)| (is.get(k), v))
            .collect();

        for incoming in self.group.all_gather_indexed(&outgoing)? {
            for (g, v) in incoming {
                if g >= self.len() {
                    return Err(MatrixError::IndexOutOfRange {
                        axis: crate::Axis::Row,
                        index: g,
                        extent: self.len(),
                    });
                }
                if let Some(pos) = self.layout.local_position(rank, g) {
                    self.values[pos] += v;
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for DistVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistVector")
            .field("rank", &self.group.rank())
            .field("global_len", &self.len())
            .field("local", &self.values)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_arithmetic() {
        let mut y = DistVector::serial(vec![1.0, 2.0, 3.0]);
        let x = DistVector::serial(vec![1.0, 1.0, 1.0]);
        y.axpy(2.0, &x).unwrap();
        assert_eq!(y.local(), &[3.0, 4.0, 5.0]);
        assert_eq!(y.dot(&x).unwrap(), 12.0);
        assert_eq!(y.slice(1..3).unwrap(), &[4.0, 5.0]);
    }

    #[test]
    fn test_serial_scatter_and_gather() {
        let x = DistVector::serial(vec![10.0, 11.0, 12.0, 13.0, 14.0]);
        let is = IndexSet::contiguous(2, 3);
        let part = x.scatter(&is, Arc::new(Layout::serial(3))).unwrap();
        assert_eq!(part.local(), &[12.0, 13.0, 14.0]);

        let mut y = DistVector::serial(vec![1.0; 5]);
        y.gather_add(&part, &is).unwrap();
        y.gather_add(&part, &is).unwrap();
        assert_eq!(y.local(), &[1.0, 1.0, 25.0, 27.0, 29.0]);
    }

    #[test]
    fn test_scatter_through_general_set() {
        let x = DistVector::serial(vec![10.0, 11.0, 12.0, 13.0]);
        let is = IndexSet::General(vec![3, 0, 2]);
        let part = x.scatter(&is, Arc::new(Layout::serial(3))).unwrap();
        assert_eq!(part.local(), &[13.0, 10.0, 12.0]);

        let mut y = DistVector::serial(vec![0.0; 4]);
        y.gather_add(&part, &is).unwrap();
        assert_eq!(y.local(), &[10.0, 0.0, 12.0, 13.0]);
    }

    #[test]
    fn test_mismatched_layout_is_rejected() {
        let mut y = DistVector::serial(vec![0.0; 3]);
        let x = DistVector::serial(vec![0.0; 4]);
        assert!(matches!(y.axpy(1.0, &x), Err(MatrixError::LayoutMismatch { .. })));
    }
}
