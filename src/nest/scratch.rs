//! Staging vectors for nested multiplies.

use std::sync::Arc;

use tracing::debug;

use crate::comm::GroupHandle;
use crate::nest::layout::BlockLayout;
use crate::vector::DistVector;

/// One vector per block row and one per block column, each distributed like
/// the blocks of its line.
///
/// Built from a [`BlockLayout`]; a nest drops its scratch whenever the layout
/// changes, since vectors sized for the old grid would silently misroute.
#[derive(Debug)]
pub struct ScratchVectors {
    rows: Vec<DistVector>,
    cols: Vec<DistVector>,
}

impl ScratchVectors {
    pub fn create(group: &GroupHandle, layout: &BlockLayout) -> Self {
        debug!(
            nr = layout.nr(),
            nc = layout.nc(),
            "nest: allocating scratch vectors"
        );
        let rows = (0..layout.nr())
            .map(|i| DistVector::create(Arc::clone(group), Arc::clone(layout.row_layout(i))))
            .collect();
        let cols = (0..layout.nc())
            .map(|j| DistVector::create(Arc::clone(group), Arc::clone(layout.col_layout(j))))
            .collect();
        Self { rows, cols }
    }

    /// Row and column vectors, borrowed together.
    pub fn split_mut(&mut self) -> (&mut [DistVector], &mut [DistVector]) {
        (&mut self.rows, &mut self.cols)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SerialGroup;
    use crate::matrix::{handle, AijMatrix, MatrixHandle, NestConfig};

    #[test]
    fn test_sizes_follow_layout() {
        let blocks: Vec<Option<MatrixHandle>> = vec![
            Some(handle(AijMatrix::zeros(2, 4))),
            Some(handle(AijMatrix::zeros(2, 1))),
        ];
        let layout =
            BlockLayout::compute(&SerialGroup, 1, 2, &blocks, &NestConfig::default()).unwrap();
        let mut scratch = ScratchVectors::create(&SerialGroup::handle(), &layout);
        let (rows, cols) = scratch.split_mut();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].len(), 2);
        assert_eq!(cols[0].len(), 4);
        assert_eq!(cols[1].local_len(), 1);
    }
}
