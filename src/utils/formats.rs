//! Utilities for converting matrices into `ndarray` views

use ndarray::Array2;

use crate::error::Result;
use crate::matrix::Matrix;

/// Expands the rows owned by `rank` into a dense array (owned rows × all columns).
///
/// Rows appear in the order of the matrix's row layout, so for a serial matrix
/// the result is the whole matrix. Intended for inspection and tests; every
/// entry goes through `get_value`.
pub fn local_dense(matrix: &dyn Matrix, rank: usize) -> Result<Array2<f64>> {
    let layout = matrix.row_layout();
    let (_, n_cols) = matrix.size();
    let rows: Vec<usize> = layout.global_indices(rank).collect();

    let mut dense = Array2::zeros((rows.len(), n_cols));
    for (r, &row) in rows.iter().enumerate() {
        for col in 0..n_cols {
            dense[[r, col]] = matrix.get_value(row, col)?;
        }
    }
    Ok(dense)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::AijMatrix;
    use ndarray::array;

    #[test]
    fn test_aij_to_dense() {
        let matrix =
            AijMatrix::from_triplets(2, 3, &[(0, 1, 2.0), (1, 0, -1.0), (1, 2, 4.0)]).unwrap();
        let dense = local_dense(&matrix, 0).unwrap();
        assert_eq!(dense, array![[0.0, 2.0, 0.0], [-1.0, 0.0, 4.0]]);
    }
}
