//! Property tests: a nest behaves like the dense matrix it describes

use nestmat::{handle, local_dense, AijMatrix, DistVector, Matrix, MatrixHandle, NestedMatrix, SerialGroup};
use proptest::{prelude::*, test_runner::Config};

/// Small integer entries keep every product exact in f64.
fn entry(seed: u64, i: usize, j: usize) -> f64 {
    let h = seed
        .wrapping_mul(6364136223846793005)
        .wrapping_add((i * 31 + j * 17) as u64)
        .rotate_left(17);
    (h % 7) as f64 - 3.0
}

/// A grid with the given block extents; `present[i * nc + j]` selects cells,
/// and every block row and column is forced to hold at least one block.
fn build_grid(
    row_sizes: &[usize],
    col_sizes: &[usize],
    present: &[bool],
    seed: u64,
) -> (Vec<Option<MatrixHandle>>, Vec<bool>) {
    let (nr, nc) = (row_sizes.len(), col_sizes.len());
    let mut mask: Vec<bool> = (0..nr * nc).map(|k| present[k % present.len()]).collect();
    for i in 0..nr {
        mask[i * nc + i % nc] = true;
    }
    for j in 0..nc {
        mask[(j % nr) * nc + j] = true;
    }

    let blocks = (0..nr * nc)
        .map(|k| {
            if !mask[k] {
                return None;
            }
            let (bi, bj) = (k / nc, k % nc);
            let mut triplets = Vec::new();
            for r in 0..row_sizes[bi] {
                for c in 0..col_sizes[bj] {
                    let v = entry(seed, 100 * bi + r, 100 * bj + c);
                    if v != 0.0 {
                        triplets.push((r, c, v));
                    }
                }
            }
            let block = AijMatrix::from_triplets(row_sizes[bi], col_sizes[bj], &triplets).unwrap();
            Some(handle(block))
        })
        .collect();
    (blocks, mask)
}

proptest! {
    #![proptest_config(Config {
        cases: 64,
        ..Default::default()
    })]

    #[test]
    fn multiply_matches_dense_view(
        row_sizes in prop::collection::vec(1usize..5, 1..4),
        col_sizes in prop::collection::vec(1usize..5, 1..4),
        present in prop::collection::vec(any::<bool>(), 1..16),
        seed in any::<u64>(),
    ) {
        let (blocks, _) = build_grid(&row_sizes, &col_sizes, &present, seed);
        let mut nest = NestedMatrix::create(
            SerialGroup::handle(),
            row_sizes.len(),
            col_sizes.len(),
            blocks,
        )
        .unwrap();

        let (n_rows, n_cols) = nest.size();
        prop_assert_eq!(n_rows, row_sizes.iter().sum::<usize>());
        prop_assert_eq!(n_cols, col_sizes.iter().sum::<usize>());

        let x: Vec<f64> = (0..n_cols).map(|j| entry(seed ^ 0xA5A5, j, 0)).collect();
        let mut y = DistVector::serial(vec![0.0; n_rows]);
        nest.multiply(&DistVector::serial(x.clone()), &mut y).unwrap();

        let dense = local_dense(&nest, 0).unwrap();
        for i in 0..n_rows {
            let expected: f64 = (0..n_cols).map(|j| dense[[i, j]] * x[j]).sum();
            prop_assert_eq!(y.local()[i], expected);
        }
    }

    #[test]
    fn absent_blocks_read_as_zero(
        row_sizes in prop::collection::vec(1usize..4, 1..4),
        col_sizes in prop::collection::vec(1usize..4, 1..4),
        present in prop::collection::vec(any::<bool>(), 1..16),
        seed in any::<u64>(),
    ) {
        let (blocks, mask) = build_grid(&row_sizes, &col_sizes, &present, seed);
        let nc = col_sizes.len();
        let nest = NestedMatrix::create(SerialGroup::handle(), row_sizes.len(), nc, blocks).unwrap();

        let row_offsets = nest.block_layout().row_offsets().to_vec();
        let col_offsets = nest.block_layout().col_offsets().to_vec();
        for (k, &is_present) in mask.iter().enumerate() {
            let (bi, bj) = (k / nc, k % nc);
            for r in row_offsets[bi]..row_offsets[bi + 1] {
                for c in col_offsets[bj]..col_offsets[bj + 1] {
                    let value = nest.get_value(r, c).unwrap();
                    if is_present {
                        let expected = entry(seed, 100 * bi + r - row_offsets[bi], 100 * bj + c - col_offsets[bj]);
                        prop_assert_eq!(value, expected);
                    } else {
                        prop_assert_eq!(value, 0.0);
                    }
                }
            }
        }
    }

    #[test]
    fn set_then_get_round_trips(
        row_sizes in prop::collection::vec(1usize..4, 1..4),
        col_sizes in prop::collection::vec(1usize..4, 1..4),
        present in prop::collection::vec(any::<bool>(), 1..16),
        value in -1.0e6f64..1.0e6,
        pick in any::<prop::sample::Index>(),
    ) {
        let (blocks, mask) = build_grid(&row_sizes, &col_sizes, &present, 7);
        let nc = col_sizes.len();
        let mut nest = NestedMatrix::create(SerialGroup::handle(), row_sizes.len(), nc, blocks).unwrap();

        let (n_rows, n_cols) = nest.size();
        let cell = pick.index(n_rows * n_cols);
        let (row, col) = (cell / n_cols, cell % n_cols);
        let bi = nest.block_layout().row_offsets().partition_point(|&o| o <= row) - 1;
        let bj = nest.block_layout().col_offsets().partition_point(|&o| o <= col) - 1;

        let result = nest.set_value(row, col, value);
        if mask[bi * nc + bj] {
            prop_assert!(result.is_ok());
            prop_assert_eq!(nest.get_value(row, col).unwrap(), value);
        } else {
            prop_assert!(result.is_err());
            prop_assert_eq!(nest.get_value(row, col).unwrap(), 0.0);
        }
    }
}
