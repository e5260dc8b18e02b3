//! Utility functions and helpers

pub mod formats;

pub use formats::local_dense;

/// Computes an exclusive prefix sum (scan) for a vector
pub fn exclusive_scan(input: &[usize]) -> Vec<usize> {
    let mut result = Vec::with_capacity(input.len() + 1);
    let mut sum = 0;

    result.push(0); // First element is always 0

    for &val in input {
        sum += val;
        result.push(sum);
    }

    result
}

/// Finds the block holding `index`, given the offsets from [`exclusive_scan`].
///
/// Returns `(block, index - offsets[block])`. Empty blocks are skipped, so the
/// block found always has a non-zero extent. Runs in O(log n).
pub fn locate_block(offsets: &[usize], index: usize) -> Option<(usize, usize)> {
    let total = *offsets.last()?;
    if index >= total {
        return None;
    }
    // Last block whose offset is <= index
    let block = offsets.partition_point(|&o| o <= index) - 1;
    Some((block, index - offsets[block]))
}
