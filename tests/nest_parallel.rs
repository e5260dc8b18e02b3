//! Multi-rank tests: every rank runs on its own thread of a `ThreadGroup`

use std::sync::Arc;

use nestmat::{
    handle, AijMatrix, ConfigurationError, DenseMatrix, DistVector, GroupHandle, Layout, Matrix, MatrixError,
    MatrixHandle, NestedMatrix, ThreadGroup,
};

/// Runs `f` once per rank and collects the results in rank order.
fn run_ranks<T, F>(size: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(GroupHandle) -> T + Sync,
{
    let groups = ThreadGroup::create(size);
    std::thread::scope(|s| {
        let handles: Vec<_> = groups
            .into_iter()
            .map(|g| {
                let f = &f;
                s.spawn(move || f(g))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

/// diag(I_4, I_2) with two rows of each block per rank
fn identity_nest(group: &GroupHandle) -> NestedMatrix {
    let a = AijMatrix::identity_in(Arc::clone(group), 2).unwrap();
    let b = AijMatrix::identity_in(Arc::clone(group), 1).unwrap();
    let blocks: Vec<Option<MatrixHandle>> = vec![Some(handle(a)), None, None, Some(handle(b))];
    NestedMatrix::create(Arc::clone(group), 2, 2, blocks).unwrap()
}

#[test]
fn test_composite_layout_interleaves_blocks() {
    let owned = run_ranks(2, |g| {
        let nest = identity_nest(&g);
        assert_eq!(nest.size(), (6, 6));
        assert_eq!(nest.local_size(), (3, 3));
        nest.row_layout().owned(g.rank()).to_vec()
    });

    // Each rank owns its slice of every block row
    assert_eq!(owned[0], vec![0..2, 4..5]);
    assert_eq!(owned[1], vec![2..4, 5..6]);
}

#[test]
fn test_multiply_with_nest_vectors() {
    let results = run_ranks(2, |g| {
        let mut nest = identity_nest(&g);
        let (x, mut y) = nest.create_vecs();
        let x = DistVector::from_global(
            Arc::clone(&g),
            Arc::clone(x.layout()),
            &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
        )
        .unwrap();

        nest.multiply(&x, &mut y).unwrap();
        (y.local().to_vec(), y.to_global().unwrap())
    });

    assert_eq!(results[0].0, vec![1.0, 2.0, 5.0]);
    assert_eq!(results[1].0, vec![3.0, 4.0, 6.0]);
    for (_, global) in results {
        assert_eq!(global, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }
}

#[test]
fn test_multiply_with_contiguous_vectors() {
    let results = run_ranks(2, |g| {
        let mut nest = identity_nest(&g);

        // Rank-contiguous vectors are not the nest's own layout
        let layout = Arc::new(Layout::contiguous(g.as_ref(), 3).unwrap());
        assert_ne!(*nest.row_layout(), *layout);

        let global = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let x = DistVector::from_global(Arc::clone(&g), Arc::clone(&layout), &global).unwrap();
        let mut y = DistVector::create(Arc::clone(&g), layout);

        nest.multiply(&x, &mut y).unwrap();
        (y.local().to_vec(), y.to_global().unwrap())
    });

    assert_eq!(results[0].0, vec![1.0, 2.0, 3.0]);
    assert_eq!(results[1].0, vec![4.0, 5.0, 6.0]);
    assert_eq!(results[0].1, results[1].1);
}

#[test]
fn test_off_process_values_reach_their_owner() {
    let results = run_ranks(2, |g| {
        let a = AijMatrix::identity_in(Arc::clone(&g), 2).unwrap();
        let c = AijMatrix::create(Arc::clone(&g), 2, 1).unwrap();
        let b = AijMatrix::identity_in(Arc::clone(&g), 1).unwrap();
        let blocks: Vec<Option<MatrixHandle>> =
            vec![Some(handle(a)), Some(handle(c)), None, Some(handle(b))];
        let mut nest = NestedMatrix::create(Arc::clone(&g), 2, 2, blocks).unwrap();

        // Row 3 belongs to rank 1; rank 0 writes it
        if g.rank() == 0 {
            nest.set_value(3, 4, 7.0).unwrap();
        }
        nest.assembly_begin().unwrap();
        assert!(nest.assembly_end().unwrap());

        let value = nest.get_value(3, 4);

        let (mut x, mut y) = nest.create_vecs();
        x.set_all(1.0);
        nest.multiply(&x, &mut y).unwrap();
        let product = y.to_global().unwrap();

        let (mut xt, mut yt) = (y.zeros_like(), x.zeros_like());
        xt.set_all(1.0);
        nest.multiply_transpose(&xt, &mut yt).unwrap();
        let transposed = yt.to_global().unwrap();

        (value, product, transposed)
    });

    assert!(matches!(results[0].0, Err(MatrixError::NonLocalAccess { row: 3, rank: 0, .. })));
    assert_eq!(results[1].0, Ok(7.0));
    for (_, product, transposed) in &results {
        assert_eq!(product, &vec![1.0, 1.0, 1.0, 8.0, 1.0, 1.0]);
        assert_eq!(transposed, &vec![1.0, 1.0, 1.0, 1.0, 8.0, 1.0]);
    }
}

#[test]
fn test_uneven_ranks_with_dense_block() {
    let results = run_ranks(3, |g| {
        let local_a = [2, 0, 1][g.rank()];
        let a = AijMatrix::identity_in(Arc::clone(&g), local_a).unwrap();

        let mut d = DenseMatrix::create(Arc::clone(&g), 1, 1).unwrap();
        d.set_value(g.rank(), g.rank(), 2.0).unwrap();

        let blocks: Vec<Option<MatrixHandle>> = vec![Some(handle(a)), None, None, Some(handle(d))];
        let mut nest = NestedMatrix::create(Arc::clone(&g), 2, 2, blocks).unwrap();
        nest.assembly_begin().unwrap();
        nest.assembly_end().unwrap();

        let (mut x, mut y) = nest.create_vecs();
        x.set_all(1.0);
        nest.multiply(&x, &mut y).unwrap();
        (nest.local_size(), y.to_global().unwrap())
    });

    assert_eq!(results[0].0, (3, 3));
    assert_eq!(results[1].0, (1, 1));
    assert_eq!(results[2].0, (2, 2));
    for (_, global) in results {
        assert_eq!(global, vec![1.0, 1.0, 1.0, 2.0, 2.0, 2.0]);
    }
}

#[test]
fn test_distribution_mismatch_is_detected() {
    let results = run_ranks(2, |g| {
        // Same extent (4 rows), split 2/2 in one block and 3/1 in the other
        let a = AijMatrix::create(Arc::clone(&g), 2, 2).unwrap();
        let c = AijMatrix::create(Arc::clone(&g), [3, 1][g.rank()], 1).unwrap();
        let blocks: Vec<Option<MatrixHandle>> = vec![Some(handle(a)), Some(handle(c))];
        NestedMatrix::create(Arc::clone(&g), 1, 2, blocks).map(|_| ())
    });

    for result in results {
        assert!(matches!(result, Err(MatrixError::Configuration(_))));
    }
}

#[test]
fn test_serial_block_in_parallel_nest_is_rejected() {
    let results = run_ranks(2, |g| {
        // `identity` lays the block out on a single rank
        let blocks: Vec<Option<MatrixHandle>> = vec![Some(handle(AijMatrix::identity(2)))];
        NestedMatrix::create(Arc::clone(&g), 1, 1, blocks).map(|_| ())
    });

    for result in results {
        assert_eq!(
            result,
            Err(MatrixError::Configuration(ConfigurationError::GroupMismatch {
                row: 0,
                col: 0,
                ranks: 1,
                group_size: 2,
            }))
        );
    }
}
