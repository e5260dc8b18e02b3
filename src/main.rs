use nestmat::{handle, local_dense, AijMatrix, Matrix, NestedMatrix, SerialGroup};
use tracing::info;
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

/// Logs to stdout, honouring `RUST_LOG` (default level: info).
fn init_subscriber() {
    let filter_layer = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer().with_target(true))
        .init();
}

/// 1D Laplacian stencil on `n` points.
fn laplacian(n: usize) -> nestmat::Result<AijMatrix> {
    let mut triplets = Vec::new();
    for i in 0..n {
        triplets.push((i, i, 2.0));
        if i > 0 {
            triplets.push((i, i - 1, -1.0));
        }
        if i + 1 < n {
            triplets.push((i, i + 1, -1.0));
        }
    }
    AijMatrix::from_triplets(n, n, &triplets)
}

fn main() -> nestmat::Result<()> {
    init_subscriber();
    println!("nestmat {}: nested block matrices", nestmat::VERSION);

    // Saddle-point system [A Bᵀ; B 0] with 4 velocity and 2 pressure unknowns
    let a = laplacian(4)?;
    let b = AijMatrix::from_triplets(
        2,
        4,
        &[(0, 0, -1.0), (0, 1, 1.0), (1, 2, -1.0), (1, 3, 1.0)],
    )?;
    let bt = AijMatrix::from_sprs(b.to_sprs().transpose_into());

    let mut nest = NestedMatrix::from_rows(
        SerialGroup::handle(),
        vec![
            vec![Some(handle(a)), Some(handle(bt))],
            vec![Some(handle(b)), None],
        ],
    )?;
    nest.assembly_begin()?;
    nest.assembly_end()?;

    println!("\n{}", nest);

    let (mut x, mut y) = nest.create_vecs();
    x.set_all(1.0);
    nest.multiply(&x, &mut y)?;
    info!(norm = y.norm()?, "multiplied by ones");
    println!("A * ones = {:?}", y.to_global()?);

    println!("\nDense view:");
    let dense = local_dense(&nest, 0)?;
    for row in dense.rows() {
        let cells: Vec<String> = row.iter().map(|v| format!("{:5.1}", v)).collect();
        println!("  [{}]", cells.join(" "));
    }

    Ok(())
}
