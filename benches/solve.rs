use std::sync::Arc;

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use paraspec::config::{CgVariant, Discretization};
use paraspec::mesh::{self, Mesh};
use paraspec::operator::{EllipticOperator, PdeOperator, SineSolution};
use paraspec::parallel::SerialComm;
use paraspec::preconditioner::JacobiPrecon;
use paraspec::solver::PcgSolver;

fn build_operator(nx: usize, degree: usize, disc: Discretization) -> EllipticOperator<SerialComm> {
    let mut mesh = Mesh::box_2d(&SerialComm, nx, nx, degree);
    mesh::connect(&mut mesh, &SerialComm).unwrap();
    EllipticOperator::setup(mesh, &SineSolution::new(1.0), 1.0, disc, Arc::new(SerialComm)).unwrap()
}

fn bench_operator_apply(c: &mut Criterion) {
    #[cfg(feature = "rayon")]
    paraspec::kernels::CpuKernels::init_thread_pool();
    let mut group = c.benchmark_group("operator_apply");
    for (name, disc) in [
        ("continuous", Discretization::Continuous),
        ("ipdg", Discretization::Ipdg),
    ] {
        let mut op = build_operator(16, 4, disc);
        let x = op.interpolate(|px, py| (px * 3.0).sin() * py);
        let mut ax = vec![0.0; op.len()];
        group.bench_function(name, |b| {
            b.iter(|| {
                op.apply(black_box(&x), &mut ax).unwrap();
                black_box(&ax);
            })
        });
    }
    group.finish();
}

fn bench_pcg_solve(c: &mut Criterion) {
    let physics = SineSolution::new(1.0);
    c.bench_function("pcg_solve_deg4_16x16", |b| {
        b.iter(|| {
            let mut op = build_operator(16, 4, Discretization::Continuous);
            let rhs = op.assemble_rhs(&physics).unwrap();
            let precon = JacobiPrecon::from_diagonal(&op.diagonal().unwrap()).unwrap();
            let mut solver =
                PcgSolver::new(Arc::new(SerialComm), op.dot_weights(), 1e-8, 2000)
                    .with_variant(CgVariant::Pcg)
                    .with_preconditioner(Box::new(precon));
            let mut x = vec![0.0; op.len()];
            solver.solve(&mut op, &rhs, &mut x).unwrap();
            black_box(x)
        })
    });
}

criterion_group!(benches, bench_operator_apply, bench_pcg_solve);
criterion_main!(benches);
