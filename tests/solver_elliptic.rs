//! End-to-end elliptic solves, serial and multi-rank.

use std::sync::Arc;

use paraspec::config::{CgVariant, Discretization, Settings};
use paraspec::mesh::{self, Mesh};
use paraspec::operator::{EllipticOperator, PdeOperator, SineSolution};
use paraspec::parallel::thread_comm::spawn_ranks;
use paraspec::parallel::{Comm, SerialComm};
use paraspec::preconditioner::JacobiPrecon;
use paraspec::solver::{initial_guess_from_settings, PcgSolver, ProjectedSolver, SolveReport};

fn serial_operator(
    nx: usize,
    degree: usize,
    lambda: f64,
    disc: Discretization,
) -> EllipticOperator<SerialComm> {
    let mut mesh = Mesh::box_2d(&SerialComm, nx, nx, degree);
    mesh::connect(&mut mesh, &SerialComm).unwrap();
    EllipticOperator::setup(mesh, &SineSolution::new(lambda), lambda, disc, Arc::new(SerialComm))
        .unwrap()
}

fn max_abs_diff(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f64::max)
}

#[test]
fn pcg_converges_to_the_manufactured_solution() {
    let physics = SineSolution::new(1.0);
    let mut op = serial_operator(6, 5, 1.0, Discretization::Continuous);
    let b = op.assemble_rhs(&physics).unwrap();
    let exact = op.interpolate(|x, y| physics.exact(x, y));

    let precon = JacobiPrecon::from_diagonal(&op.diagonal().unwrap()).unwrap();
    let mut solver = PcgSolver::new(Arc::new(SerialComm), op.dot_weights(), 1e-10, 2000)
        .with_variant(CgVariant::Pcg)
        .with_preconditioner(Box::new(precon));

    let mut x = vec![0.0; op.len()];
    let stats = solver.solve(&mut op, &b, &mut x).unwrap();
    assert!(stats.converged(), "stalled at {}", stats.final_residual);
    assert!(stats.report.contains(SolveReport::PRECONDITIONED));

    // Degree 5 on a 6x6 box resolves the sine to well below 1e-4.
    let err = max_abs_diff(&x, &exact);
    assert!(err < 1e-4, "solution error {err}");
}

#[test]
fn cg_inverts_its_own_operator_exactly() {
    // Manufactured linear-algebra problem: b = A u for a known u, so the
    // solve must recover u to solver tolerance with no discretization
    // error in the comparison.
    for disc in [Discretization::Continuous, Discretization::Ipdg] {
        let mut op = serial_operator(4, 3, 0.8, disc);
        let u = op.interpolate(|x, y| x * (1.0 - x) * (0.5 + y * y));
        let mut b = vec![0.0; op.len()];
        op.apply(&u, &mut b).unwrap();

        let precon = JacobiPrecon::from_diagonal(&op.diagonal().unwrap()).unwrap();
        let mut solver = PcgSolver::new(Arc::new(SerialComm), op.dot_weights(), 1e-12, 3000)
            .with_variant(CgVariant::Pcg)
            .with_preconditioner(Box::new(precon));
        let mut x = vec![0.0; op.len()];
        let stats = solver.solve(&mut op, &b, &mut x).unwrap();
        assert!(stats.converged(), "{disc:?} stalled");

        // Continuous solves match only in the unmasked interior; the
        // masked rows carry u's boundary values through b directly.
        let err = max_abs_diff(&x, &u);
        assert!(err < 1e-7, "{disc:?} error {err}");
    }
}

#[test]
fn flexible_pcg_matches_pcg_with_a_fixed_preconditioner() {
    let physics = SineSolution::new(0.3);
    let mut results = Vec::new();
    for variant in [CgVariant::Pcg, CgVariant::FlexPcg] {
        let mut op = serial_operator(4, 4, 0.3, Discretization::Continuous);
        let b = op.assemble_rhs(&physics).unwrap();
        let precon = JacobiPrecon::from_diagonal(&op.diagonal().unwrap()).unwrap();
        let mut solver = PcgSolver::new(Arc::new(SerialComm), op.dot_weights(), 1e-9, 1000)
            .with_variant(variant)
            .with_preconditioner(Box::new(precon));
        let mut x = vec![0.0; op.len()];
        let stats = solver.solve(&mut op, &b, &mut x).unwrap();
        assert!(stats.converged());
        results.push((stats.iterations, x));
    }
    // With a constant preconditioner the two recurrences are equivalent.
    let diff = max_abs_diff(&results[0].1, &results[1].1);
    assert!(diff < 1e-6, "variants diverged by {diff}");
}

#[test]
fn classic_projection_absorbs_a_repeated_solve() {
    let physics = SineSolution::new(1.0);
    let mut op = serial_operator(4, 3, 1.0, Discretization::Continuous);
    let b = op.assemble_rhs(&physics).unwrap();

    let mut settings = Settings::new();
    settings.set("INITIAL GUESS STRATEGY", "CLASSIC");
    let comm = Arc::new(SerialComm);
    let guess = initial_guess_from_settings(&settings, comm.clone(), op.dot_weights()).unwrap();
    let solver = PcgSolver::new(comm, op.dot_weights(), 1e-9, 1000);
    let mut projected = ProjectedSolver::new(solver, guess);

    let mut x = vec![0.0; op.len()];
    let first = projected.solve(&mut op, &b, &mut x).unwrap();
    assert!(first.converged());
    assert!(first.iterations > 0);
    assert!(first.report.contains(SolveReport::PROJECTED_GUESS));

    let mut x2 = vec![0.0; op.len()];
    let second = projected.solve(&mut op, &b, &mut x2).unwrap();
    assert!(second.converged());
    assert!(
        second.iterations <= 1,
        "repeat solve took {} iterations",
        second.iterations
    );
}

#[test]
fn none_and_zero_guesses_agree_from_a_zero_start() {
    let physics = SineSolution::new(1.0);
    let mut solutions = Vec::new();
    for strategy in ["NONE", "ZERO"] {
        let mut op = serial_operator(3, 3, 1.0, Discretization::Continuous);
        let b = op.assemble_rhs(&physics).unwrap();
        let mut settings = Settings::new();
        settings.set("INITIAL GUESS STRATEGY", strategy);
        let comm = Arc::new(SerialComm);
        let guess = initial_guess_from_settings(&settings, comm.clone(), op.dot_weights()).unwrap();
        let solver = PcgSolver::new(comm, op.dot_weights(), 1e-10, 1000);
        let mut projected = ProjectedSolver::new(solver, guess);
        let mut x = vec![0.0; op.len()];
        projected.solve(&mut op, &b, &mut x).unwrap();
        solutions.push(x);
    }
    assert!(max_abs_diff(&solutions[0], &solutions[1]) < 1e-12);
}

#[test]
fn four_rank_solve_agrees_with_serial() {
    let degree = 3;
    let nx = 6;
    let lambda = 1.0;

    // Serial reference.
    let physics = SineSolution::new(lambda);
    let mut serial_op = serial_operator(nx, degree, lambda, Discretization::Continuous);
    let b = serial_op.assemble_rhs(&physics).unwrap();
    let mut reference = vec![0.0; serial_op.len()];
    let precon = JacobiPrecon::from_diagonal(&serial_op.diagonal().unwrap()).unwrap();
    let mut solver = PcgSolver::new(Arc::new(SerialComm), serial_op.dot_weights(), 1e-10, 2000)
        .with_variant(CgVariant::Pcg)
        .with_preconditioner(Box::new(precon));
    let serial_stats = solver.solve(&mut serial_op, &b, &mut reference).unwrap();
    assert!(serial_stats.converged());
    let exact = serial_op.interpolate(|x, y| physics.exact(x, y));
    let serial_err = max_abs_diff(&reference, &exact);

    // Same problem over four ranks.
    let results = spawn_ranks(4, move |comm| {
        let comm = Arc::new(comm);
        let mut settings = Settings::new();
        settings
            .set("ELEMENT TYPE", "QUAD")
            .set("POLYNOMIAL DEGREE", degree)
            .set("BOX NX", nx)
            .set("BOX NY", nx)
            .set("DISCRETIZATION", "CONTINUOUS")
            .set("LINEAR SOLVER", "PCG");
        let mesh = Mesh::setup(&settings, &*comm).unwrap();
        let physics = SineSolution::new(lambda);
        let mut op = EllipticOperator::setup(
            mesh,
            &physics,
            lambda,
            settings.discretization().unwrap(),
            comm.clone(),
        )
        .unwrap();
        let b = op.assemble_rhs(&physics).unwrap();
        let precon = JacobiPrecon::from_diagonal(&op.diagonal().unwrap()).unwrap();
        let mut solver = PcgSolver::new(comm.clone(), op.dot_weights(), 1e-10, 2000)
            .with_variant(settings.cg_variant().unwrap())
            .with_monitor(settings.verbose())
            .with_preconditioner(Box::new(precon));
        let mut x = vec![0.0; op.len()];
        let stats = solver.solve(&mut op, &b, &mut x).unwrap();
        let exact = op.interpolate(|px, py| physics.exact(px, py));
        (
            stats.converged(),
            stats.iterations,
            max_abs_diff(&x, &exact),
            comm.rank(),
        )
    });

    let iterations: Vec<usize> = results.iter().map(|r| r.1).collect();
    for (converged, iters, err, rank) in &results {
        assert!(*converged, "rank {rank} did not converge");
        // Deterministic reductions: every rank runs the same iterations.
        assert_eq!(*iters, iterations[0]);
        // Distributed accuracy matches the serial reference's ballpark.
        assert!(
            *err < 10.0 * serial_err.max(1e-9),
            "rank {rank} error {err} vs serial {serial_err}"
        );
    }
}

#[test]
fn four_rank_ipdg_inverts_its_own_operator() {
    let results = spawn_ranks(4, |comm| {
        let comm = Arc::new(comm);
        let mut mesh = Mesh::box_2d(&*comm, 4, 4, 2);
        mesh::connect(&mut mesh, &*comm).unwrap();
        let physics = SineSolution::new(0.5);
        let mut op =
            EllipticOperator::setup(mesh, &physics, 0.5, Discretization::Ipdg, comm.clone())
                .unwrap();
        let u = op.interpolate(|x, y| (2.0 * x).cos() + y);
        let mut b = vec![0.0; op.len()];
        op.apply(&u, &mut b).unwrap();

        let mut solver = PcgSolver::new(comm, op.dot_weights(), 1e-11, 3000);
        let mut x = vec![0.0; op.len()];
        let stats = solver.solve(&mut op, &b, &mut x).unwrap();
        (stats.converged(), max_abs_diff(&x, &u))
    });
    for (converged, err) in results {
        assert!(converged);
        assert!(err < 1e-7, "error {err}");
    }
}
