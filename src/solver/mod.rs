//! Distributed Krylov solvers.
//!
//! [`PcgSolver`] runs (preconditioned, optionally flexible) conjugate
//! gradients against any [`PdeOperator`](crate::operator::PdeOperator);
//! the initial-guess strategies in [`initial_guess`] wrap a solver to
//! recycle solution history across a sequence of related solves.
//!
//! All inner products are weighted and globally reduced through the
//! communicator, so every rank sees identical scalars and takes the
//! same convergence decision on the same iteration.

pub mod initial_guess;
pub mod pcg;

pub use initial_guess::{
    ClassicProjection, InitialGuess, NoGuess, ProjectedSolver, ZeroGuess, initial_guess_from_settings,
};
pub use pcg::PcgSolver;

use bitflags::bitflags;

bitflags! {
    /// How a solve ended and which optional machinery was active.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SolveReport: u32 {
        const CONVERGED = 1 << 0;
        const MAX_ITERATIONS = 1 << 1;
        const PRECONDITIONED = 1 << 2;
        const FLEXIBLE = 1 << 3;
        const PROJECTED_GUESS = 1 << 4;
    }
}

/// Outcome of one Krylov solve.
#[derive(Debug, Clone, Copy)]
pub struct SolveStats {
    pub iterations: usize,
    /// Weighted L2 norm of the final residual.
    pub final_residual: f64,
    pub elapsed: std::time::Duration,
    pub report: SolveReport,
}

impl SolveStats {
    pub fn converged(&self) -> bool {
        self.report.contains(SolveReport::CONVERGED)
    }
}
