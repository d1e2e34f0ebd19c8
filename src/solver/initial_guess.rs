//! Initial-guess strategies for sequences of related solves.
//!
//! Time steppers and nonlinear outer loops solve many systems with the
//! same operator and slowly varying right-hand sides. A strategy forms
//! the starting vector before each solve and is fed the converged
//! solution afterwards. [`ClassicProjection`] keeps an orthonormal
//! history space of previous solutions and projects the new right-hand
//! side onto it, which typically removes most of the iteration count
//! once the history space has filled.

use std::sync::Arc;

use crate::config::{InitialGuessKind, Settings};
use crate::error::PsError;
use crate::kernels::{CpuKernels, KernelSet, n_blocks, reduce_partials};
use crate::operator::PdeOperator;
use crate::parallel::Comm;
use crate::solver::{PcgSolver, SolveReport, SolveStats};

const REORTH_PASSES: usize = 2;

pub trait InitialGuess: Send {
    /// Fill the starting vector for the upcoming solve.
    fn form(&mut self, rhs: &[f64], x: &mut [f64]) -> Result<(), PsError>;

    /// Feed the converged solution back into the strategy.
    fn update(
        &mut self,
        op: &mut dyn PdeOperator,
        x: &[f64],
        rhs: &[f64],
    ) -> Result<(), PsError>;

    /// Whether the strategy carries state between solves.
    fn recycles_history(&self) -> bool {
        false
    }
}

/// Keep whatever the caller left in `x`.
pub struct NoGuess;

impl InitialGuess for NoGuess {
    fn form(&mut self, _rhs: &[f64], _x: &mut [f64]) -> Result<(), PsError> {
        Ok(())
    }
    fn update(
        &mut self,
        _op: &mut dyn PdeOperator,
        _x: &[f64],
        _rhs: &[f64],
    ) -> Result<(), PsError> {
        Ok(())
    }
}

/// Always start from zero.
pub struct ZeroGuess;

impl InitialGuess for ZeroGuess {
    fn form(&mut self, _rhs: &[f64], x: &mut [f64]) -> Result<(), PsError> {
        x.fill(0.0);
        Ok(())
    }
    fn update(
        &mut self,
        _op: &mut dyn PdeOperator,
        _x: &[f64],
        _rhs: &[f64],
    ) -> Result<(), PsError> {
        Ok(())
    }
}

/// History-space projection.
///
/// The history holds pairs `(X_m, B_m = A X_m)` with the `B_m`
/// orthonormal in the weighted inner product. Forming a guess projects
/// the right-hand side onto `span{B_m}` and reconstructs the matching
/// combination of the `X_m`, which minimizes the starting residual over
/// the history space. Each converged solution is orthogonalized against
/// the history (two re-orthogonalization passes) and appended; when the
/// space is full it restarts from the newest vector alone.
pub struct ClassicProjection<C: Comm> {
    comm: Arc<C>,
    kernels: CpuKernels,
    weight: Vec<f64>,
    n: usize,
    max_dim: usize,
    cur_dim: usize,
    /// Stacked history solutions, `max_dim * n`.
    basis_x: Vec<f64>,
    /// Stacked operator images of the history, `max_dim * n`.
    basis_b: Vec<f64>,
    xtilde: Vec<f64>,
    btilde: Vec<f64>,
    alphas: Vec<f64>,
}

impl<C: Comm> ClassicProjection<C> {
    pub fn new(comm: Arc<C>, weight: Vec<f64>, max_dim: usize) -> Self {
        let n = weight.len();
        ClassicProjection {
            comm,
            kernels: CpuKernels,
            weight,
            n,
            max_dim,
            cur_dim: 0,
            basis_x: vec![0.0; max_dim * n],
            basis_b: vec![0.0; max_dim * n],
            xtilde: vec![0.0; n],
            btilde: vec![0.0; n],
            alphas: vec![0.0; max_dim],
        }
    }

    /// Current history-space dimension.
    pub fn dim(&self) -> usize {
        self.cur_dim
    }

    /// `alphas[m] = <B_m, v>_w` for the current history, reduced with a
    /// single message.
    fn project_onto_basis(&mut self, v: &[f64]) {
        let mut local = vec![0.0; self.cur_dim];
        let mut partials = vec![0.0; n_blocks(self.n)];
        for m in 0..self.cur_dim {
            self.kernels.inner_product_partials(
                Some(&self.weight),
                &self.basis_b[m * self.n..(m + 1) * self.n],
                v,
                &mut partials,
            );
            local[m] = reduce_partials(&partials);
        }
        self.comm
            .all_reduce_sum_many(&local, &mut self.alphas[..self.cur_dim]);
    }

    fn weighted_dot(&self, x: &[f64], y: &[f64]) -> f64 {
        let mut partials = vec![0.0; n_blocks(self.n)];
        self.kernels
            .inner_product_partials(Some(&self.weight), x, y, &mut partials);
        self.comm.all_reduce_sum(reduce_partials(&partials))
    }
}

impl<C: Comm> InitialGuess for ClassicProjection<C> {
    fn form(&mut self, rhs: &[f64], x: &mut [f64]) -> Result<(), PsError> {
        // An empty history has nothing to project; leave the caller's
        // starting vector untouched.
        if self.cur_dim == 0 {
            return Ok(());
        }
        x.fill(0.0);
        self.project_onto_basis(rhs);
        self.kernels
            .reconstruct(&self.alphas[..self.cur_dim], &self.basis_x, self.cur_dim, x);
        Ok(())
    }

    fn update(
        &mut self,
        op: &mut dyn PdeOperator,
        x: &[f64],
        _rhs: &[f64],
    ) -> Result<(), PsError> {
        if self.max_dim == 0 {
            return Ok(());
        }
        if self.cur_dim >= self.max_dim {
            // Restart: the space is full, keep only the newest vector.
            self.cur_dim = 0;
        }

        self.xtilde.copy_from_slice(x);
        let mut btilde = std::mem::take(&mut self.btilde);
        op.apply(x, &mut btilde)?;
        self.btilde = btilde;

        for _ in 0..REORTH_PASSES {
            if self.cur_dim == 0 {
                break;
            }
            let btilde = std::mem::take(&mut self.btilde);
            self.project_onto_basis(&btilde);
            self.btilde = btilde;
            let neg: Vec<f64> = self.alphas[..self.cur_dim].iter().map(|a| -a).collect();
            self.kernels
                .reconstruct(&neg, &self.basis_x, self.cur_dim, &mut self.xtilde);
            self.kernels
                .reconstruct(&neg, &self.basis_b, self.cur_dim, &mut self.btilde);
        }

        let norm = self.weighted_dot(&self.btilde, &self.btilde).sqrt();
        if norm > 0.0 {
            let scale = 1.0 / norm;
            let m = self.cur_dim;
            for (slot, v) in self.basis_x[m * self.n..(m + 1) * self.n]
                .iter_mut()
                .zip(&self.xtilde)
            {
                *slot = scale * v;
            }
            for (slot, v) in self.basis_b[m * self.n..(m + 1) * self.n]
                .iter_mut()
                .zip(&self.btilde)
            {
                *slot = scale * v;
            }
            self.cur_dim += 1;
        }
        Ok(())
    }

    fn recycles_history(&self) -> bool {
        true
    }
}

/// Build a strategy from run settings. Unknown strategy names have
/// already been rejected by the typed settings getter.
pub fn initial_guess_from_settings<C: Comm + 'static>(
    settings: &Settings,
    comm: Arc<C>,
    weight: Vec<f64>,
) -> Result<Box<dyn InitialGuess>, PsError> {
    Ok(match settings.initial_guess()? {
        InitialGuessKind::None => Box::new(NoGuess),
        InitialGuessKind::Zero => Box::new(ZeroGuess),
        InitialGuessKind::Classic => {
            let dim: usize =
                settings.get_parsed_or("INITIAL GUESS HISTORY SPACE DIMENSION", 16)?;
            Box::new(ClassicProjection::new(comm, weight, dim))
        }
    })
}

/// A Krylov solver paired with an initial-guess strategy; the strategy
/// runs around every solve.
pub struct ProjectedSolver<C: Comm, K: KernelSet<f64> = CpuKernels> {
    pub solver: PcgSolver<C, K>,
    pub guess: Box<dyn InitialGuess>,
}

impl<C: Comm, K: KernelSet<f64>> ProjectedSolver<C, K> {
    pub fn new(solver: PcgSolver<C, K>, guess: Box<dyn InitialGuess>) -> Self {
        ProjectedSolver { solver, guess }
    }

    pub fn solve(
        &mut self,
        op: &mut dyn PdeOperator,
        b: &[f64],
        x: &mut [f64],
    ) -> Result<SolveStats, PsError> {
        self.guess.form(b, x)?;
        let mut stats = self.solver.solve(op, b, x)?;
        self.guess.update(op, x, b)?;
        if self.guess.recycles_history() {
            stats.report |= SolveReport::PROJECTED_GUESS;
        }
        Ok(stats)
    }
}
