//! Preconditioned conjugate gradients.
//!
//! One operator apply and (at most) one preconditioner apply per
//! iteration, with the standard alpha/beta recurrences on globally
//! reduced weighted inner products. The flexible variant replaces the
//! Fletcher-Reeves beta with the Polak-Ribiere form so the search
//! directions stay conjugate under a preconditioner that changes
//! between iterations.

use std::sync::Arc;

use crate::config::CgVariant;
use crate::error::PsError;
use crate::kernels::{CpuKernels, KernelSet, n_blocks, reduce_partials};
use crate::operator::PdeOperator;
use crate::parallel::Comm;
use crate::preconditioner::Preconditioner;
use crate::solver::{SolveReport, SolveStats};

pub struct PcgSolver<C: Comm, K: KernelSet<f64> = CpuKernels> {
    comm: Arc<C>,
    kernels: K,
    /// Inner-product weights (reciprocal node multiplicity for
    /// duplicated layouts).
    weight: Vec<f64>,
    tol: f64,
    max_iters: usize,
    variant: CgVariant,
    precon: Option<Box<dyn Preconditioner>>,
    monitor: bool,
    /// Weighted residual norm after each iteration of the last solve.
    pub residual_history: Vec<f64>,
}

impl<C: Comm> PcgSolver<C, CpuKernels> {
    pub fn new(comm: Arc<C>, weight: Vec<f64>, tol: f64, max_iters: usize) -> Self {
        PcgSolver {
            comm,
            kernels: CpuKernels,
            weight,
            tol,
            max_iters,
            variant: CgVariant::Cg,
            precon: None,
            monitor: false,
            residual_history: Vec::new(),
        }
    }
}

impl<C: Comm, K: KernelSet<f64>> PcgSolver<C, K> {
    pub fn with_variant(mut self, variant: CgVariant) -> Self {
        self.variant = variant;
        self
    }

    pub fn with_preconditioner(mut self, precon: Box<dyn Preconditioner>) -> Self {
        self.precon = Some(precon);
        self
    }

    /// Log the residual norm every iteration.
    pub fn with_monitor(mut self, monitor: bool) -> Self {
        self.monitor = monitor;
        self
    }

    /// Globally reduced weighted inner product.
    fn dot(&self, x: &[f64], y: &[f64]) -> f64 {
        let mut partials = vec![0.0; n_blocks(x.len())];
        self.kernels
            .inner_product_partials(Some(&self.weight), x, y, &mut partials);
        self.comm.all_reduce_sum(reduce_partials(&partials))
    }

    fn apply_precon(&self, r: &[f64], z: &mut [f64]) -> Result<(), PsError> {
        match &self.precon {
            Some(p) => p.apply(r, z),
            None => {
                z.copy_from_slice(r);
                Ok(())
            }
        }
    }

    /// Solve `A x = b`, refining `x` in place from its incoming value.
    /// Converged means the weighted residual norm dropped to `tol`.
    pub fn solve(
        &mut self,
        op: &mut dyn PdeOperator,
        b: &[f64],
        x: &mut [f64],
    ) -> Result<SolveStats, PsError> {
        let n = op.len();
        if b.len() != n || x.len() != n || self.weight.len() != n {
            return Err(PsError::SizeMismatch {
                expected: n,
                got: b.len().min(x.len()).min(self.weight.len()),
            });
        }

        let clock = std::time::Instant::now();
        let mut report = SolveReport::empty();
        if self.precon.is_some() {
            report |= SolveReport::PRECONDITIONED;
        }
        if self.variant == CgVariant::FlexPcg {
            report |= SolveReport::FLEXIBLE;
        }

        let mut r = vec![0.0; n];
        let mut z = vec![0.0; n];
        let mut p = vec![0.0; n];
        let mut ap = vec![0.0; n];
        self.residual_history.clear();

        op.apply(x, &mut ap)?;
        r.copy_from_slice(b);
        self.kernels.scaled_add(-1.0, &ap, 1.0, &mut r);

        let tol2 = self.tol * self.tol;
        let mut rdotr = self.dot(&r, &r);
        self.residual_history.push(rdotr.sqrt());
        if rdotr <= tol2 {
            return Ok(SolveStats {
                iterations: 0,
                final_residual: rdotr.sqrt(),
                elapsed: clock.elapsed(),
                report: report | SolveReport::CONVERGED,
            });
        }

        self.apply_precon(&r, &mut z)?;
        let mut rdotz = self.dot(&r, &z);
        if rdotz < 0.0 {
            return Err(PsError::IndefinitePreconditioner);
        }
        p.copy_from_slice(&z);

        let mut iterations = self.max_iters;
        for k in 1..=self.max_iters {
            op.apply(&p, &mut ap)?;
            let pap = self.dot(&p, &ap);
            if !(pap > 0.0) {
                return Err(PsError::Breakdown(pap));
            }
            let alpha = rdotz / pap;
            self.kernels.scaled_add(alpha, &p, 1.0, x);
            self.kernels.scaled_add(-alpha, &ap, 1.0, &mut r);

            rdotr = self.dot(&r, &r);
            self.residual_history.push(rdotr.sqrt());
            if self.monitor {
                log::info!("pcg iteration {k}: residual {:.6e}", rdotr.sqrt());
            }
            if rdotr <= tol2 {
                iterations = k;
                report |= SolveReport::CONVERGED;
                break;
            }

            self.apply_precon(&r, &mut z)?;
            let next_rdotz = self.dot(&r, &z);
            if next_rdotz < 0.0 {
                return Err(PsError::IndefinitePreconditioner);
            }
            let beta = match self.variant {
                CgVariant::FlexPcg => {
                    // r_new - r_old = -alpha * Ap, so <z, r_new - r_old>
                    // costs one extra dot instead of an extra vector.
                    let zdotap = self.dot(&z, &ap);
                    -alpha * zdotap / rdotz
                }
                _ => next_rdotz / rdotz,
            };
            self.kernels.scaled_add(1.0, &z, beta, &mut p);
            rdotz = next_rdotz;
        }

        if !report.contains(SolveReport::CONVERGED) {
            report |= SolveReport::MAX_ITERATIONS;
            log::warn!(
                "pcg hit the iteration cap ({}) at residual {:.6e}",
                self.max_iters,
                rdotr.sqrt(),
            );
        }
        let elapsed = clock.elapsed();
        if self.monitor {
            log::info!(
                "pcg done: {n} unknowns, {iterations} iterations, residual {:.6e}, {:.3?}",
                rdotr.sqrt(),
                elapsed,
            );
        }
        Ok(SolveStats {
            iterations,
            final_residual: rdotr.sqrt(),
            elapsed,
            report,
        })
    }
}
