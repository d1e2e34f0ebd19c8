//! Problem definitions decoupled from the discretization.
//!
//! A [`Physics`] maps boundary tags to condition types and supplies the
//! forcing, boundary state, and initial condition as plain callbacks on
//! physical coordinates. The operator core never hard-codes a problem;
//! swapping the solved equation means swapping the `Physics` value.

use crate::mesh::BoundaryTag;

/// Boundary condition type assigned to a tagged face.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BcType {
    Dirichlet,
    Neumann,
}

/// Problem definition for the screened Poisson equation
/// `-div(grad u) + lambda u = f`.
pub trait Physics: Send + Sync {
    /// Condition type for a tagged boundary face.
    fn bc_type(&self, tag: BoundaryTag) -> BcType;

    /// Prescribed boundary value at `(x, y)` for Dirichlet faces, or the
    /// prescribed normal flux for Neumann faces.
    fn boundary_state(&self, tag: BoundaryTag, x: f64, y: f64) -> f64;

    /// Right-hand side `f(x, y)`.
    fn forcing(&self, x: f64, y: f64) -> f64;

    /// Field value used to seed time-dependent or nonlinear outer loops.
    fn initial_condition(&self, _x: f64, _y: f64) -> f64 {
        0.0
    }
}

/// Manufactured solution `u = sin(pi x) sin(pi y)` on the unit square
/// with homogeneous Dirichlet walls. Used by convergence tests.
#[derive(Debug, Clone, Copy)]
pub struct SineSolution {
    /// Helmholtz shift `lambda` of the screened Poisson operator.
    pub lambda: f64,
}

impl SineSolution {
    pub fn new(lambda: f64) -> Self {
        SineSolution { lambda }
    }

    /// Exact solution value.
    pub fn exact(&self, x: f64, y: f64) -> f64 {
        (std::f64::consts::PI * x).sin() * (std::f64::consts::PI * y).sin()
    }
}

impl Physics for SineSolution {
    fn bc_type(&self, _tag: BoundaryTag) -> BcType {
        BcType::Dirichlet
    }

    fn boundary_state(&self, _tag: BoundaryTag, _x: f64, _y: f64) -> f64 {
        0.0
    }

    fn forcing(&self, x: f64, y: f64) -> f64 {
        let pi = std::f64::consts::PI;
        (2.0 * pi * pi + self.lambda) * self.exact(x, y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sine_solution_satisfies_equation() {
        let phys = SineSolution::new(0.5);
        // -laplace(u) + lambda*u == f at a few sample points.
        let h = 1e-5;
        for &(x, y) in &[(0.3, 0.7), (0.5, 0.5), (0.1, 0.9)] {
            let lap = (phys.exact(x + h, y) + phys.exact(x - h, y) + phys.exact(x, y + h)
                + phys.exact(x, y - h)
                - 4.0 * phys.exact(x, y))
                / (h * h);
            let residual = -lap + phys.lambda * phys.exact(x, y) - phys.forcing(x, y);
            assert!(residual.abs() < 1e-5, "residual {residual} at ({x},{y})");
        }
    }

    #[test]
    fn sine_solution_vanishes_on_walls() {
        let phys = SineSolution::new(0.0);
        assert!(phys.exact(0.0, 0.25).abs() < 1e-15);
        assert!(phys.exact(1.0, 0.75).abs() < 1e-15);
        assert_eq!(phys.bc_type(BoundaryTag::WALL), BcType::Dirichlet);
    }
}
