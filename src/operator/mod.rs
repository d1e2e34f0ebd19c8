//! Matrix-free PDE operators.
//!
//! [`PdeOperator`] is the seam between discretizations and the Krylov
//! layer: anything that can apply itself to a distributed vector can be
//! solved. [`EllipticOperator`] is the built-in screened-Poisson
//! discretization on quadrilateral meshes, in either continuous or
//! interior-penalty form; [`Physics`] supplies boundary conditions,
//! forcing, and reference solutions without touching the operator core.

pub mod elliptic;
pub mod physics;

pub use elliptic::EllipticOperator;
pub use physics::{BcType, Physics, SineSolution};

use crate::error::PsError;

/// A linear operator applied matrix-free to rank-local vectors.
///
/// `apply` takes `&mut self` so implementations can reuse internal
/// scratch and communication buffers across Krylov iterations.
pub trait PdeOperator {
    /// `ax = A x`.
    fn apply(&mut self, x: &[f64], ax: &mut [f64]) -> Result<(), PsError>;

    /// Rank-local vector length the operator acts on.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
