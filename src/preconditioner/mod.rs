//! Preconditioners for the Krylov layer.
//!
//! A preconditioner maps a residual to a correction, `z = M^{-1} r`,
//! and must be symmetric positive definite for plain PCG; variable
//! preconditioners require the flexible variant.

pub mod jacobi;

pub use jacobi::JacobiPrecon;

use crate::error::PsError;

pub trait Preconditioner: Send + Sync {
    /// `z = M^{-1} r`.
    fn apply(&self, r: &[f64], z: &mut [f64]) -> Result<(), PsError>;
}
