//! Diagonal (Jacobi) preconditioner.

use super::Preconditioner;
use crate::error::PsError;

/// Pointwise scaling by the inverse operator diagonal.
#[derive(Debug, Clone)]
pub struct JacobiPrecon {
    inv_diag: Vec<f64>,
}

impl JacobiPrecon {
    /// Build from an assembled operator diagonal. A non-positive entry
    /// means the diagonal does not define an SPD preconditioner.
    pub fn from_diagonal(diag: &[f64]) -> Result<Self, PsError> {
        if diag.iter().any(|&d| !(d > 0.0)) {
            return Err(PsError::IndefinitePreconditioner);
        }
        Ok(JacobiPrecon {
            inv_diag: diag.iter().map(|&d| 1.0 / d).collect(),
        })
    }
}

impl Preconditioner for JacobiPrecon {
    fn apply(&self, r: &[f64], z: &mut [f64]) -> Result<(), PsError> {
        if r.len() != self.inv_diag.len() || z.len() != self.inv_diag.len() {
            return Err(PsError::SizeMismatch {
                expected: self.inv_diag.len(),
                got: r.len().min(z.len()),
            });
        }
        for ((zi, &ri), &di) in z.iter_mut().zip(r).zip(&self.inv_diag) {
            *zi = ri * di;
        }
        Ok(())
    }
}
