//! Unified error type.
//!
//! Setup-time problems (bad settings, inconsistent meshes, mismatched
//! exchange plans) and solve-time problems (breakdowns, indefinite
//! preconditioners) share one enum so every fallible API returns
//! `Result<_, PsError>`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PsError {
    #[error("invalid setting {key:?}: {value:?}")]
    InvalidSetting { key: String, value: String },
    #[error("missing required setting {0:?}")]
    MissingSetting(String),
    #[error("mesh connectivity error: face {face} of element {elem} has {count} matches")]
    DanglingFace { elem: u64, face: usize, count: usize },
    #[error("halo message mismatch with rank {neighbor}: sending {sending}, remote expects {expected}")]
    CommMismatch { neighbor: usize, sending: usize, expected: usize },
    #[error("communication failure with rank {neighbor}: {reason}")]
    CommError { neighbor: usize, reason: String },
    #[error("numerical breakdown: p^T A p = {0} in Krylov recurrence")]
    Breakdown(f64),
    #[error("indefinite preconditioner detected (z^T r < 0)")]
    IndefinitePreconditioner,
    #[error("buffer length mismatch: expected {expected}, got {got}")]
    SizeMismatch { expected: usize, got: usize },
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
}
