//! paraspec: distributed-memory spectral-element solver core.
//!
//! The crate provides the pieces a distributed PDE solver is built
//! from, each usable on its own:
//!
//! - [`parallel`]: a communicator facade with serial, threaded, and
//!   (feature-gated) MPI backends;
//! - [`mesh`]: distributed mesh slices, face-matching connectivity,
//!   weighted repartitioning, halo exchange, and gather-scatter
//!   assembly;
//! - [`operator`]: matrix-free elliptic operators in continuous and
//!   interior-penalty form, with pluggable physics;
//! - [`solver`]: preconditioned conjugate gradients plus initial-guess
//!   strategies that recycle solution history;
//! - [`preconditioner`], [`kernels`], [`config`]: the supporting cast.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use paraspec::config::{Discretization, Settings};
//! use paraspec::mesh::Mesh;
//! use paraspec::operator::{EllipticOperator, SineSolution};
//! use paraspec::parallel::SerialComm;
//! use paraspec::solver::PcgSolver;
//!
//! let comm = Arc::new(SerialComm);
//! let mut settings = Settings::new();
//! settings
//!     .set("ELEMENT TYPE", "QUAD")
//!     .set("POLYNOMIAL DEGREE", "4")
//!     .set("BOX NX", "8")
//!     .set("BOX NY", "8");
//! let mesh = Mesh::setup(&settings, &*comm).unwrap();
//!
//! let physics = SineSolution::new(1.0);
//! let mut op = EllipticOperator::setup(
//!     mesh, &physics, 1.0, Discretization::Continuous, comm.clone(),
//! ).unwrap();
//! let b = op.assemble_rhs(&physics).unwrap();
//!
//! let mut solver = PcgSolver::new(comm, op.dot_weights(), 1e-8, 500);
//! let mut x = vec![0.0; b.len()];
//! let stats = solver.solve(&mut op, &b, &mut x).unwrap();
//! assert!(stats.converged());
//! ```

pub mod config;
pub mod error;
pub mod kernels;
pub mod mesh;
pub mod operator;
pub mod parallel;
pub mod preconditioner;
pub mod solver;

pub use config::{CgVariant, Discretization, ElementType, InitialGuessKind, Settings};
pub use error::PsError;
pub use kernels::{CpuKernels, KernelSet};
pub use mesh::{GatherScatter, GsOp, HaloExchanger, Mesh};
pub use operator::{EllipticOperator, PdeOperator, Physics, SineSolution};
pub use parallel::{Comm, SerialComm, ThreadComm, ThreadWorld};
pub use preconditioner::{JacobiPrecon, Preconditioner};
pub use solver::{
    ClassicProjection, InitialGuess, PcgSolver, ProjectedSolver, SolveReport, SolveStats,
};
