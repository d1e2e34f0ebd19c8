//! Setup-time configuration surface.
//!
//! All options are string-keyed and consumed once during setup; an
//! unrecognized enum value aborts setup with an error naming the bad
//! key/value pair instead of silently defaulting.

pub mod settings;
pub use settings::{CgVariant, Discretization, ElementType, InitialGuessKind, Settings};
