//! Analyses and the stack reconstruction pass for the MCL lifter.

mod reaching;
mod stack;
mod symbolic;

pub use reaching::*;
pub use stack::*;
pub use symbolic::*;

use thiserror::Error;

/// Stack pass errors.
///
/// Per-access analysis failures are recovered locally and never
/// surface here; this is the module-level abort channel.
#[derive(Error, Debug)]
pub enum StackError {
    /// A situation the design deems impossible.
    #[error("invariant violation: {0}")]
    Invariant(&'static str),
}

pub type Result<T> = std::result::Result<T, StackError>;
