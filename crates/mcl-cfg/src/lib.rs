//! Control-flow decoder for the MCL lifter.
//!
//! Discovers code incrementally from a worklist of jump targets,
//! lifting one instruction at a time through an external translator
//! and maintaining bidirectional address↔IR indices so later
//! re-discoveries can re-use or subdivide already-emitted structures.

mod decoder;
mod dump;
mod index;
mod jump_targets;
mod pseudo_worklist;
mod translator;

pub use decoder::*;
pub use dump::*;
pub use index::*;
pub use jump_targets::*;
pub use pseudo_worklist::*;
pub use translator::*;

use mcl_ir::InstId;
use thiserror::Error;

/// Decoder errors.
///
/// Per-instruction translation failures are recovered locally and never
/// surface here; these are the module-level aborts.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// A situation the design deems impossible.
    #[error("invariant violation: {0}")]
    Invariant(&'static str),
    /// A pseudo terminator's target was set twice to different values.
    #[error("inconsistent {what} patch on pseudo terminator {pseudo:?}")]
    InconsistentPatch {
        pseudo: InstId,
        what: &'static str,
    },
    /// A patch was requested on an instruction of the wrong shape.
    #[error("instruction {0:?} is not a patchable pseudo terminator")]
    NotPatchable(InstId),
}

pub type Result<T> = std::result::Result<T, DecodeError>;
