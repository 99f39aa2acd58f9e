//! Intermediate representation for the MCL lifter.
//!
//! This crate provides pure IR types with no target-specific knowledge.
//! Machine instructions are lifted into this IR by an external
//! translator; the decoder in `mcl-cfg` stitches the results into
//! functions and basic blocks.

mod abi;
mod builder;
mod module;
mod types;
mod value;

pub use abi::*;
pub use builder::*;
pub use module::*;
pub use types::*;
pub use value::*;
