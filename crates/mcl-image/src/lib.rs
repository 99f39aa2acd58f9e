//! Binary image, addresses and address range sets for the MCL lifter.

mod address;
pub mod debug;
mod image;
mod range_set;

pub use address::{Address, AddressRange};
pub use debug::{DebugFunction, DebugInfo, DebugVariable};
pub use image::{Image, Segment, Symbol, SEG_EXEC, SEG_READ, SEG_WRITE};
pub use range_set::RangeSet;

use thiserror::Error;

/// Image construction errors.
#[derive(Error, Debug)]
pub enum ImageError {
    #[error("no segments")]
    NoSegments,
    #[error("overlapping virtual address ranges")]
    OverlappingSegments,
}

pub type Result<T> = std::result::Result<T, ImageError>;
