//! Address primitives and binary image access for the relift decoder.

mod address;
mod image;
mod range;

pub use address::*;
pub use image::*;
pub use range::*;

use thiserror::Error;

/// Image construction errors.
#[derive(Error, Debug)]
pub enum ImageError {
    #[error("section has no bytes")]
    EmptySection,
    #[error("overlapping section ranges: {0} and {1}")]
    OverlappingSections(AddressRange, AddressRange),
}

pub type Result<T> = std::result::Result<T, ImageError>;
