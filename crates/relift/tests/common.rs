//! Shared helpers for integration tests.

use relift::testing::{x86_abi, X86SubsetLifter};
use relift::{Address, Config, DecodeResult, Decoder, RawImage, Section};

/// Build an image from `(start, bytes)` code sections.
pub fn image_with(sections: Vec<(u64, Vec<u8>)>, entry: u64) -> RawImage {
    let sections = sections
        .into_iter()
        .map(|(start, bytes)| Section::code(Address::new(start), bytes))
        .collect();
    RawImage::new(sections, Address::new(entry)).expect("valid test image")
}

/// Decode an image with the x86 subset lifter.
pub fn decode(image: &RawImage, config: &Config) -> DecodeResult {
    let abi = x86_abi(config);
    let mut lifter = X86SubsetLifter::new();
    Decoder::new(image, config, &abi, &mut lifter)
        .run()
        .expect("decode succeeds")
}
