//! Loaded binary image with sections.

use crate::address::Address;
use crate::range::AddressRange;
use crate::{ImageError, Result};

/// A contiguous region of the loaded image.
///
/// `bytes` may be shorter than the range; the tail is then uninitialized
/// (BSS-like) and reads past it fail.
#[derive(Clone, Debug)]
pub struct Section {
    pub range: AddressRange,
    pub executable: bool,
    pub readable: bool,
    pub bytes: Vec<u8>,
}

impl Section {
    /// Create an executable code section backed by `bytes`.
    pub fn code(start: Address, bytes: Vec<u8>) -> Self {
        let end = start + (bytes.len() as u64 - 1);
        Self {
            range: AddressRange::new(start, end),
            executable: true,
            readable: true,
            bytes,
        }
    }

    /// Create a readable non-executable data section backed by `bytes`.
    pub fn data(start: Address, bytes: Vec<u8>) -> Self {
        let end = start + (bytes.len() as u64 - 1);
        Self {
            range: AddressRange::new(start, end),
            executable: false,
            readable: true,
            bytes,
        }
    }

    pub fn contains(&self, addr: Address) -> bool {
        self.range.contains(addr)
    }
}

/// Access to the loaded image: raw bytes, section layout, entry point.
///
/// File-format parsing lives behind this trait; the decoder only ever sees
/// sections and bytes.
pub trait Image {
    fn sections(&self) -> &[Section];

    fn entry_point(&self) -> Address;

    /// Bytes from `addr` to the end of its section's initialized data.
    fn raw_bytes_at(&self, addr: Address) -> Option<&[u8]>;
}

/// In-memory image over owned sections.
#[derive(Clone, Debug)]
pub struct RawImage {
    sections: Vec<Section>,
    entry: Address,
}

impl RawImage {
    /// Build an image, rejecting empty or overlapping sections.
    pub fn new(sections: Vec<Section>, entry: Address) -> Result<Self> {
        for s in &sections {
            if s.bytes.is_empty() {
                return Err(ImageError::EmptySection);
            }
        }
        for (i, a) in sections.iter().enumerate() {
            for b in sections.iter().skip(i + 1) {
                if a.range.contains(b.range.start()) || b.range.contains(a.range.start()) {
                    return Err(ImageError::OverlappingSections(a.range, b.range));
                }
            }
        }
        Ok(Self { sections, entry })
    }

    /// Single executable section starting at `entry`.
    pub fn with_code(entry: Address, bytes: Vec<u8>) -> Self {
        Self {
            sections: vec![Section::code(entry, bytes)],
            entry,
        }
    }
}

impl Image for RawImage {
    fn sections(&self) -> &[Section] {
        &self.sections
    }

    fn entry_point(&self) -> Address {
        self.entry
    }

    fn raw_bytes_at(&self, addr: Address) -> Option<&[u8]> {
        if addr.is_undefined() {
            return None;
        }
        let section = self.sections.iter().find(|s| s.contains(addr))?;
        let offset = (addr.value() - section.range.start().value()) as usize;
        if offset >= section.bytes.len() {
            return None;
        }
        Some(&section.bytes[offset..])
    }
}
