//! Loaded binary image with memory segments and symbols.

use crate::address::AddressRange;
use crate::{ImageError, Result};

/// Segment permission flags, ELF `p_flags` style.
pub const SEG_EXEC: u32 = 1;
pub const SEG_WRITE: u32 = 2;
pub const SEG_READ: u32 = 4;

/// A mapped segment with virtual address range and file data.
///
/// `data` holds only the file-backed bytes; addresses past
/// `start + data.len()` up to `end` are zero-initialized.
#[derive(Clone, Debug)]
pub struct Segment {
    pub start: u64,
    pub end: u64,
    pub data: Vec<u8>,
    pub flags: u32,
}

impl Segment {
    pub fn new(start: u64, data: Vec<u8>, flags: u32) -> Self {
        let end = start + data.len() as u64;
        Self {
            start,
            end,
            data,
            flags,
        }
    }

    pub const fn is_executable(&self) -> bool {
        (self.flags & SEG_EXEC) != 0
    }

    pub const fn is_writable(&self) -> bool {
        (self.flags & SEG_WRITE) != 0
    }

    pub const fn is_readable(&self) -> bool {
        (self.flags & SEG_READ) != 0
    }

    pub fn range(&self) -> AddressRange {
        AddressRange::new(self.start, self.end)
    }
}

/// A named address from the binary's symbol table.
#[derive(Clone, Debug)]
pub struct Symbol {
    pub name: String,
    pub address: u64,
    pub is_function: bool,
}

/// Binary image ready for decoding.
#[derive(Clone, Debug)]
pub struct Image {
    pub entry_point: u64,
    pub segments: Vec<Segment>,
    pub symbols: Vec<Symbol>,
}

impl Image {
    /// Build an image from already-loaded segments.
    ///
    /// # Errors
    ///
    /// Returns an error if no segments are given or any two segments
    /// overlap in their virtual ranges.
    pub fn new(entry_point: u64, segments: Vec<Segment>, symbols: Vec<Symbol>) -> Result<Self> {
        if segments.is_empty() {
            return Err(ImageError::NoSegments);
        }

        for (i, a) in segments.iter().enumerate() {
            for b in segments.iter().skip(i + 1) {
                if a.range().overlaps(&b.range()) {
                    return Err(ImageError::OverlappingSegments);
                }
            }
        }

        Ok(Self {
            entry_point,
            segments,
            symbols,
        })
    }

    /// Create an image from a single chunk of raw code bytes.
    pub fn from_code(code: Vec<u8>, base: u64) -> Self {
        Self {
            entry_point: base,
            segments: vec![Segment::new(base, code, SEG_READ | SEG_EXEC)],
            symbols: Vec::new(),
        }
    }

    /// Raw bytes available at an address: from `addr` to the end of the
    /// containing segment's file data. `None` when the address is not
    /// mapped or lies in the zero-fill tail.
    pub fn raw_bytes(&self, addr: u64) -> Option<&[u8]> {
        let seg = self
            .segments
            .iter()
            .find(|s| s.range().contains(addr))?;
        let offset = (addr - seg.start) as usize;
        if offset >= seg.data.len() {
            return None;
        }
        Some(&seg.data[offset..])
    }

    /// Ranges of executable segments, for seeding the allowed set.
    pub fn executable_ranges(&self) -> impl Iterator<Item = AddressRange> + '_ {
        self.segments
            .iter()
            .filter(|s| s.is_executable())
            .map(Segment::range)
    }

    /// Ranges of readable, non-executable, non-writable segments that
    /// might still hold code. Used as fallback probe targets.
    pub fn alternative_ranges(&self) -> impl Iterator<Item = AddressRange> + '_ {
        self.segments
            .iter()
            .filter(|s| s.is_readable() && !s.is_executable() && !s.is_writable())
            .map(Segment::range)
    }

    /// Addresses of exported function symbols.
    pub fn function_symbols(&self) -> impl Iterator<Item = u64> + '_ {
        self.symbols
            .iter()
            .filter(|s| s.is_function)
            .map(|s| s.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_code() {
        let image = Image::from_code(vec![0x90; 16], 0x1000);
        assert_eq!(image.entry_point, 0x1000);
        assert_eq!(image.segments.len(), 1);
        assert!(image.segments[0].is_executable());
    }

    #[test]
    fn test_raw_bytes_window() {
        let image = Image::from_code((0..16).collect(), 0x1000);
        let bytes = image.raw_bytes(0x1004).unwrap();
        assert_eq!(bytes.len(), 12);
        assert_eq!(bytes[0], 4);
        assert!(image.raw_bytes(0x1010).is_none());
        assert!(image.raw_bytes(0x500).is_none());
    }

    #[test]
    fn test_overlapping_segments_rejected() {
        let segs = vec![
            Segment::new(0x1000, vec![0; 0x100], SEG_READ | SEG_EXEC),
            Segment::new(0x1080, vec![0; 0x100], SEG_READ),
        ];
        assert!(matches!(
            Image::new(0x1000, segs, Vec::new()),
            Err(ImageError::OverlappingSegments)
        ));
    }

    #[test]
    fn test_range_classification() {
        let segs = vec![
            Segment::new(0x1000, vec![0; 0x100], SEG_READ | SEG_EXEC),
            Segment::new(0x2000, vec![0; 0x100], SEG_READ),
            Segment::new(0x3000, vec![0; 0x100], SEG_READ | SEG_WRITE),
        ];
        let image = Image::new(0x1000, segs, Vec::new()).unwrap();
        let exec: Vec<_> = image.executable_ranges().collect();
        let alt: Vec<_> = image.alternative_ranges().collect();
        assert_eq!(exec, vec![AddressRange::new(0x1000, 0x1100)]);
        assert_eq!(alt, vec![AddressRange::new(0x2000, 0x2100)]);
    }

    #[test]
    fn test_function_symbols() {
        let mut image = Image::from_code(vec![0; 8], 0x1000);
        image.symbols.push(Symbol {
            name: "main".to_string(),
            address: 0x1000,
            is_function: true,
        });
        image.symbols.push(Symbol {
            name: "data".to_string(),
            address: 0x2000,
            is_function: false,
        });
        let fns: Vec<_> = image.function_symbols().collect();
        assert_eq!(fns, vec![0x1000]);
    }
}
