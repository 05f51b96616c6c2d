//! In-memory firmware image model
//!
//! The flashing session consumes a pre-parsed image: an ordered list of
//! address/byte regions inside the target's flash window. Turning a file
//! format into segments is the business of whatever produced the image; a
//! raw `.bin` payload can be wrapped directly with
//! [FirmwareImage::from_binary].

use std::fmt::{Debug, Formatter};

use crate::error::{Error, ImageError};

/// Base of the flash window on every supported part.
pub const FLASH_BASE: u32 = 0x0800_0000;

/// A contiguous run of bytes to program at an absolute address.
#[derive(Clone)]
pub struct Segment {
    /// Address at which the segment begins
    pub address: u32,
    data: Vec<u8>,
}

impl Segment {
    pub fn new(address: u32, data: Vec<u8>) -> Self {
        Segment { address, data }
    }

    /// Return the size of the segment
    pub fn size(&self) -> u32 {
        self.data.len() as u32
    }

    /// Return the data of the segment
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl Debug for Segment {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("address", &self.address)
            .field("size", &self.size())
            .finish()
    }
}

/// An ordered set of segments to program, erase around, and verify.
#[derive(Debug, Clone)]
pub struct FirmwareImage {
    segments: Vec<Segment>,
    bytes_total: u32,
}

impl FirmwareImage {
    /// Build an image from segments sorted by ascending address.
    ///
    /// Segments must be non-empty, non-overlapping, and lie inside the
    /// flash window.
    pub fn new(segments: Vec<Segment>) -> Result<Self, Error> {
        if segments.is_empty() {
            return Err(ImageError::from("image contains no segments").into());
        }

        let mut bytes_total = 0u32;
        let mut previous_end = FLASH_BASE;
        for segment in &segments {
            if segment.data.is_empty() {
                return Err(ImageError::from("image contains an empty segment").into());
            }
            if segment.address < previous_end {
                return Err(ImageError::from(
                    "segments must be ascending, non-overlapping, and inside the flash window",
                )
                .into());
            }
            previous_end = segment.address + segment.size();
            bytes_total += segment.size();
        }

        Ok(FirmwareImage {
            segments,
            bytes_total,
        })
    }

    /// Wrap a raw binary payload as a single segment at `address`.
    pub fn from_binary(address: u32, data: Vec<u8>) -> Result<Self, Error> {
        Self::new(vec![Segment::new(address, data)])
    }

    /// Image segments, in programming order
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Total number of bytes the image programs
    pub fn bytes_total(&self) -> u32 {
        self.bytes_total
    }

    /// Highest byte offset the image touches, relative to [FLASH_BASE].
    pub fn end_offset(&self) -> u32 {
        // Construction guarantees at least one segment.
        let last = self.segments.last().unwrap();
        last.address + last.size() - FLASH_BASE
    }
}
