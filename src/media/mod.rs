// SPDX-License-Identifier: GPL-3.0-only

//! JPEG container handling
//!
//! - [`exif_thumbnail`]: locate and extract the DCF thumbnail of a photo
//! - [`composite`]: splice a thumbnail frame into a full-resolution photo

pub mod composite;
pub mod exif_thumbnail;

pub use composite::composite_thumbnail;
pub use exif_thumbnail::{get_embedded_thumbnail, get_embedded_thumbnail_ex, locate_embedded_thumbnail};

/// Which embedded image to extract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThumbnailKind {
    /// Exif (DCF) thumbnail in APP1
    #[default]
    Dcf,
    /// First MPF large thumbnail
    Mpf1,
    /// Second MPF large thumbnail
    Mpf2,
}

/// Storage for an extracted thumbnail
#[derive(Debug, Default)]
pub enum ThumbnailBuffer<'a> {
    /// Nothing supplied; the parser allocates
    #[default]
    None,
    /// Caller-provided storage
    Borrowed(&'a mut [u8]),
    /// Allocated by the parser, owned by the caller
    Owned(Vec<u8>),
}

/// Thumbnail request and result
#[derive(Debug, Default)]
pub struct ThumbnailAttr<'a> {
    pub width: u32,
    pub height: u32,
    pub vir_width: u32,
    pub vir_height: u32,
    pub buffer: ThumbnailBuffer<'a>,
    /// Valid bytes in `buffer`
    pub size: usize,
}

impl<'a> ThumbnailAttr<'a> {
    /// Request that copies into caller storage
    pub fn with_buffer(buf: &'a mut [u8]) -> Self {
        Self {
            buffer: ThumbnailBuffer::Borrowed(buf),
            ..Self::default()
        }
    }

    /// Extracted thumbnail bytes, if any
    pub fn data(&self) -> Option<&[u8]> {
        match &self.buffer {
            ThumbnailBuffer::None => None,
            ThumbnailBuffer::Borrowed(buf) => buf.get(..self.size),
            ThumbnailBuffer::Owned(buf) => buf.get(..self.size),
        }
    }
}
