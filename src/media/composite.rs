// SPDX-License-Identifier: GPL-3.0-only

//! Thumbnail compositing
//!
//! Produces a photo whose APP1 Exif segment carries the thumbnail frame as the
//! IFD1 JPEG interchange image:
//!
//! ```text
//! FFD8 | FFE1 len "Exif\0\0" | TIFF(MM) IFD0 → IFD1{0x0201, 0x0202} | thumbnail JPEG | rest of photo
//! ```
//!
//! The thumbnail is the tail of the APP1 segment, which is exactly where
//! [`locate_embedded_thumbnail`](super::locate_embedded_thumbnail) looks for it.

use crate::constants::jpeg;
use crate::errors::{ContainerError, PhotoError, PhotoResult};
use tracing::trace;

/// TIFF header (8) + empty IFD0 (2 + 4) + IFD1 with two entries (2 + 24 + 4)
const TIFF_PREFIX_LEN: usize = 8 + 6 + 30;

/// Offset of IFD1 inside the TIFF block
const IFD1_OFFSET: u32 = 14;

fn ensure_soi(bytes: &[u8]) -> PhotoResult<()> {
    if bytes.len() < 2 || bytes[0] != jpeg::MARKER || bytes[1] != jpeg::SOI {
        return Err(ContainerError::MissingMarker { offset: 0 }.into());
    }
    Ok(())
}

/// Part of `full` after its SOI, minus a leading APP1 Exif segment
fn photo_body(full: &[u8]) -> PhotoResult<&[u8]> {
    let body = &full[2..];
    let is_exif = body.len() >= 10
        && body[0] == jpeg::MARKER
        && body[1] == jpeg::APP1
        && &body[4..10] == jpeg::EXIF_HEADER;
    if !is_exif {
        return Ok(body);
    }

    let len = usize::from(u16::from_be_bytes([body[2], body[3]]));
    if len < 2 {
        return Err(ContainerError::BadSegmentLength { offset: 2, len }.into());
    }
    body.get(2 + len..).ok_or_else(|| {
        ContainerError::SegmentOverrun {
            offset: 2,
            len,
            stream_len: full.len(),
        }
        .into()
    })
}

fn push_entry(tiff: &mut Vec<u8>, tag: u16, value: u32) {
    tiff.extend_from_slice(&tag.to_be_bytes());
    tiff.extend_from_slice(&jpeg::TIFF_LONG.to_be_bytes());
    tiff.extend_from_slice(&1u32.to_be_bytes());
    tiff.extend_from_slice(&value.to_be_bytes());
}

/// Big-endian TIFF block pointing IFD1 at a thumbnail of `thumb_len` bytes
fn tiff_prefix(thumb_len: u32) -> Vec<u8> {
    let mut tiff = Vec::with_capacity(TIFF_PREFIX_LEN);
    tiff.extend_from_slice(b"MM\0*");
    tiff.extend_from_slice(&8u32.to_be_bytes());
    // IFD0: no entries, chained to IFD1
    tiff.extend_from_slice(&0u16.to_be_bytes());
    tiff.extend_from_slice(&IFD1_OFFSET.to_be_bytes());
    // IFD1: JPEGInterchangeFormat / JPEGInterchangeFormatLength
    tiff.extend_from_slice(&2u16.to_be_bytes());
    push_entry(&mut tiff, jpeg::TAG_JPEG_IF_OFFSET, TIFF_PREFIX_LEN as u32);
    push_entry(&mut tiff, jpeg::TAG_JPEG_IF_LENGTH, thumb_len);
    tiff.extend_from_slice(&0u32.to_be_bytes());
    tiff
}

/// Splice `thumbnail` into `full` as its Exif thumbnail, writing into `out`.
///
/// Returns the number of bytes written. Deterministic for a given input and
/// never writes past `out.len()`.
pub fn composite_thumbnail(full: &[u8], thumbnail: &[u8], out: &mut [u8]) -> PhotoResult<usize> {
    ensure_soi(full)?;
    ensure_soi(thumbnail)?;

    let body = photo_body(full)?;
    let app1_len = 2 + jpeg::EXIF_HEADER.len() + TIFF_PREFIX_LEN + thumbnail.len();
    if app1_len > jpeg::MAX_SEGMENT_LEN {
        return Err(PhotoError::ThumbnailTooLarge {
            len: thumbnail.len(),
        });
    }

    let total = 2 + 2 + app1_len + body.len();
    if total > out.len() {
        return Err(PhotoError::BufferOverflow {
            needed: total,
            capacity: out.len(),
        });
    }

    let tiff = tiff_prefix(thumbnail.len() as u32);
    let mut pos = 0;
    let mut put = |bytes: &[u8]| {
        out[pos..pos + bytes.len()].copy_from_slice(bytes);
        pos += bytes.len();
    };
    put(&[jpeg::MARKER, jpeg::SOI, jpeg::MARKER, jpeg::APP1]);
    put(&(app1_len as u16).to_be_bytes());
    put(&jpeg::EXIF_HEADER[..]);
    put(tiff.as_slice());
    put(thumbnail);
    put(body);

    trace!(
        photo = full.len(),
        thumbnail = thumbnail.len(),
        total,
        "Composited thumbnail"
    );
    Ok(total)
}
