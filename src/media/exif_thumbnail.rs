// SPDX-License-Identifier: GPL-3.0-only

//! Embedded thumbnail lookup in JPEG files
//!
//! Walks the marker chain of a JPEG stream until the APP1 Exif segment and
//! returns the nested JPEG that the encoder stored as the DCF thumbnail.
//! Only the first Exif segment and the first nested start-of-image are
//! considered.

use super::{ThumbnailAttr, ThumbnailBuffer, ThumbnailKind};
use crate::config::ThumbConfig;
use crate::constants::{THUMB_HEIGHT_ALIGN, THUMB_WIDTH_ALIGN, align_up, jpeg};
use crate::errors::{ContainerError, PhotoError, PhotoResult};
use memmap2::Mmap;
use std::fs::File;
use std::ops::Range;
use std::path::Path;
use tracing::{debug, warn};

/// Big-endian u16 at `offset`, if in bounds
fn be16(bytes: &[u8], offset: usize) -> Option<usize> {
    let hi = *bytes.get(offset)?;
    let lo = *bytes.get(offset + 1)?;
    Some(usize::from(u16::from_be_bytes([hi, lo])))
}

/// Find the byte range of the thumbnail embedded in the Exif segment.
///
/// The scan starts at offset 0 and expects a marker (`0xFF xx`) at every
/// step. Start/end-of-image markers carry no length; every other marker is
/// followed by a big-endian length that covers itself and the payload. The
/// thumbnail runs from the nested `0xFFD8` to the end of the Exif segment.
pub fn locate_embedded_thumbnail(bytes: &[u8]) -> Result<Range<usize>, ContainerError> {
    let stream_len = bytes.len();
    let mut cur = 0usize;

    let segment = loop {
        if cur + 1 >= stream_len {
            return Err(ContainerError::ExifNotFound);
        }
        if bytes[cur] != jpeg::MARKER {
            return Err(ContainerError::MissingMarker { offset: cur });
        }

        let marker = bytes[cur + 1];
        if marker == jpeg::SOI || marker == jpeg::EOI {
            cur += 2;
            continue;
        }
        // Entropy-coded data follows SOS; no header segments remain
        if marker == jpeg::SOS {
            return Err(ContainerError::ExifNotFound);
        }

        let len = be16(bytes, cur + 2).ok_or(ContainerError::SegmentOverrun {
            offset: cur,
            len: 0,
            stream_len,
        })?;
        // The length covers its own two bytes
        if len < 2 {
            return Err(ContainerError::BadSegmentLength { offset: cur, len });
        }
        let length_field = cur + 2;
        if length_field + len > stream_len {
            return Err(ContainerError::SegmentOverrun {
                offset: cur,
                len,
                stream_len,
            });
        }

        let payload = length_field + 2;
        if marker == jpeg::APP1 && bytes.get(payload..payload + 4) == Some(&jpeg::EXIF_HEADER[..4])
        {
            break length_field..length_field + len;
        }

        cur = length_field + len;
    };

    // Instead of parsing the TIFF structure, search for the nested SOI
    let nested = (segment.start + 2..segment.end.saturating_sub(1))
        .find(|&i| bytes[i] == jpeg::MARKER && bytes[i + 1] == jpeg::SOI)
        .ok_or(ContainerError::ThumbnailNotFound {
            offset: segment.start - 2,
        })?;

    Ok(nested..segment.end)
}

/// Map a JPEG file read-only
fn map_file(path: &Path) -> PhotoResult<Mmap> {
    let file = File::open(path).map_err(|e| PhotoError::io(path, e))?;
    // SAFETY: read-only mapping; the photo is not modified while inspected
    unsafe { Mmap::map(&file) }.map_err(|e| PhotoError::io(path, e))
}

fn check_kind(kind: ThumbnailKind) -> PhotoResult<()> {
    match kind {
        ThumbnailKind::Dcf => Ok(()),
        other => Err(PhotoError::Unsupported(format!(
            "{other:?} thumbnails are not extracted"
        ))),
    }
}

/// Copy the embedded thumbnail of `path` into `buf`.
///
/// Returns the thumbnail size. Fails with `BufferOverflow` when `buf` is
/// smaller than the thumbnail; the reported size lets the caller retry.
pub fn get_embedded_thumbnail(
    path: &Path,
    kind: ThumbnailKind,
    buf: &mut [u8],
) -> PhotoResult<usize> {
    check_kind(kind)?;
    let file = map_file(path)?;
    let range = locate_embedded_thumbnail(&file).inspect_err(|e| {
        warn!(path = %path.display(), error = %e, "Bad JPEG file");
    })?;

    let len = range.len();
    let capacity = buf.len();
    let dst = buf.get_mut(..len).ok_or(PhotoError::BufferOverflow {
        needed: len,
        capacity,
    })?;
    dst.copy_from_slice(&file[range]);
    debug!(path = %path.display(), len, "Extracted embedded thumbnail");
    Ok(len)
}

/// Extract the embedded thumbnail described by `attr`.
///
/// Missing dimensions default to the configured thumbnail size, aligned to
/// the encoder's macroblock grid; missing virtual dimensions default to the
/// dimensions. Without a caller buffer the thumbnail is returned in an owned
/// allocation sized to fit.
pub fn get_embedded_thumbnail_ex<'a>(
    path: &Path,
    kind: ThumbnailKind,
    mut attr: ThumbnailAttr<'a>,
    thumb_cfg: &ThumbConfig,
) -> PhotoResult<ThumbnailAttr<'a>> {
    check_kind(kind)?;

    if attr.width == 0 || attr.height == 0 {
        attr.width = align_up(thumb_cfg.width, THUMB_WIDTH_ALIGN);
        attr.height = align_up(thumb_cfg.height, THUMB_HEIGHT_ALIGN);
    }
    if attr.vir_width == 0 || attr.vir_height == 0 {
        attr.vir_width = attr.width;
        attr.vir_height = attr.height;
    }

    let file = map_file(path)?;
    let range = locate_embedded_thumbnail(&file)?;
    let thumbnail = &file[range];

    attr.buffer = match attr.buffer {
        ThumbnailBuffer::Borrowed(buf) => {
            let capacity = buf.len();
            let dst = buf.get_mut(..thumbnail.len()).ok_or(PhotoError::BufferOverflow {
                needed: thumbnail.len(),
                capacity,
            })?;
            dst.copy_from_slice(thumbnail);
            attr.size = thumbnail.len();
            ThumbnailBuffer::Borrowed(buf)
        }
        ThumbnailBuffer::Owned(_) | ThumbnailBuffer::None => {
            attr.size = thumbnail.len();
            ThumbnailBuffer::Owned(thumbnail.to_vec())
        }
    };

    Ok(attr)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// SOI, APP1 Exif wrapping a tiny nested JPEG, then SOS
    fn sample() -> (Vec<u8>, Range<usize>) {
        let thumb = [0xFF, 0xD8, 0x01, 0x02, 0xFF, 0xD9];
        let mut payload = b"Exif\0\0MM\0*".to_vec();
        payload.extend_from_slice(&thumb);
        let seg_len = payload.len() + 2;

        let mut jpg = vec![0xFF, 0xD8, 0xFF, 0xE1];
        jpg.extend_from_slice(&(seg_len as u16).to_be_bytes());
        jpg.extend_from_slice(&payload);
        let end = jpg.len();
        jpg.extend_from_slice(&[0xFF, 0xDA, 0x00, 0x02, 0x11, 0x22, 0xFF, 0xD9]);
        (jpg, end - thumb.len()..end)
    }

    #[test]
    fn test_finds_nested_thumbnail() {
        let (jpg, expected) = sample();
        assert_eq!(locate_embedded_thumbnail(&jpg), Ok(expected));
    }

    #[test]
    fn test_skips_other_segments() {
        let (jpg, expected) = sample();
        let app0 = [0xFF, 0xE0, 0x00, 0x04, 0xAA, 0xBB];
        let mut with_app0 = jpg[..2].to_vec();
        with_app0.extend_from_slice(&app0);
        with_app0.extend_from_slice(&jpg[2..]);
        let shifted = expected.start + app0.len()..expected.end + app0.len();
        assert_eq!(locate_embedded_thumbnail(&with_app0), Ok(shifted));
    }

    #[test]
    fn test_length_past_eof_is_malformed() {
        let (mut jpg, _) = sample();
        jpg[4] = 0x7F;
        assert!(matches!(
            locate_embedded_thumbnail(&jpg),
            Err(ContainerError::SegmentOverrun { offset: 2, .. })
        ));
    }

    #[test]
    fn test_short_segment_length_is_malformed() {
        for len in [0u8, 1] {
            let jpg = [0xFF, 0xD8, 0xFF, 0xE0, 0x00, len, 0xFF, 0xD9];
            assert_eq!(
                locate_embedded_thumbnail(&jpg),
                Err(ContainerError::BadSegmentLength {
                    offset: 2,
                    len: usize::from(len)
                })
            );
        }
    }

    #[test]
    fn test_missing_marker_is_malformed() {
        let (mut jpg, _) = sample();
        jpg[2] = 0x00;
        assert_eq!(
            locate_embedded_thumbnail(&jpg),
            Err(ContainerError::MissingMarker { offset: 2 })
        );
    }

    #[test]
    fn test_plain_jpeg_has_no_exif() {
        let jpg = [0xFF, 0xD8, 0xFF, 0xDB, 0x00, 0x03, 0x00, 0xFF, 0xDA, 0x00, 0x02];
        assert_eq!(
            locate_embedded_thumbnail(&jpg),
            Err(ContainerError::ExifNotFound)
        );
    }

    #[test]
    fn test_exif_without_thumbnail() {
        let payload = b"Exif\0\0MM\0*\0\0\0\x08";
        let mut jpg = vec![0xFF, 0xD8, 0xFF, 0xE1];
        jpg.extend_from_slice(&((payload.len() + 2) as u16).to_be_bytes());
        jpg.extend_from_slice(payload);
        assert_eq!(
            locate_embedded_thumbnail(&jpg),
            Err(ContainerError::ThumbnailNotFound { offset: 2 })
        );
    }

    #[test]
    fn test_ex_defaults_dimensions_and_allocates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.jpg");
        let (jpg, range) = sample();
        std::fs::write(&path, &jpg).unwrap();

        let cfg = ThumbConfig {
            width: 161,
            height: 119,
            ..ThumbConfig::default()
        };
        let attr =
            get_embedded_thumbnail_ex(&path, ThumbnailKind::Dcf, ThumbnailAttr::default(), &cfg)
                .unwrap();
        assert_eq!((attr.width, attr.height), (164, 120));
        assert_eq!((attr.vir_width, attr.vir_height), (164, 120));
        assert_eq!(attr.data(), Some(&jpg[range]));
    }

    #[test]
    fn test_small_caller_buffer_reports_needed_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.jpg");
        std::fs::write(&path, sample().0).unwrap();

        let mut small = [0u8; 2];
        assert!(matches!(
            get_embedded_thumbnail(&path, ThumbnailKind::Dcf, &mut small),
            Err(PhotoError::BufferOverflow { needed: 6, capacity: 2 })
        ));
    }

    #[test]
    fn test_ex_copies_into_caller_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.jpg");
        let (jpg, range) = sample();
        std::fs::write(&path, &jpg).unwrap();

        let mut buf = [0u8; 32];
        let attr = get_embedded_thumbnail_ex(
            &path,
            ThumbnailKind::Dcf,
            ThumbnailAttr::with_buffer(&mut buf),
            &ThumbConfig::default(),
        )
        .unwrap();
        assert_eq!(attr.size, range.len());
        assert!(matches!(attr.buffer, ThumbnailBuffer::Borrowed(_)));
        assert_eq!(attr.data(), Some(&jpg[range.clone()]));
        drop(attr);
        assert_eq!(&buf[..range.len()], &jpg[range]);
    }

    #[test]
    fn test_ex_small_caller_buffer_overflows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.jpg");
        std::fs::write(&path, sample().0).unwrap();

        let mut small = [0u8; 3];
        let result = get_embedded_thumbnail_ex(
            &path,
            ThumbnailKind::Dcf,
            ThumbnailAttr::with_buffer(&mut small),
            &ThumbConfig::default(),
        );
        assert!(matches!(
            result,
            Err(PhotoError::BufferOverflow { needed: 6, capacity: 3 })
        ));
    }

    #[test]
    fn test_mpf_kinds_unsupported() {
        let mut buf = [0u8; 16];
        let result = get_embedded_thumbnail(Path::new("/nonexistent"), ThumbnailKind::Mpf1, &mut buf);
        assert!(matches!(result, Err(PhotoError::Unsupported(_))));
    }
}
