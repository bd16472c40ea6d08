// SPDX-License-Identifier: GPL-3.0-only

//! Pipeline-wide constants

use std::time::Duration;

/// Number of camera slots in the pipeline registry
pub const MAX_CAMERAS: u32 = 4;

/// Default bounded wait on the primary encoder queue
pub const PRIMARY_ACQUIRE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Default bounded wait on the thumbnail encoder queue
pub const THUMBNAIL_ACQUIRE_TIMEOUT: Duration = Duration::from_millis(50);

/// Default wait for the full-resolution frame to be staged.
///
/// Lapse capture produces one full frame per interval while thumbnail frames
/// arrive at the sensor rate.
pub const HANDOFF_TIMEOUT: Duration = Duration::from_millis(2000);

/// Pause after a non-timeout queue failure
pub const HARDWARE_ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Divisor applied to `max_width * max_height` for the encoder stream buffer
pub const DEFAULT_ENCODER_BUFFER_DIVISOR: u32 = 2;

/// Encoder stream buffers
pub const ENCODER_STREAM_BUF_COUNT: u32 = 1;

/// Horizontal macroblock alignment for embedded thumbnails
pub const THUMB_WIDTH_ALIGN: u32 = 4;

/// Vertical macroblock alignment for embedded thumbnails
pub const THUMB_HEIGHT_ALIGN: u32 = 2;

/// Maximum number of MPF large thumbnails the encoder accepts
pub const MPF_LARGE_THUMB_NUM_MAX: usize = 2;

/// Byte written just past the mapped range of a fresh scratch file
pub const MAPPED_SENTINEL: u8 = 0xFF;

/// Default location of the scratch files backing the shared buffers
pub const DEFAULT_SCRATCH_DIR: &str = "/tmp";

/// Scratch file name for the staged full-resolution photo
pub fn staging_file_name(camera: u32) -> String {
    format!(".photo_{camera}_staging.jpeg")
}

/// Scratch file name for the composited photo
pub fn composite_file_name(camera: u32) -> String {
    format!(".photo_{camera}_composite.jpeg")
}

/// Size of a YUV 4:2:0 frame, used to bound scratch buffers
pub const fn yuv420_frame_len(width: u32, height: u32) -> usize {
    (width as usize) * (height as usize) * 3 / 2
}

/// Round `value` up to the next multiple of `align`
pub const fn align_up(value: u32, align: u32) -> u32 {
    value.div_ceil(align) * align
}

/// JPEG marker bytes
pub mod jpeg {
    /// Marker prefix
    pub const MARKER: u8 = 0xFF;
    /// Start of image
    pub const SOI: u8 = 0xD8;
    /// End of image
    pub const EOI: u8 = 0xD9;
    /// Start of scan
    pub const SOS: u8 = 0xDA;
    /// APP1 (Exif)
    pub const APP1: u8 = 0xE1;
    /// Exif identifier at the start of an APP1 payload
    pub const EXIF_HEADER: &[u8; 6] = b"Exif\0\0";
    /// Largest value of a segment length field
    pub const MAX_SEGMENT_LEN: usize = 0xFFFF;
    /// TIFF tag: offset of the JPEG thumbnail
    pub const TAG_JPEG_IF_OFFSET: u16 = 0x0201;
    /// TIFF tag: length of the JPEG thumbnail
    pub const TAG_JPEG_IF_LENGTH: u16 = 0x0202;
    /// TIFF type LONG
    pub const TIFF_LONG: u16 = 4;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(160, 4), 160);
        assert_eq!(align_up(161, 4), 164);
        assert_eq!(align_up(119, 2), 120);
        assert_eq!(align_up(0, 4), 0);
    }

    #[test]
    fn test_scratch_names_are_per_camera() {
        assert_ne!(staging_file_name(0), staging_file_name(1));
        assert_ne!(staging_file_name(0), composite_file_name(0));
    }
}
