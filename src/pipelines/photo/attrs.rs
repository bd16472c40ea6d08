// SPDX-License-Identifier: GPL-3.0-only

//! Stage attribute derivation
//!
//! Pure transformations from the parameter store to the attribute structs
//! handed to the hardware. Nothing here touches a stage.

use crate::backends::hardware::{
    CaptureAttr, EncoderAttr, EncoderTuning, FrameRate, JpegAttr, ReceiveMode, ScalerAttr, Size,
};
use crate::config::{PhotoConfig, SensorConfig, ThumbConfig};
use crate::constants::{
    ENCODER_STREAM_BUF_COUNT, MPF_LARGE_THUMB_NUM_MAX, THUMB_HEIGHT_ALIGN, THUMB_WIDTH_ALIGN,
    align_up,
};

/// How MPF large thumbnails are produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MpfMode {
    /// No MPF output
    #[default]
    None,
    /// One large thumbnail
    Single,
    /// Up to `MPF_LARGE_THUMB_NUM_MAX` large thumbnails
    Multi,
}

/// MPF request
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MpfAttr {
    pub mode: MpfMode,
    /// Requested sizes, unaligned
    pub large_thumbs: Vec<Size>,
}

/// Thumbnail embedding parameters of a photo stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoThumbAttr {
    /// Let the encoder embed a DCF thumbnail itself
    pub support_dcf: bool,
    pub mpf: MpfAttr,
}

impl Default for PhotoThumbAttr {
    fn default() -> Self {
        Self {
            support_dcf: true,
            mpf: MpfAttr::default(),
        }
    }
}

/// Thumbnail size aligned to the encoder macroblock grid
pub fn align_thumb(size: Size) -> Size {
    Size::new(
        align_up(size.width, THUMB_WIDTH_ALIGN),
        align_up(size.height, THUMB_HEIGHT_ALIGN),
    )
}

/// Worst-case JPEG size bound for an encoder stream buffer
pub fn encoder_buffer_size(max: Size, divisor: u32) -> u32 {
    let bytes = u64::from(max.width) * u64::from(max.height) / u64::from(divisor.max(1));
    u32::try_from(bytes).unwrap_or(u32::MAX)
}

fn jpeg_attr(thumb: &PhotoThumbAttr) -> JpegAttr {
    let (receive_mode, count) = match thumb.mpf.mode {
        MpfMode::None => (ReceiveMode::Unset, 0),
        MpfMode::Single => (ReceiveMode::Single, 1),
        MpfMode::Multi => (ReceiveMode::Multi, MPF_LARGE_THUMB_NUM_MAX),
    };

    JpegAttr {
        support_dcf: thumb.support_dcf,
        receive_mode,
        large_thumbs: thumb
            .mpf
            .large_thumbs
            .iter()
            .take(count)
            .map(|size| align_thumb(*size))
            .collect(),
    }
}

/// Photo encoder attributes for a sensor
pub fn encoder_attr(sensor: &SensorConfig, thumb: &PhotoThumbAttr, divisor: u32) -> EncoderAttr {
    let photo = &sensor.photo;
    let size = Size::new(photo.image_width, photo.image_height);
    let max_size = Size::new(sensor.max_width, sensor.max_height);

    EncoderAttr {
        pixel_format: photo.capture.pixel_format,
        max_size,
        size,
        vir_size: size,
        stream_buf_count: ENCODER_STREAM_BUF_COUNT,
        buf_size: encoder_buffer_size(max_size, divisor),
        jpeg: jpeg_attr(thumb),
    }
}

/// Runtime tuning for the photo encoder.
///
/// Combo encoders share a stream buffer with the group owner, so they wrap.
pub fn encoder_tuning(photo: &PhotoConfig) -> EncoderTuning {
    EncoderTuning {
        ref_buf_share: true,
        buf_wrap: photo.enable_combo,
        qfactor: photo.qfactor,
    }
}

/// Capture channel attributes at init
pub fn capture_attr(sensor: &SensorConfig) -> CaptureAttr {
    let capture = &sensor.photo.capture;
    CaptureAttr {
        size: Size::new(capture.width, capture.height),
        max_size: Size::new(sensor.max_width, sensor.max_height),
        pixel_format: capture.pixel_format,
    }
}

/// Scaler attributes: group sized to the sensor maximum, channel to the photo
pub fn scaler_attr(sensor: &SensorConfig) -> ScalerAttr {
    let photo = &sensor.photo;
    ScalerAttr {
        max_size: Size::new(sensor.max_width, sensor.max_height),
        size: Size::new(photo.image_width, photo.image_height),
        pixel_format: photo.capture.pixel_format,
        frame_rate: FrameRate::PassThrough,
    }
}

/// Whether the capture channel has to be resampled to reach the photo size
pub fn needs_scaler(photo: &PhotoConfig) -> bool {
    photo.capture.width != photo.image_width || photo.capture.height != photo.image_height
}

/// Attributes applied by a resolution reset.
///
/// The encoder keeps everything but its picture size; the capture channel
/// is pointed at the new photo size.
pub fn reset_attrs(sensor: &SensorConfig, current: &EncoderAttr) -> (EncoderAttr, CaptureAttr) {
    let photo = &sensor.photo;
    let size = Size::new(photo.image_width, photo.image_height);

    let encoder = EncoderAttr {
        size,
        vir_size: size,
        ..current.clone()
    };
    let capture = CaptureAttr {
        size,
        max_size: Size::new(sensor.max_width, sensor.max_height),
        pixel_format: photo.capture.pixel_format,
    };
    (encoder, capture)
}

/// Thumbnail capture channel attributes
pub fn thumbnail_capture_attr(thumb: &ThumbConfig, sensor: &SensorConfig) -> CaptureAttr {
    CaptureAttr {
        size: align_thumb(Size::new(thumb.width, thumb.height)),
        max_size: Size::new(sensor.max_width, sensor.max_height),
        pixel_format: sensor.photo.capture.pixel_format,
    }
}

/// Thumbnail encoder attributes; no nested thumbnails
pub fn thumbnail_encoder_attr(thumb: &ThumbConfig, sensor: &SensorConfig, divisor: u32) -> EncoderAttr {
    let size = align_thumb(Size::new(thumb.width, thumb.height));
    EncoderAttr {
        pixel_format: sensor.photo.capture.pixel_format,
        max_size: size,
        size,
        vir_size: size,
        stream_buf_count: ENCODER_STREAM_BUF_COUNT,
        buf_size: encoder_buffer_size(size, divisor),
        jpeg: JpegAttr::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn sensor() -> SensorConfig {
        Config::default().sensors.remove(0)
    }

    #[test]
    fn test_buffer_size_uses_sensor_maximum() {
        let attr = encoder_attr(&sensor(), &PhotoThumbAttr::default(), 2);
        assert_eq!(attr.buf_size, 2688 * 1520 / 2);
        assert_eq!(attr.size, Size::new(1920, 1080));
        assert_eq!(attr.vir_size, attr.size);
        assert_eq!(attr.max_size, Size::new(2688, 1520));
    }

    #[test]
    fn test_buffer_divisor_is_configurable() {
        let attr = encoder_attr(&sensor(), &PhotoThumbAttr::default(), 4);
        assert_eq!(attr.buf_size, 2688 * 1520 / 4);
    }

    #[test]
    fn test_thumb_alignment() {
        assert_eq!(align_thumb(Size::new(321, 181)), Size::new(324, 182));
        assert_eq!(align_thumb(Size::new(320, 180)), Size::new(320, 180));
    }

    #[test]
    fn test_mpf_single_keeps_first_size() {
        let thumb = PhotoThumbAttr {
            support_dcf: false,
            mpf: MpfAttr {
                mode: MpfMode::Single,
                large_thumbs: vec![Size::new(639, 359), Size::new(1023, 575)],
            },
        };
        let jpeg = encoder_attr(&sensor(), &thumb, 2).jpeg;
        assert_eq!(jpeg.receive_mode, ReceiveMode::Single);
        assert_eq!(jpeg.large_thumbs, vec![Size::new(640, 360)]);
        assert!(!jpeg.support_dcf);
    }

    #[test]
    fn test_mpf_multi_is_capped() {
        let thumb = PhotoThumbAttr {
            support_dcf: true,
            mpf: MpfAttr {
                mode: MpfMode::Multi,
                large_thumbs: vec![Size::new(64, 64); 5],
            },
        };
        let jpeg = encoder_attr(&sensor(), &thumb, 2).jpeg;
        assert_eq!(jpeg.receive_mode, ReceiveMode::Multi);
        assert_eq!(jpeg.large_thumbs.len(), MPF_LARGE_THUMB_NUM_MAX);
    }

    #[test]
    fn test_scaler_only_when_sizes_differ() {
        let mut sensor = sensor();
        assert!(!needs_scaler(&sensor.photo));
        sensor.photo.image_width = 1280;
        sensor.photo.image_height = 720;
        assert!(needs_scaler(&sensor.photo));

        let scaler = scaler_attr(&sensor);
        assert_eq!(scaler.max_size, Size::new(2688, 1520));
        assert_eq!(scaler.size, Size::new(1280, 720));
        assert_eq!(scaler.frame_rate, FrameRate::PassThrough);
    }

    #[test]
    fn test_reset_only_changes_picture_size() {
        let mut sensor = sensor();
        let current = encoder_attr(&sensor, &PhotoThumbAttr::default(), 2);
        sensor.photo.image_width = 2560;
        sensor.photo.image_height = 1440;

        let (encoder, capture) = reset_attrs(&sensor, &current);
        assert_eq!(encoder.size, Size::new(2560, 1440));
        assert_eq!(encoder.vir_size, Size::new(2560, 1440));
        assert_eq!(encoder.buf_size, current.buf_size);
        assert_eq!(encoder.jpeg, current.jpeg);
        assert_eq!(capture.size, Size::new(2560, 1440));
        assert_eq!(capture.max_size, Size::new(2688, 1520));
    }

    #[test]
    fn test_combo_tuning_wraps_buffer() {
        let mut sensor = sensor();
        assert!(!encoder_tuning(&sensor.photo).buf_wrap);
        sensor.photo.enable_combo = true;
        let tuning = encoder_tuning(&sensor.photo);
        assert!(tuning.buf_wrap && tuning.ref_buf_share);
        assert_eq!(tuning.qfactor, 70);
    }
}
