// SPDX-License-Identifier: GPL-3.0-only
// Shared types for the hardware pipeline abstraction

//! Shared types for hardware pipeline stages

use serde::{Deserialize, Serialize};

/// Kind of hardware module a stage lives on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    /// Sensor/ISP output channel
    Capture,
    /// Hardware scaler channel
    Scaler,
    /// Hardware encoder channel
    Encoder,
}

impl std::fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModuleKind::Capture => write!(f, "capture"),
            ModuleKind::Scaler => write!(f, "scaler"),
            ModuleKind::Encoder => write!(f, "encoder"),
        }
    }
}

/// Identifies one node of the hardware pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StageDescriptor {
    pub kind: ModuleKind,
    pub device: i32,
    pub channel: i32,
}

impl StageDescriptor {
    pub const fn capture(device: i32, channel: i32) -> Self {
        Self {
            kind: ModuleKind::Capture,
            device,
            channel,
        }
    }

    pub const fn scaler(device: i32, channel: i32) -> Self {
        Self {
            kind: ModuleKind::Scaler,
            device,
            channel,
        }
    }

    pub const fn encoder(device: i32, channel: i32) -> Self {
        Self {
            kind: ModuleKind::Encoder,
            device,
            channel,
        }
    }
}

impl std::fmt::Display for StageDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}:{}]", self.kind, self.device, self.channel)
    }
}

/// Pixel layout flowing between capture, scaler and encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PixelFormat {
    /// YUV 4:2:0 semi-planar
    #[default]
    Nv12,
    /// YUV 4:2:2 semi-planar
    Nv16,
    /// YUV 4:2:2 packed
    Yuyv,
    /// 24-bit RGB
    Rgb888,
}

/// Width and height pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Frame-rate control of a scaler channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameRate {
    /// Forward every input frame
    #[default]
    PassThrough,
    /// Convert between two fixed rates
    Fixed { src: u32, dst: u32 },
}

/// Capture channel attributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureAttr {
    pub size: Size,
    /// ISP maximum output size
    pub max_size: Size,
    pub pixel_format: PixelFormat,
}

/// Scaler group + channel attributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalerAttr {
    /// Group maximum input size
    pub max_size: Size,
    /// Channel output size
    pub size: Size,
    pub pixel_format: PixelFormat,
    pub frame_rate: FrameRate,
}

/// How the encoder receives pictures for MPF output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReceiveMode {
    Single,
    Multi,
    #[default]
    Unset,
}

/// JPEG-specific encoder attributes
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JpegAttr {
    /// Embed a DCF (Exif) thumbnail
    pub support_dcf: bool,
    pub receive_mode: ReceiveMode,
    /// MPF large thumbnail sizes, already aligned
    pub large_thumbs: Vec<Size>,
}

/// Encoder channel attributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderAttr {
    pub pixel_format: PixelFormat,
    pub max_size: Size,
    pub size: Size,
    /// Virtual (stride) size
    pub vir_size: Size,
    pub stream_buf_count: u32,
    /// Stream buffer size in bytes
    pub buf_size: u32,
    pub jpeg: JpegAttr,
}

impl EncoderAttr {
    /// Whether the encoder is configured for the given picture size
    pub fn matches_resolution(&self, width: u32, height: u32) -> bool {
        self.size.width == width && self.size.height == height
    }
}

/// Encoder runtime tuning applied after creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderTuning {
    /// Share reference buffers between channels
    pub ref_buf_share: bool,
    /// Wrap the stream buffer instead of allocating per frame
    pub buf_wrap: bool,
    /// JPEG quality factor
    pub qfactor: u32,
}

/// Handle of a hardware memory block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockHandle(pub u64);

/// CPU view of a hardware block, valid while the mapping is held
pub trait BlockMapping {
    fn as_bytes(&self) -> &[u8];
}

/// Encoded frame borrowed from a stage's output queue.
///
/// Valid only until released back to the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    pub stage: StageDescriptor,
    pub sequence: u32,
    pub len: usize,
    pub block: BlockHandle,
}

/// Hardware operations, used for error reporting and call journals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HwOp {
    CreateCapture,
    DestroyCapture,
    SetCaptureAttr,
    CreateScaler,
    DestroyScaler,
    SetScalerAttr,
    CreateEncoder,
    DestroyEncoder,
    GetEncoderAttr,
    SetEncoderAttr,
    TuneEncoder,
    AttachCombo,
    Bind,
    Unbind,
    StartReceive,
    StopReceive,
    AcquireFrame,
    ReleaseFrame,
    MapBlock,
}

impl std::fmt::Display for HwOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}
