// SPDX-License-Identifier: MPL-2.0

//! Error types for the photo capture core

use crate::backends::hardware::{HwOp, StageDescriptor};
use std::path::PathBuf;

/// Result type alias using PhotoError
pub type PhotoResult<T> = Result<T, PhotoError>;

/// Main error type for the photo pipeline
#[derive(Debug, thiserror::Error)]
pub enum PhotoError {
    /// Missing or invalid configuration entry
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// Camera id outside the registry bounds
    #[error("Invalid camera id {camera} (max {max})")]
    InvalidCamera { camera: u32, max: u32 },
    /// Operation requires an initialized camera
    #[error("Camera {0} is not initialized")]
    NotInitialized(u32),
    /// Operation not valid in the current lifecycle state
    #[error("Camera {camera} cannot {operation} while {state}")]
    InvalidState {
        camera: u32,
        operation: &'static str,
        state: crate::pipelines::photo::LifecycleState,
    },
    /// Requested mode or topology is not supported
    #[error("Unsupported: {0}")]
    Unsupported(String),
    /// File open/seek/write/map failure
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// JPEG/EXIF structural violation
    #[error("Malformed container: {0}")]
    MalformedContainer(#[from] ContainerError),
    /// A write would exceed a fixed-capacity buffer
    #[error("Buffer overflow: need {needed} bytes, capacity {capacity}")]
    BufferOverflow { needed: usize, capacity: usize },
    /// Thumbnail does not fit into a single APP1 segment
    #[error("Thumbnail of {len} bytes does not fit into an APP1 segment")]
    ThumbnailTooLarge { len: usize },
    /// Hardware pipeline call failed
    #[error("Hardware error: {0}")]
    Hardware(#[from] HardwareError),
    /// Harvester thread could not be started
    #[error("Failed to spawn {name}: {source}")]
    TaskSpawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

impl PhotoError {
    /// Wrap an I/O error with the path it happened on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PhotoError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Structural errors found while walking a JPEG byte stream
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContainerError {
    /// Expected a 0xFF marker byte
    #[error("0xFF expected at offset {offset:#010x}")]
    MissingMarker { offset: usize },
    /// Segment length runs past the end of the stream
    #[error("segment at offset {offset:#010x} ({len} bytes) exceeds stream of {stream_len} bytes")]
    SegmentOverrun {
        offset: usize,
        len: usize,
        stream_len: usize,
    },
    /// Segment length smaller than its own length field
    #[error("segment at offset {offset:#010x} declares length {len}, below the 2-byte minimum")]
    BadSegmentLength { offset: usize, len: usize },
    /// No APP1 Exif segment before the image data
    #[error("no Exif segment found")]
    ExifNotFound,
    /// Exif segment carries no nested start-of-image
    #[error("Exif segment at offset {offset:#010x} has no embedded thumbnail")]
    ThumbnailNotFound { offset: usize },
}

/// Errors reported by the hardware pipeline collaborator
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HardwareError {
    /// Bounded wait elapsed without data
    #[error("operation timed out")]
    Timeout,
    /// Stage does not exist
    #[error("stage {0} not found")]
    StageNotFound(StageDescriptor),
    /// Stage already exists
    #[error("stage {0} already exists")]
    StageExists(StageDescriptor),
    /// Vendor call returned a failure code
    #[error("{op} failed with code {code:#x}")]
    Failed { op: HwOp, code: i32 },
}

impl HardwareError {
    /// Check if this is the transient timeout class
    pub fn is_timeout(&self) -> bool {
        matches!(self, HardwareError::Timeout)
    }
}
