// SPDX-License-Identifier: GPL-3.0-only

//! Hardware pipeline abstraction
//!
//! The photo core never talks to the vendor media API directly. Everything it
//! needs from the capture/scale/encode hardware goes through
//! [`MediaHardware`]:
//!
//! ```text
//! ┌─────────────────────┐
//! │    PhotoService     │  ← Lifecycle, topology, harvesters
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │ MediaHardware Trait │  ← Stage create/bind/queue operations
//! └──────────┬──────────┘
//!            │
//!            ▼
//!   ┌─────────────────┐
//!   │ Vendor / Sim    │  ← Concrete implementation
//!   └─────────────────┘
//! ```

pub mod simulated;
pub mod types;

pub use simulated::{HwCall, SimulatedHardware};
pub use types::*;

use crate::errors::HardwareError;
use std::ops::Deref;
use std::time::Duration;
use tracing::warn;

/// Result type for hardware operations
pub type HwResult<T> = Result<T, HardwareError>;

/// Operations the photo core invokes on the hardware pipeline.
///
/// Implementations are shared between the lifecycle caller and the harvester
/// threads, so every method takes `&self`.
pub trait MediaHardware: Send + Sync {
    // ===== Capture =====

    fn create_capture(&self, stage: StageDescriptor, attr: &CaptureAttr) -> HwResult<()>;

    fn destroy_capture(&self, stage: StageDescriptor) -> HwResult<()>;

    fn set_capture_attr(&self, stage: StageDescriptor, attr: &CaptureAttr) -> HwResult<()>;

    // ===== Scaler =====

    fn create_scaler(&self, stage: StageDescriptor, attr: &ScalerAttr) -> HwResult<()>;

    fn destroy_scaler(&self, stage: StageDescriptor) -> HwResult<()>;

    fn set_scaler_attr(&self, stage: StageDescriptor, attr: &ScalerAttr) -> HwResult<()>;

    // ===== Encoder =====

    fn create_encoder(&self, stage: StageDescriptor, attr: &EncoderAttr) -> HwResult<()>;

    fn destroy_encoder(&self, stage: StageDescriptor) -> HwResult<()>;

    fn encoder_attr(&self, stage: StageDescriptor) -> HwResult<EncoderAttr>;

    fn set_encoder_attr(&self, stage: StageDescriptor, attr: &EncoderAttr) -> HwResult<()>;

    fn tune_encoder(&self, stage: StageDescriptor, tuning: &EncoderTuning) -> HwResult<()>;

    /// Attach an encoder to the combo group owned by `combo_channel`
    fn attach_combo(&self, stage: StageDescriptor, combo_channel: i32) -> HwResult<()>;

    // ===== Binding =====

    fn bind(&self, src: StageDescriptor, dst: StageDescriptor) -> HwResult<()>;

    fn unbind(&self, src: StageDescriptor, dst: StageDescriptor) -> HwResult<()>;

    // ===== Streaming =====

    /// Let the stage accept `count` input pictures
    fn start_receive(&self, stage: StageDescriptor, count: u32) -> HwResult<()>;

    fn stop_receive(&self, stage: StageDescriptor) -> HwResult<()>;

    /// Take the next encoded frame, waiting at most `timeout`
    fn acquire_frame(&self, stage: StageDescriptor, timeout: Duration) -> HwResult<EncodedFrame>;

    fn release_frame(&self, frame: &EncodedFrame) -> HwResult<()>;

    /// Map a block handle to addressable bytes
    fn map_block(&self, block: BlockHandle) -> HwResult<Box<dyn BlockMapping + '_>>;
}

/// Mapped frame payload cut to the encoded length
pub struct FrameData<'a> {
    mapping: Box<dyn BlockMapping + 'a>,
    len: usize,
}

impl Deref for FrameData<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        let bytes = self.mapping.as_bytes();
        &bytes[..self.len.min(bytes.len())]
    }
}


/// Acquired frame that goes back to its queue when dropped
pub struct FrameGuard<'a> {
    hardware: &'a dyn MediaHardware,
    frame: EncodedFrame,
}

impl<'a> FrameGuard<'a> {
    /// Acquire the next frame from `stage`
    pub fn acquire(
        hardware: &'a dyn MediaHardware,
        stage: StageDescriptor,
        timeout: Duration,
    ) -> HwResult<Self> {
        let frame = hardware.acquire_frame(stage, timeout)?;
        Ok(Self { hardware, frame })
    }

    pub fn sequence(&self) -> u32 {
        self.frame.sequence
    }

    /// Map the frame's block. The mapping cannot outlive the guard, so the
    /// bytes are never read after the frame is released.
    pub fn bytes(&self) -> HwResult<FrameData<'_>> {
        let mapping = self.hardware.map_block(self.frame.block)?;
        Ok(FrameData {
            mapping,
            len: self.frame.len,
        })
    }
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.hardware.release_frame(&self.frame) {
            warn!(
                stage = %self.frame.stage,
                sequence = self.frame.sequence,
                error = %e,
                "Failed to release encoded frame"
            );
        }
    }
}
