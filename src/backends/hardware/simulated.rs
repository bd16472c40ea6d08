// SPDX-License-Identifier: GPL-3.0-only

//! In-memory hardware pipeline
//!
//! Behaves like the vendor media stack closely enough to drive the photo core
//! without a board: stages must exist before they are bound, bound stages
//! cannot be destroyed, and encoders emit real JPEG frames (a gradient test
//! pattern at the configured size) paced at a fixed frame interval.
//!
//! Every state-changing call is journaled so callers can inspect exactly what
//! a lifecycle operation did, and a one-shot failure can be injected for any
//! operation.

use super::types::*;
use super::{HwResult, MediaHardware};
use crate::errors::HardwareError;
use image::ExtendedColorType;
use image::codecs::jpeg::JpegEncoder;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Failure code reported for injected and rule-violating calls
const SIM_FAILURE_CODE: i32 = -1;

/// Default spacing between frames of one receive burst
const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(30);

/// Encoded bytes shared between the pattern cache and queued frames
type FrameBytes = Arc<[u8]>;

/// Outstanding block handed out by [`SimulatedHardware::map_block`]
struct SimBlock(FrameBytes);

impl BlockMapping for SimBlock {
    fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// One journaled hardware call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HwCall {
    pub op: HwOp,
    pub stage: StageDescriptor,
    /// Destination stage for bind/unbind
    pub peer: Option<StageDescriptor>,
}

impl HwCall {
    fn on(op: HwOp, stage: StageDescriptor) -> Self {
        Self {
            op,
            stage,
            peer: None,
        }
    }

    fn link(op: HwOp, src: StageDescriptor, dst: StageDescriptor) -> Self {
        Self {
            op,
            stage: src,
            peer: Some(dst),
        }
    }
}

enum StageAttr {
    Capture(CaptureAttr),
    Scaler(ScalerAttr),
    Encoder {
        attr: EncoderAttr,
        tuning: Option<EncoderTuning>,
        combo: Option<i32>,
    },
}

struct PendingFrame {
    sequence: u32,
    ready_at: Instant,
    bytes: FrameBytes,
}

struct SimStage {
    attr: StageAttr,
    receiving: bool,
    queue: VecDeque<PendingFrame>,
    next_sequence: u32,
    /// Encoded test pattern for the current encoder size
    pattern: Option<FrameBytes>,
}

impl SimStage {
    fn new(attr: StageAttr) -> Self {
        Self {
            attr,
            receiving: false,
            queue: VecDeque::new(),
            next_sequence: 0,
            pattern: None,
        }
    }
}

struct Injected {
    op: HwOp,
    stage: Option<StageDescriptor>,
}

#[derive(Default)]
struct SimState {
    stages: HashMap<StageDescriptor, SimStage>,
    bindings: Vec<(StageDescriptor, StageDescriptor)>,
    calls: Vec<HwCall>,
    outstanding: HashMap<u64, FrameBytes>,
    next_block: u64,
    released: u64,
    injected: Vec<Injected>,
}

impl SimState {
    fn take_injected(&mut self, op: HwOp, stage: StageDescriptor) -> HwResult<()> {
        let hit = self
            .injected
            .iter()
            .position(|f| f.op == op && f.stage.is_none_or(|s| s == stage));
        match hit {
            Some(index) => {
                self.injected.remove(index);
                debug!(%op, %stage, "Injected hardware failure");
                Err(failed(op))
            }
            None => Ok(()),
        }
    }

    fn stage_mut(&mut self, stage: StageDescriptor) -> HwResult<&mut SimStage> {
        self.stages
            .get_mut(&stage)
            .ok_or(HardwareError::StageNotFound(stage))
    }

    fn insert_stage(&mut self, stage: StageDescriptor, attr: StageAttr) -> HwResult<()> {
        if self.stages.contains_key(&stage) {
            return Err(HardwareError::StageExists(stage));
        }
        self.stages.insert(stage, SimStage::new(attr));
        Ok(())
    }

    fn remove_stage(&mut self, op: HwOp, stage: StageDescriptor) -> HwResult<()> {
        if !self.stages.contains_key(&stage) {
            return Err(HardwareError::StageNotFound(stage));
        }
        if self
            .bindings
            .iter()
            .any(|(src, dst)| *src == stage || *dst == stage)
        {
            return Err(failed(op));
        }
        self.stages.remove(&stage);
        self.calls.push(HwCall::on(op, stage));
        Ok(())
    }
}

fn failed(op: HwOp) -> HardwareError {
    HardwareError::Failed {
        op,
        code: SIM_FAILURE_CODE,
    }
}

/// Software stand-in for the capture/scale/encode hardware
pub struct SimulatedHardware {
    state: Mutex<SimState>,
    frame_ready: Condvar,
    frame_interval: Duration,
}

impl Default for SimulatedHardware {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedHardware {
    pub fn new() -> Self {
        Self::with_frame_interval(DEFAULT_FRAME_INTERVAL)
    }

    /// Create a pipeline whose encoders emit one frame every `interval`
    pub fn with_frame_interval(interval: Duration) -> Self {
        Self {
            state: Mutex::new(SimState::default()),
            frame_ready: Condvar::new(),
            frame_interval: interval,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next call of `op` fail, optionally only for `stage`
    pub fn fail_next(&self, op: HwOp, stage: Option<StageDescriptor>) {
        self.lock().injected.push(Injected { op, stage });
    }

    /// Journal of successful state-changing calls
    pub fn calls(&self) -> Vec<HwCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Stages that currently exist
    pub fn live_stages(&self) -> Vec<StageDescriptor> {
        self.lock().stages.keys().copied().collect()
    }

    /// Active bindings, oldest first
    pub fn bindings(&self) -> Vec<(StageDescriptor, StageDescriptor)> {
        self.lock().bindings.clone()
    }

    /// Frames acquired but not yet released
    pub fn outstanding_frames(&self) -> usize {
        self.lock().outstanding.len()
    }

    /// Frames returned to their queues so far
    pub fn released_frames(&self) -> u64 {
        self.lock().released
    }

    /// Combo channel an encoder is attached to
    pub fn combo_of(&self, stage: StageDescriptor) -> Option<i32> {
        match self.lock().stages.get(&stage).map(|s| &s.attr) {
            Some(StageAttr::Encoder { combo, .. }) => *combo,
            _ => None,
        }
    }

    pub fn capture_attr(&self, stage: StageDescriptor) -> Option<CaptureAttr> {
        match self.lock().stages.get(&stage).map(|s| &s.attr) {
            Some(StageAttr::Capture(attr)) => Some(attr.clone()),
            _ => None,
        }
    }

    pub fn scaler_attr(&self, stage: StageDescriptor) -> Option<ScalerAttr> {
        match self.lock().stages.get(&stage).map(|s| &s.attr) {
            Some(StageAttr::Scaler(attr)) => Some(attr.clone()),
            _ => None,
        }
    }
}

/// Encode a gradient of the given size as a baseline JPEG
fn encode_pattern(size: Size, quality: u8) -> HwResult<FrameBytes> {
    let width = size.width.max(1);
    let height = size.height.max(1);
    let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
    for y in 0..height {
        for x in 0..width {
            rgb.push((x * 255 / width) as u8);
            rgb.push((y * 255 / height) as u8);
            rgb.push(0x80);
        }
    }

    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode(&rgb, width, height, ExtendedColorType::Rgb8)
        .map_err(|_| failed(HwOp::StartReceive))?;
    Ok(out.into())
}

impl MediaHardware for SimulatedHardware {
    fn create_capture(&self, stage: StageDescriptor, attr: &CaptureAttr) -> HwResult<()> {
        let mut state = self.lock();
        state.take_injected(HwOp::CreateCapture, stage)?;
        state.insert_stage(stage, StageAttr::Capture(attr.clone()))?;
        state.calls.push(HwCall::on(HwOp::CreateCapture, stage));
        Ok(())
    }

    fn destroy_capture(&self, stage: StageDescriptor) -> HwResult<()> {
        let mut state = self.lock();
        state.take_injected(HwOp::DestroyCapture, stage)?;
        state.remove_stage(HwOp::DestroyCapture, stage)
    }

    fn set_capture_attr(&self, stage: StageDescriptor, attr: &CaptureAttr) -> HwResult<()> {
        let mut state = self.lock();
        state.take_injected(HwOp::SetCaptureAttr, stage)?;
        match &mut state.stage_mut(stage)?.attr {
            StageAttr::Capture(current) => *current = attr.clone(),
            _ => return Err(failed(HwOp::SetCaptureAttr)),
        }
        state.calls.push(HwCall::on(HwOp::SetCaptureAttr, stage));
        Ok(())
    }

    fn create_scaler(&self, stage: StageDescriptor, attr: &ScalerAttr) -> HwResult<()> {
        let mut state = self.lock();
        state.take_injected(HwOp::CreateScaler, stage)?;
        state.insert_stage(stage, StageAttr::Scaler(attr.clone()))?;
        state.calls.push(HwCall::on(HwOp::CreateScaler, stage));
        Ok(())
    }

    fn destroy_scaler(&self, stage: StageDescriptor) -> HwResult<()> {
        let mut state = self.lock();
        state.take_injected(HwOp::DestroyScaler, stage)?;
        state.remove_stage(HwOp::DestroyScaler, stage)
    }

    fn set_scaler_attr(&self, stage: StageDescriptor, attr: &ScalerAttr) -> HwResult<()> {
        let mut state = self.lock();
        state.take_injected(HwOp::SetScalerAttr, stage)?;
        match &mut state.stage_mut(stage)?.attr {
            StageAttr::Scaler(current) => *current = attr.clone(),
            _ => return Err(failed(HwOp::SetScalerAttr)),
        }
        state.calls.push(HwCall::on(HwOp::SetScalerAttr, stage));
        Ok(())
    }

    fn create_encoder(&self, stage: StageDescriptor, attr: &EncoderAttr) -> HwResult<()> {
        let mut state = self.lock();
        state.take_injected(HwOp::CreateEncoder, stage)?;
        state.insert_stage(
            stage,
            StageAttr::Encoder {
                attr: attr.clone(),
                tuning: None,
                combo: None,
            },
        )?;
        state.calls.push(HwCall::on(HwOp::CreateEncoder, stage));
        Ok(())
    }

    fn destroy_encoder(&self, stage: StageDescriptor) -> HwResult<()> {
        let mut state = self.lock();
        state.take_injected(HwOp::DestroyEncoder, stage)?;
        state.remove_stage(HwOp::DestroyEncoder, stage)?;
        self.frame_ready.notify_all();
        Ok(())
    }

    fn encoder_attr(&self, stage: StageDescriptor) -> HwResult<EncoderAttr> {
        let mut state = self.lock();
        state.take_injected(HwOp::GetEncoderAttr, stage)?;
        match &state.stage_mut(stage)?.attr {
            StageAttr::Encoder { attr, .. } => Ok(attr.clone()),
            _ => Err(failed(HwOp::GetEncoderAttr)),
        }
    }

    fn set_encoder_attr(&self, stage: StageDescriptor, attr: &EncoderAttr) -> HwResult<()> {
        let mut state = self.lock();
        state.take_injected(HwOp::SetEncoderAttr, stage)?;
        let sim = state.stage_mut(stage)?;
        match &mut sim.attr {
            StageAttr::Encoder { attr: current, .. } => *current = attr.clone(),
            _ => return Err(failed(HwOp::SetEncoderAttr)),
        }
        sim.pattern = None;
        state.calls.push(HwCall::on(HwOp::SetEncoderAttr, stage));
        Ok(())
    }

    fn tune_encoder(&self, stage: StageDescriptor, tuning: &EncoderTuning) -> HwResult<()> {
        let mut state = self.lock();
        state.take_injected(HwOp::TuneEncoder, stage)?;
        let sim = state.stage_mut(stage)?;
        match &mut sim.attr {
            StageAttr::Encoder { tuning: current, .. } => *current = Some(*tuning),
            _ => return Err(failed(HwOp::TuneEncoder)),
        }
        sim.pattern = None;
        state.calls.push(HwCall::on(HwOp::TuneEncoder, stage));
        Ok(())
    }

    fn attach_combo(&self, stage: StageDescriptor, combo_channel: i32) -> HwResult<()> {
        let mut state = self.lock();
        state.take_injected(HwOp::AttachCombo, stage)?;
        match &mut state.stage_mut(stage)?.attr {
            StageAttr::Encoder { combo, .. } => *combo = Some(combo_channel),
            _ => return Err(failed(HwOp::AttachCombo)),
        }
        state.calls.push(HwCall::on(HwOp::AttachCombo, stage));
        Ok(())
    }

    fn bind(&self, src: StageDescriptor, dst: StageDescriptor) -> HwResult<()> {
        let mut state = self.lock();
        state.take_injected(HwOp::Bind, src)?;
        if !state.stages.contains_key(&src) {
            return Err(HardwareError::StageNotFound(src));
        }
        if !state.stages.contains_key(&dst) {
            return Err(HardwareError::StageNotFound(dst));
        }
        if state.bindings.contains(&(src, dst)) {
            return Err(failed(HwOp::Bind));
        }
        state.bindings.push((src, dst));
        state.calls.push(HwCall::link(HwOp::Bind, src, dst));
        Ok(())
    }

    fn unbind(&self, src: StageDescriptor, dst: StageDescriptor) -> HwResult<()> {
        let mut state = self.lock();
        state.take_injected(HwOp::Unbind, src)?;
        let Some(index) = state.bindings.iter().position(|b| *b == (src, dst)) else {
            return Err(failed(HwOp::Unbind));
        };
        state.bindings.remove(index);
        state.calls.push(HwCall::link(HwOp::Unbind, src, dst));
        Ok(())
    }

    fn start_receive(&self, stage: StageDescriptor, count: u32) -> HwResult<()> {
        let mut state = self.lock();
        state.take_injected(HwOp::StartReceive, stage)?;
        let interval = self.frame_interval;
        let sim = state.stage_mut(stage)?;
        let (size, quality) = match &sim.attr {
            StageAttr::Encoder { attr, tuning, .. } => {
                let quality = tuning.map_or(75, |t| t.qfactor.clamp(1, 100)) as u8;
                (attr.size, quality)
            }
            _ => return Err(failed(HwOp::StartReceive)),
        };

        let pattern = match &sim.pattern {
            Some(pattern) => pattern.clone(),
            None => {
                let pattern = encode_pattern(size, quality)?;
                sim.pattern = Some(pattern.clone());
                pattern
            }
        };

        let now = Instant::now();
        for i in 0..count {
            let sequence = sim.next_sequence;
            sim.next_sequence = sim.next_sequence.wrapping_add(1);
            sim.queue.push_back(PendingFrame {
                sequence,
                ready_at: now + interval * i,
                bytes: pattern.clone(),
            });
        }
        sim.receiving = true;
        state.calls.push(HwCall::on(HwOp::StartReceive, stage));
        drop(state);

        self.frame_ready.notify_all();
        Ok(())
    }

    fn stop_receive(&self, stage: StageDescriptor) -> HwResult<()> {
        let mut state = self.lock();
        state.take_injected(HwOp::StopReceive, stage)?;
        let sim = state.stage_mut(stage)?;
        // Pictures not yet taken in are dropped; finished frames stay queued
        let now = Instant::now();
        sim.queue.retain(|f| f.ready_at <= now);
        sim.receiving = false;
        state.calls.push(HwCall::on(HwOp::StopReceive, stage));
        Ok(())
    }

    fn acquire_frame(&self, stage: StageDescriptor, timeout: Duration) -> HwResult<EncodedFrame> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        state.take_injected(HwOp::AcquireFrame, stage)?;

        loop {
            let now = Instant::now();
            let sim = state.stage_mut(stage)?;
            let next_ready = sim.queue.front().map(|f| f.ready_at);

            if next_ready.is_some_and(|ready| ready <= now) {
                let Some(pending) = sim.queue.pop_front() else {
                    continue;
                };
                let block = state.next_block;
                state.next_block += 1;
                let len = pending.bytes.len();
                state.outstanding.insert(block, pending.bytes);
                trace!(%stage, sequence = pending.sequence, len, "Frame acquired");
                return Ok(EncodedFrame {
                    stage,
                    sequence: pending.sequence,
                    len,
                    block: BlockHandle(block),
                });
            }

            if now >= deadline {
                return Err(HardwareError::Timeout);
            }

            let wake = next_ready.map_or(deadline, |ready| ready.min(deadline));
            let (guard, _) = self
                .frame_ready
                .wait_timeout(state, wake.saturating_duration_since(now))
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
    }

    fn release_frame(&self, frame: &EncodedFrame) -> HwResult<()> {
        let mut state = self.lock();
        state.take_injected(HwOp::ReleaseFrame, frame.stage)?;
        if state.outstanding.remove(&frame.block.0).is_none() {
            return Err(failed(HwOp::ReleaseFrame));
        }
        state.released += 1;
        Ok(())
    }

    fn map_block(&self, block: BlockHandle) -> HwResult<Box<dyn BlockMapping + '_>> {
        let bytes = self
            .lock()
            .outstanding
            .get(&block.0)
            .cloned()
            .ok_or_else(|| failed(HwOp::MapBlock))?;
        Ok(Box::new(SimBlock(bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoder_attr(width: u32, height: u32) -> EncoderAttr {
        EncoderAttr {
            pixel_format: PixelFormat::Nv12,
            max_size: Size::new(width, height),
            size: Size::new(width, height),
            vir_size: Size::new(width, height),
            stream_buf_count: 1,
            buf_size: width * height / 2,
            jpeg: JpegAttr::default(),
        }
    }

    #[test]
    fn test_encoder_emits_jpeg_frames() {
        let hw = SimulatedHardware::with_frame_interval(Duration::ZERO);
        let enc = StageDescriptor::encoder(0, 1);
        hw.create_encoder(enc, &encoder_attr(32, 16)).unwrap();
        hw.start_receive(enc, 2).unwrap();

        let first = hw.acquire_frame(enc, Duration::from_millis(100)).unwrap();
        let mapping = hw.map_block(first.block).unwrap();
        assert_eq!(&mapping.as_bytes()[..2], &[0xFF, 0xD8]);
        drop(mapping);
        assert_eq!(first.sequence, 0);
        hw.release_frame(&first).unwrap();

        let second = hw.acquire_frame(enc, Duration::from_millis(100)).unwrap();
        assert_eq!(second.sequence, 1);
        hw.release_frame(&second).unwrap();
        assert_eq!(hw.released_frames(), 2);
    }

    #[test]
    fn test_empty_queue_times_out() {
        let hw = SimulatedHardware::new();
        let enc = StageDescriptor::encoder(0, 1);
        hw.create_encoder(enc, &encoder_attr(16, 16)).unwrap();
        assert_eq!(
            hw.acquire_frame(enc, Duration::from_millis(20)),
            Err(HardwareError::Timeout)
        );
    }

    #[test]
    fn test_bound_stage_cannot_be_destroyed() {
        let hw = SimulatedHardware::new();
        let cap = StageDescriptor::capture(0, 0);
        let enc = StageDescriptor::encoder(0, 1);
        hw.create_capture(
            cap,
            &CaptureAttr {
                size: Size::new(16, 16),
                max_size: Size::new(16, 16),
                pixel_format: PixelFormat::Nv12,
            },
        )
        .unwrap();
        hw.create_encoder(enc, &encoder_attr(16, 16)).unwrap();
        hw.bind(cap, enc).unwrap();

        assert!(hw.destroy_encoder(enc).is_err());
        hw.unbind(cap, enc).unwrap();
        hw.destroy_encoder(enc).unwrap();
        hw.destroy_capture(cap).unwrap();
        assert!(hw.live_stages().is_empty());
    }

    #[test]
    fn test_injected_failure_fires_once() {
        let hw = SimulatedHardware::new();
        let enc = StageDescriptor::encoder(0, 1);
        hw.fail_next(HwOp::CreateEncoder, None);
        assert!(hw.create_encoder(enc, &encoder_attr(16, 16)).is_err());
        assert!(hw.create_encoder(enc, &encoder_attr(16, 16)).is_ok());
    }

    #[test]
    fn test_stop_keeps_finished_frames_only() {
        let hw = SimulatedHardware::with_frame_interval(Duration::from_secs(10));
        let enc = StageDescriptor::encoder(0, 1);
        hw.create_encoder(enc, &encoder_attr(16, 16)).unwrap();
        hw.start_receive(enc, 3).unwrap();
        hw.stop_receive(enc).unwrap();

        let frame = hw.acquire_frame(enc, Duration::from_millis(50)).unwrap();
        hw.release_frame(&frame).unwrap();
        assert_eq!(
            hw.acquire_frame(enc, Duration::from_millis(20)),
            Err(HardwareError::Timeout)
        );
    }
}
