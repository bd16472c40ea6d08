// SPDX-License-Identifier: GPL-3.0-only

//! Stage graph construction and teardown
//!
//! ```text
//! Direct:  capture ──────────────▶ encoder
//! Scaled:  capture ──▶ scaler ───▶ encoder
//! Combo:   capture      encoder ─▶ combo group (no explicit bind)
//! ```
//!
//! A [`Topology`] remembers exactly which stages it created and which
//! bindings it made. Teardown pops those records in reverse, so a failed
//! teardown can simply be retried and a finished one does nothing.

use super::attrs::{self, PhotoThumbAttr};
use crate::backends::hardware::{
    CaptureAttr, EncoderAttr, EncoderTuning, MediaHardware, ModuleKind, ScalerAttr,
    StageDescriptor,
};
use crate::config::{SensorConfig, ThumbConfig};
use crate::errors::{PhotoError, PhotoResult};
use std::sync::Arc;
use tracing::{debug, error, info};

/// How the encoder is connected to the capture channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindMode {
    /// Capture size equals the photo size
    Direct,
    /// A scaler resamples the capture output
    Scaled,
    /// The encoder joins the combo group owned by `combo_channel`
    Combo { combo_channel: i32 },
}

/// Everything needed to build one capture → (scale) → encode chain
#[derive(Debug, Clone)]
pub struct TopologyPlan {
    pub mode: BindMode,
    pub capture: StageDescriptor,
    pub capture_attr: CaptureAttr,
    pub scaler: Option<(StageDescriptor, ScalerAttr)>,
    pub encoder: StageDescriptor,
    pub encoder_attr: EncoderAttr,
    pub tuning: EncoderTuning,
}

impl TopologyPlan {
    /// Plan the photo chain of `camera`
    pub fn photo(
        camera: u32,
        sensor: &SensorConfig,
        thumb: &PhotoThumbAttr,
        buffer_divisor: u32,
    ) -> Self {
        let device = camera as i32;
        let photo = &sensor.photo;

        let mode = if photo.enable_combo {
            BindMode::Combo {
                combo_channel: photo.combo_encoder_channel,
            }
        } else if attrs::needs_scaler(photo) {
            BindMode::Scaled
        } else {
            BindMode::Direct
        };

        let scaler = (mode == BindMode::Scaled).then(|| {
            (
                StageDescriptor::scaler(device, photo.scaler_channel),
                attrs::scaler_attr(sensor),
            )
        });

        Self {
            mode,
            capture: StageDescriptor::capture(device, photo.capture.channel),
            capture_attr: attrs::capture_attr(sensor),
            scaler,
            encoder: StageDescriptor::encoder(device, photo.encoder_channel),
            encoder_attr: attrs::encoder_attr(sensor, thumb, buffer_divisor),
            tuning: attrs::encoder_tuning(photo),
        }
    }

    /// Plan the thumbnail chain of `camera`; always direct-bound
    pub fn thumbnail(
        camera: u32,
        thumb: &ThumbConfig,
        sensor: &SensorConfig,
        buffer_divisor: u32,
    ) -> Self {
        let device = camera as i32;
        Self {
            mode: BindMode::Direct,
            capture: StageDescriptor::capture(device, thumb.capture_channel),
            capture_attr: attrs::thumbnail_capture_attr(thumb, sensor),
            scaler: None,
            encoder: StageDescriptor::encoder(device, thumb.encoder_channel),
            encoder_attr: attrs::thumbnail_encoder_attr(thumb, sensor, buffer_divisor),
            tuning: EncoderTuning {
                ref_buf_share: true,
                buf_wrap: false,
                qfactor: sensor.photo.qfactor,
            },
        }
    }

    /// Bindings in the order they are made
    pub fn bindings(&self) -> Vec<(StageDescriptor, StageDescriptor)> {
        match (self.mode, &self.scaler) {
            (BindMode::Combo { .. }, _) => Vec::new(),
            (BindMode::Scaled, Some((scaler, _))) => {
                vec![(*scaler, self.encoder), (self.capture, *scaler)]
            }
            _ => vec![(self.capture, self.encoder)],
        }
    }
}

/// A built chain of stages
pub struct Topology {
    hardware: Arc<dyn MediaHardware>,
    plan: TopologyPlan,
    /// Stages in creation order
    created: Vec<StageDescriptor>,
    /// Bindings in bind order
    bound: Vec<(StageDescriptor, StageDescriptor)>,
    receiving: bool,
}

impl Topology {
    /// Create and bind every stage of `plan`.
    ///
    /// On failure everything already created is torn down before the error
    /// is returned.
    pub fn build(hardware: Arc<dyn MediaHardware>, plan: TopologyPlan) -> PhotoResult<Self> {
        let mut topology = Self {
            hardware,
            plan,
            created: Vec::new(),
            bound: Vec::new(),
            receiving: false,
        };

        if let Err(e) = topology.build_stages() {
            error!(encoder = %topology.plan.encoder, error = %e, "Topology build failed, rolling back");
            if let Err(rollback) = topology.teardown() {
                error!(error = %rollback, "Topology rollback incomplete");
            }
            return Err(e);
        }

        info!(
            encoder = %topology.plan.encoder,
            mode = ?topology.plan.mode,
            "Topology built"
        );
        Ok(topology)
    }

    fn build_stages(&mut self) -> PhotoResult<()> {
        let hw = Arc::clone(&self.hardware);

        hw.create_capture(self.plan.capture, &self.plan.capture_attr)?;
        self.created.push(self.plan.capture);

        if let Some((scaler, attr)) = &self.plan.scaler {
            hw.create_scaler(*scaler, attr)?;
            self.created.push(*scaler);
        }

        self.create_encoder()?;

        for (src, dst) in self.plan.bindings() {
            hw.bind(src, dst)?;
            self.bound.push((src, dst));
            debug!(%src, %dst, "Bound stages");
        }
        Ok(())
    }

    /// Create the encoder and let it emit one warm-up frame
    fn create_encoder(&mut self) -> PhotoResult<()> {
        let hw = Arc::clone(&self.hardware);
        let encoder = self.plan.encoder;

        hw.create_encoder(encoder, &self.plan.encoder_attr)?;
        self.created.push(encoder);
        hw.tune_encoder(encoder, &self.plan.tuning)?;

        hw.start_receive(encoder, 1)?;
        if let BindMode::Combo { combo_channel } = self.plan.mode {
            debug!(%encoder, combo_channel, "Attaching encoder to combo group");
            hw.attach_combo(encoder, combo_channel)?;
        }
        hw.stop_receive(encoder)?;
        Ok(())
    }

    pub fn mode(&self) -> BindMode {
        self.plan.mode
    }

    pub fn encoder(&self) -> StageDescriptor {
        self.plan.encoder
    }

    /// Whether nothing of this topology is left on the hardware
    pub fn is_torn_down(&self) -> bool {
        self.created.is_empty() && self.bound.is_empty()
    }

    /// Let the encoder accept `count` pictures
    pub fn start_receive(&mut self, count: u32) -> PhotoResult<()> {
        self.hardware.start_receive(self.plan.encoder, count)?;
        self.receiving = true;
        Ok(())
    }

    /// Stop picture reception on the encoder; no-op if never started
    pub fn stop_receive(&mut self) -> PhotoResult<()> {
        if self.receiving && self.created.contains(&self.plan.encoder) {
            self.hardware.stop_receive(self.plan.encoder)?;
        }
        self.receiving = false;
        Ok(())
    }

    /// Undo every binding, newest first
    pub fn unbind_all(&mut self) -> PhotoResult<()> {
        while let Some(&(src, dst)) = self.bound.last() {
            self.hardware.unbind(src, dst)?;
            self.bound.pop();
            debug!(%src, %dst, "Unbound stages");
        }
        Ok(())
    }

    /// Restore the planned bindings that are not currently in place
    pub fn rebind(&mut self) -> PhotoResult<()> {
        for (src, dst) in self.plan.bindings() {
            if self.bound.contains(&(src, dst)) {
                continue;
            }
            self.hardware.bind(src, dst)?;
            self.bound.push((src, dst));
            debug!(%src, %dst, "Bound stages");
        }
        Ok(())
    }

    /// Apply the sensor's current photo size.
    ///
    /// Returns `false` without touching any binding when the encoder already
    /// runs at that size. A failure part-way leaves the topology as far as it
    /// got; the error is returned unrecovered.
    pub fn apply_resolution(&mut self, sensor: &SensorConfig) -> PhotoResult<bool> {
        if let BindMode::Combo { combo_channel } = self.plan.mode {
            return Err(PhotoError::Unsupported(format!(
                "reset of combo encoder {} (group {combo_channel})",
                self.plan.encoder
            )));
        }

        let hw = Arc::clone(&self.hardware);
        let current = hw.encoder_attr(self.plan.encoder)?;
        let photo = &sensor.photo;
        if current.matches_resolution(photo.image_width, photo.image_height) {
            debug!(encoder = %self.plan.encoder, "Resolution unchanged, nothing to reset");
            return Ok(false);
        }

        let (encoder_attr, capture_attr) = attrs::reset_attrs(sensor, &current);
        self.unbind_all()?;

        hw.set_encoder_attr(self.plan.encoder, &encoder_attr)?;
        self.plan.encoder_attr = encoder_attr;
        hw.set_capture_attr(self.plan.capture, &capture_attr)?;
        self.plan.capture_attr = capture_attr;
        if let Some((scaler, attr)) = &mut self.plan.scaler {
            let scaler_attr = attrs::scaler_attr(sensor);
            hw.set_scaler_attr(*scaler, &scaler_attr)?;
            *attr = scaler_attr;
        }

        self.rebind()?;
        info!(
            encoder = %self.plan.encoder,
            size = %self.plan.encoder_attr.size,
            "Resolution applied"
        );
        Ok(true)
    }

    /// Unbind, then destroy encoder → scaler → capture.
    ///
    /// Stops at the first failing call; calling again resumes from there.
    /// Does nothing once everything is gone.
    pub fn teardown(&mut self) -> PhotoResult<()> {
        if self.is_torn_down() {
            return Ok(());
        }

        self.unbind_all()?;
        while let Some(&stage) = self.created.last() {
            match stage.kind {
                ModuleKind::Encoder => self.hardware.destroy_encoder(stage)?,
                ModuleKind::Scaler => self.hardware.destroy_scaler(stage)?,
                ModuleKind::Capture => self.hardware.destroy_capture(stage)?,
            }
            self.created.pop();
            debug!(%stage, "Destroyed stage");
        }
        self.receiving = false;

        info!(encoder = %self.plan.encoder, "Topology torn down");
        Ok(())
    }
}

impl std::fmt::Debug for Topology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Topology")
            .field("mode", &self.plan.mode)
            .field("created", &self.created)
            .field("bound", &self.bound)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::hardware::{HwOp, SimulatedHardware};
    use crate::config::Config;
    use std::time::Duration;

    fn setup() -> (Arc<SimulatedHardware>, SensorConfig) {
        let hw = Arc::new(SimulatedHardware::with_frame_interval(Duration::ZERO));
        let mut sensor = Config::default().sensors.remove(0);
        sensor.max_width = 64;
        sensor.max_height = 48;
        sensor.photo.image_width = 32;
        sensor.photo.image_height = 24;
        sensor.photo.capture.width = 32;
        sensor.photo.capture.height = 24;
        (hw, sensor)
    }

    fn build(hw: &Arc<SimulatedHardware>, sensor: &SensorConfig) -> PhotoResult<Topology> {
        let plan = TopologyPlan::photo(0, sensor, &PhotoThumbAttr::default(), 2);
        Topology::build(Arc::clone(hw) as Arc<dyn MediaHardware>, plan)
    }

    #[test]
    fn test_direct_binds_capture_to_encoder() {
        let (hw, sensor) = setup();
        let topology = build(&hw, &sensor).unwrap();
        assert_eq!(topology.mode(), BindMode::Direct);
        assert_eq!(
            hw.bindings(),
            vec![(StageDescriptor::capture(0, 1), StageDescriptor::encoder(0, 2))]
        );
    }

    #[test]
    fn test_scaled_inserts_scaler() {
        let (hw, mut sensor) = setup();
        sensor.photo.image_width = 16;
        sensor.photo.image_height = 12;
        let topology = build(&hw, &sensor).unwrap();

        let scaler = StageDescriptor::scaler(0, 0);
        assert_eq!(topology.mode(), BindMode::Scaled);
        assert_eq!(
            hw.bindings(),
            vec![
                (scaler, StageDescriptor::encoder(0, 2)),
                (StageDescriptor::capture(0, 1), scaler),
            ]
        );
        let attr = hw.scaler_attr(scaler).unwrap();
        assert_eq!((attr.max_size.width, attr.max_size.height), (64, 48));
    }

    #[test]
    fn test_combo_has_no_bindings() {
        let (hw, mut sensor) = setup();
        sensor.photo.enable_combo = true;
        sensor.photo.combo_encoder_channel = 5;
        let _topology = build(&hw, &sensor).unwrap();

        assert!(hw.bindings().is_empty());
        assert_eq!(hw.combo_of(StageDescriptor::encoder(0, 2)), Some(5));
    }

    #[test]
    fn test_build_failure_rolls_back() {
        let (hw, mut sensor) = setup();
        sensor.photo.image_width = 16;
        hw.fail_next(HwOp::Bind, Some(StageDescriptor::capture(0, 1)));

        assert!(build(&hw, &sensor).is_err());
        assert!(hw.live_stages().is_empty());
        assert!(hw.bindings().is_empty());
    }

    #[test]
    fn test_teardown_is_idempotent() {
        let (hw, sensor) = setup();
        let mut topology = build(&hw, &sensor).unwrap();
        topology.teardown().unwrap();
        assert!(hw.live_stages().is_empty());

        hw.clear_calls();
        topology.teardown().unwrap();
        assert!(hw.calls().is_empty());
    }

    #[test]
    fn test_teardown_resumes_after_failure() {
        let (hw, sensor) = setup();
        let mut topology = build(&hw, &sensor).unwrap();

        hw.fail_next(HwOp::DestroyCapture, None);
        assert!(topology.teardown().is_err());
        assert_eq!(hw.live_stages(), vec![StageDescriptor::capture(0, 1)]);

        hw.clear_calls();
        topology.teardown().unwrap();
        let ops: Vec<HwOp> = hw.calls().iter().map(|c| c.op).collect();
        assert_eq!(ops, vec![HwOp::DestroyCapture]);
    }

    #[test]
    fn test_same_resolution_is_noop() {
        let (hw, sensor) = setup();
        let mut topology = build(&hw, &sensor).unwrap();
        hw.clear_calls();

        assert!(!topology.apply_resolution(&sensor).unwrap());
        assert!(hw.calls().is_empty());
    }
}
