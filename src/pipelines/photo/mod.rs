// SPDX-License-Identifier: GPL-3.0-only

//! Still-photo pipeline
//!
//! [`PhotoService`] owns one [`PipelineHandle`] per camera slot and drives
//! each through its lifecycle:
//!
//! ```text
//! Uninit ──init──▶ Initializing ──▶ Active ──reset──▶ ResettingAttrs ──▶ Active
//!   ▲                   │ (failure: full rollback)       │
//!   └───────────────────┘                                ▼
//!   └──────────────────────────────────── Deinitializing ◀── deinit
//! ```
//!
//! # Modules
//!
//! - [`topology`]: capture → (scale) → encode stage graph
//! - [`attrs`]: attribute derivation from the parameter store
//! - [`harvest`]: primary and thumbnail harvesters, sink events
//! - [`harvest_loop`]: harvester thread controller
//! - [`signal`]: handoff semaphore between the harvesters

pub mod attrs;
pub mod harvest;
pub mod harvest_loop;
pub mod signal;
pub mod topology;

pub use attrs::{MpfAttr, MpfMode, PhotoThumbAttr};
pub use harvest::{LossReason, PhotoEvent, PhotoSink};
pub use topology::{BindMode, Topology, TopologyPlan};

use crate::backends::hardware::MediaHardware;
use crate::config::{Config, SensorConfig};
use crate::constants::{MAX_CAMERAS, yuv420_frame_len};
use crate::errors::{PhotoError, PhotoResult};
use crate::storage::MappedBuffer;
use harvest::{HarvestShared, PrimaryHarvester, ThumbnailHarvester};
use harvest_loop::HarvestLoop;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Lifecycle state of one camera slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleState {
    #[default]
    Uninit,
    Initializing,
    Active,
    /// A reset is running, or failed and left the pipeline here
    ResettingAttrs,
    /// A deinit is running, or failed and can be retried
    Deinitializing,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LifecycleState::Uninit => "uninitialized",
            LifecycleState::Initializing => "initializing",
            LifecycleState::Active => "active",
            LifecycleState::ResettingAttrs => "resetting attributes",
            LifecycleState::Deinitializing => "deinitializing",
        };
        f.write_str(name)
    }
}

/// What a `take_photo` call asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhotoMode {
    Single,
    /// Burst of `n` photos, `n >= 1`
    Multiple(u32),
    /// Timed capture; not supported
    Lapse,
}

/// Init parameters of a camera
#[derive(Clone)]
pub struct PhotoAttr {
    pub camera: u32,
    pub thumb: PhotoThumbAttr,
    pub sink: Arc<dyn PhotoSink>,
}

impl PhotoAttr {
    pub fn new(camera: u32, sink: impl PhotoSink + 'static) -> Self {
        Self {
            camera,
            thumb: PhotoThumbAttr::default(),
            sink: Arc::new(sink),
        }
    }
}

impl std::fmt::Debug for PhotoAttr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhotoAttr")
            .field("camera", &self.camera)
            .field("thumb", &self.thumb)
            .finish_non_exhaustive()
    }
}

/// Everything one initialized camera holds
pub struct PipelineHandle {
    camera: u32,
    topology: Topology,
    thumbnail: Option<Topology>,
    shared: Option<Arc<HarvestShared>>,
    primary: Option<HarvestLoop>,
    thumb_loop: Option<HarvestLoop>,
}

impl PipelineHandle {
    fn new(camera: u32, topology: Topology) -> Self {
        Self {
            camera,
            topology,
            thumbnail: None,
            shared: None,
            primary: None,
            thumb_loop: None,
        }
    }

    pub fn mode(&self) -> BindMode {
        self.topology.mode()
    }

    pub fn has_thumbnail(&self) -> bool {
        self.thumbnail.is_some()
    }

    /// Tear down in a fixed order.
    ///
    /// Every finished step is recorded, so after a failure a second call
    /// continues with the step that failed.
    fn release(&mut self) -> PhotoResult<()> {
        if let Some(shared) = &self.shared {
            shared.begin_shutdown();
        }

        for task in [&self.thumb_loop, &self.primary].into_iter().flatten() {
            task.request_stop();
        }
        if let Some(mut task) = self.thumb_loop.take() {
            task.join();
        }
        if let Some(mut task) = self.primary.take() {
            task.join();
        }

        if let Some(thumbnail) = &mut self.thumbnail {
            thumbnail.stop_receive()?;
            thumbnail.teardown()?;
        }
        self.thumbnail = None;

        // Harvesters are joined, so this is the last reference to the staging buffer
        self.shared = None;

        self.topology.stop_receive()?;
        self.topology.teardown()?;
        debug!(camera = self.camera, "Pipeline released");
        Ok(())
    }
}

#[derive(Default)]
struct Slot {
    state: LifecycleState,
    handle: Option<PipelineHandle>,
}

/// Registry and lifecycle controller of all photo pipelines
pub struct PhotoService {
    hardware: Arc<dyn MediaHardware>,
    config: Config,
    slots: Vec<Slot>,
}

impl PhotoService {
    pub fn new(hardware: Arc<dyn MediaHardware>, config: Config) -> PhotoResult<Self> {
        config.validate()?;
        let slots = (0..MAX_CAMERAS).map(|_| Slot::default()).collect();
        Ok(Self {
            hardware,
            config,
            slots,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn slot_index(camera: u32) -> PhotoResult<usize> {
        if camera >= MAX_CAMERAS {
            return Err(PhotoError::InvalidCamera {
                camera,
                max: MAX_CAMERAS - 1,
            });
        }
        Ok(camera as usize)
    }

    fn slot_mut(&mut self, camera: u32) -> PhotoResult<&mut Slot> {
        let index = Self::slot_index(camera)?;
        Ok(&mut self.slots[index])
    }

    /// Slot of an `Active` camera
    fn active_slot(&mut self, camera: u32, operation: &'static str) -> PhotoResult<&mut Slot> {
        let slot = self.slot_mut(camera)?;
        match slot.state {
            LifecycleState::Active if slot.handle.is_some() => Ok(slot),
            LifecycleState::Uninit | LifecycleState::Active => {
                Err(PhotoError::NotInitialized(camera))
            }
            state => Err(PhotoError::InvalidState {
                camera,
                operation,
                state,
            }),
        }
    }

    /// Lifecycle state of `camera`
    pub fn state(&self, camera: u32) -> PhotoResult<LifecycleState> {
        Ok(self.slots[Self::slot_index(camera)?].state)
    }

    /// Photos requested but not yet delivered
    pub fn pending_photos(&self, camera: u32) -> PhotoResult<u32> {
        let slot = &self.slots[Self::slot_index(camera)?];
        slot.handle
            .as_ref()
            .and_then(|handle| handle.shared.as_ref())
            .map(|shared| shared.pending().get())
            .ok_or(PhotoError::NotInitialized(camera))
    }

    /// Bind mode of an initialized camera
    pub fn bind_mode(&self, camera: u32) -> PhotoResult<BindMode> {
        let slot = &self.slots[Self::slot_index(camera)?];
        slot.handle
            .as_ref()
            .map(PipelineHandle::mode)
            .ok_or(PhotoError::NotInitialized(camera))
    }

    /// Build the pipeline of `attr.camera` and start its harvesters.
    ///
    /// Returns immediately if the camera is already active. On failure
    /// everything built so far is released and the camera stays `Uninit`.
    pub fn init(&mut self, attr: PhotoAttr) -> PhotoResult<()> {
        let camera = attr.camera;
        let slot = self.slot_mut(camera)?;
        match slot.state {
            LifecycleState::Uninit => {}
            LifecycleState::Active => {
                debug!(camera, "Photo pipeline already initialized");
                return Ok(());
            }
            state => {
                return Err(PhotoError::InvalidState {
                    camera,
                    operation: "initialize",
                    state,
                });
            }
        }
        slot.state = LifecycleState::Initializing;
        info!(camera, "Photo pipeline init");

        let result = self.build_pipeline(&attr);
        let slot = self.slot_mut(camera)?;
        match result {
            Ok(handle) => {
                info!(
                    camera,
                    mode = ?handle.mode(),
                    thumbnail = handle.has_thumbnail(),
                    "Photo pipeline active"
                );
                slot.handle = Some(handle);
                slot.state = LifecycleState::Active;
                Ok(())
            }
            Err(e) => {
                error!(camera, error = %e, "Photo pipeline init failed");
                slot.state = LifecycleState::Uninit;
                Err(e)
            }
        }
    }

    fn build_pipeline(&self, attr: &PhotoAttr) -> PhotoResult<PipelineHandle> {
        let camera = attr.camera;
        let sensor = self.config.sensor(camera)?;
        let plan = TopologyPlan::photo(
            camera,
            sensor,
            &attr.thumb,
            self.config.encoder_buffer_divisor,
        );
        let topology = Topology::build(Arc::clone(&self.hardware), plan)?;

        let mut handle = PipelineHandle::new(camera, topology);
        if let Err(e) = self.start_pipeline(&mut handle, attr, sensor) {
            if let Err(rollback) = handle.release() {
                error!(camera, error = %rollback, "Rollback after failed init incomplete");
            }
            return Err(e);
        }
        Ok(handle)
    }

    fn start_pipeline(
        &self,
        handle: &mut PipelineHandle,
        attr: &PhotoAttr,
        sensor: &SensorConfig,
    ) -> PhotoResult<()> {
        let camera = attr.camera;
        let timeouts = &self.config.timeouts;
        let thumb_cfg = &self.config.thumbnail;

        if thumb_cfg.enabled {
            let plan = TopologyPlan::thumbnail(
                camera,
                thumb_cfg,
                sensor,
                self.config.encoder_buffer_divisor,
            );
            handle.thumbnail = Some(Topology::build(Arc::clone(&self.hardware), plan)?);
        }

        // Sized for the sensor maximum so a later reset never outgrows it
        let frame_len = yuv420_frame_len(sensor.max_width, sensor.max_height);
        let staging = MappedBuffer::create(&self.config.staging_path(camera), frame_len)?;
        let shared = Arc::new(HarvestShared::new(
            camera,
            Arc::clone(&self.hardware),
            Arc::clone(&attr.sink),
            staging,
        ));
        handle.shared = Some(Arc::clone(&shared));

        let primary = PrimaryHarvester::new(
            Arc::clone(&shared),
            handle.topology.encoder(),
            timeouts,
            handle.thumbnail.is_some(),
        );
        handle.primary = Some(primary.spawn()?);

        if let Some(thumbnail) = &handle.thumbnail {
            let output = MappedBuffer::create(&self.config.composite_path(camera), frame_len)?;
            let harvester =
                ThumbnailHarvester::new(shared, thumbnail.encoder(), timeouts, output);
            handle.thumb_loop = Some(harvester.spawn()?);
        }
        Ok(())
    }

    /// Request photos from an active camera.
    ///
    /// Replaces any outstanding request; the encoder (and the thumbnail
    /// encoder) accept exactly the requested number of pictures.
    pub fn take_photo(&mut self, camera: u32, mode: PhotoMode) -> PhotoResult<()> {
        let slot = self.active_slot(camera, "take a photo")?;
        let count = match mode {
            PhotoMode::Single => 1,
            PhotoMode::Multiple(0) => {
                return Err(PhotoError::Configuration(
                    "multiple photo count must be at least 1".into(),
                ));
            }
            PhotoMode::Multiple(count) => count,
            PhotoMode::Lapse => {
                return Err(PhotoError::Unsupported("lapse photos".into()));
            }
        };

        let Some(handle) = slot.handle.as_mut() else {
            return Err(PhotoError::NotInitialized(camera));
        };
        if let Some(shared) = &handle.shared {
            shared.pending().set(count);
        }
        handle.topology.start_receive(count)?;
        if let Some(thumbnail) = &mut handle.thumbnail {
            thumbnail.start_receive(count)?;
        }

        info!(camera, count, "Taking photos");
        Ok(())
    }

    /// Update the photo size in the parameter store; applied by [`reset`](Self::reset)
    pub fn set_photo_resolution(&mut self, camera: u32, width: u32, height: u32) -> PhotoResult<()> {
        Self::slot_index(camera)?;
        if width == 0 || height == 0 {
            return Err(PhotoError::Configuration(format!(
                "photo resolution {width}x{height} has a zero dimension"
            )));
        }
        let photo = &mut self.config.sensor_mut(camera)?.photo;
        photo.image_width = width;
        photo.image_height = height;
        debug!(camera, width, height, "Photo resolution updated");
        Ok(())
    }

    /// Re-apply the configured photo size to a running pipeline.
    ///
    /// Combo pipelines cannot be reset. Nothing happens when the encoder
    /// already runs at the configured size. If a step fails the camera stays
    /// in `ResettingAttrs` and only `deinit` is accepted.
    pub fn reset(&mut self, camera: u32) -> PhotoResult<()> {
        let sensor = self.config.sensor(camera).cloned();
        let slot = self.active_slot(camera, "reset")?;
        let sensor = sensor?;
        let Slot { state, handle } = slot;
        let Some(handle) = handle.as_mut() else {
            return Err(PhotoError::NotInitialized(camera));
        };

        if let BindMode::Combo { combo_channel } = handle.mode() {
            error!(camera, combo_channel, "Combo encoder does not support reset");
            return Err(PhotoError::Unsupported(format!(
                "reset of camera {camera} in combo group {combo_channel}"
            )));
        }

        info!(camera, "Photo reset start");
        *state = LifecycleState::ResettingAttrs;
        match handle.topology.apply_resolution(&sensor) {
            Ok(changed) => {
                *state = LifecycleState::Active;
                info!(camera, changed, "Photo reset end");
                Ok(())
            }
            Err(e) => {
                error!(camera, error = %e, "Photo reset failed");
                Err(e)
            }
        }
    }

    /// Stop the harvesters and release every resource of `camera`.
    ///
    /// A no-op for an uninitialized camera. After a failure the camera stays
    /// `Deinitializing` and calling again resumes the teardown.
    pub fn deinit(&mut self, camera: u32) -> PhotoResult<()> {
        let slot = self.slot_mut(camera)?;
        if slot.state == LifecycleState::Uninit {
            debug!(camera, "Photo pipeline already deinitialized");
            return Ok(());
        }

        info!(camera, "Photo pipeline deinit");
        slot.state = LifecycleState::Deinitializing;
        if let Some(handle) = &mut slot.handle
            && let Err(e) = handle.release()
        {
            error!(camera, error = %e, "Photo pipeline deinit failed");
            return Err(e);
        }

        slot.handle = None;
        slot.state = LifecycleState::Uninit;
        info!(camera, "Photo pipeline deinit end");
        Ok(())
    }
}

impl Drop for PhotoService {
    fn drop(&mut self) {
        for camera in 0..MAX_CAMERAS {
            if let Err(e) = self.deinit(camera) {
                error!(camera, error = %e, "Failed to deinitialize camera on shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::hardware::SimulatedHardware;
    use std::time::Duration;

    fn service() -> (PhotoService, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.scratch_dir = dir.path().to_path_buf();
        config.thumbnail.enabled = false;
        config.timeouts.primary_acquire_ms = 50;
        let sensor = &mut config.sensors[0];
        sensor.max_width = 64;
        sensor.max_height = 48;
        sensor.photo.image_width = 64;
        sensor.photo.image_height = 48;
        sensor.photo.capture.width = 64;
        sensor.photo.capture.height = 48;

        let hw = Arc::new(SimulatedHardware::with_frame_interval(Duration::ZERO));
        (PhotoService::new(hw, config).unwrap(), dir)
    }

    #[test]
    fn test_camera_bounds_checked() {
        let (mut service, _dir) = service();
        assert!(matches!(
            service.init(PhotoAttr::new(MAX_CAMERAS, |_: PhotoEvent<'_>| {})),
            Err(PhotoError::InvalidCamera { .. })
        ));
        assert!(matches!(
            service.state(MAX_CAMERAS),
            Err(PhotoError::InvalidCamera { .. })
        ));
    }

    #[test]
    fn test_camera_without_config_stays_uninit() {
        let (mut service, _dir) = service();
        assert!(matches!(
            service.init(PhotoAttr::new(1, |_: PhotoEvent<'_>| {})),
            Err(PhotoError::Configuration(_))
        ));
        assert_eq!(service.state(1).unwrap(), LifecycleState::Uninit);
    }

    #[test]
    fn test_operations_require_active_camera() {
        let (mut service, _dir) = service();
        assert!(matches!(
            service.take_photo(0, PhotoMode::Single),
            Err(PhotoError::NotInitialized(0))
        ));
        assert!(matches!(service.reset(0), Err(PhotoError::NotInitialized(0))));
        assert!(service.deinit(0).is_ok());
    }

    #[test]
    fn test_photo_modes() {
        let (mut service, _dir) = service();
        service.init(PhotoAttr::new(0, |_: PhotoEvent<'_>| {})).unwrap();

        assert!(matches!(
            service.take_photo(0, PhotoMode::Lapse),
            Err(PhotoError::Unsupported(_))
        ));
        assert!(matches!(
            service.take_photo(0, PhotoMode::Multiple(0)),
            Err(PhotoError::Configuration(_))
        ));
        service.deinit(0).unwrap();
    }

    #[test]
    fn test_zero_resolution_rejected() {
        let (mut service, _dir) = service();
        assert!(matches!(
            service.set_photo_resolution(0, 0, 10),
            Err(PhotoError::Configuration(_))
        ));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(LifecycleState::ResettingAttrs.to_string(), "resetting attributes");
        assert_eq!(LifecycleState::default(), LifecycleState::Uninit);
    }
}
