// SPDX-License-Identifier: GPL-3.0-only

//! Primary and thumbnail harvesters
//!
//! ```text
//! photo encoder ──▶ PrimaryHarvester ──▶ staging buffer ──give──┐
//!                        │ (no thumbnail chain)                  ▼
//!                        └──────────▶ sink        ThumbnailHarvester ◀── thumbnail encoder
//!                                                        │ composite
//!                                                        ▼
//!                                                      sink
//! ```
//!
//! Both harvesters discard the first frame of their queue, release every
//! acquired frame through [`FrameGuard`] and only ever block on bounded
//! waits.
//!
//! A staged photo stays put until the thumbnail harvester consumes it or the
//! handoff window runs out. A pairing attempt that comes later than the
//! window finds the photo expired and reports it lost instead of compositing.

use super::harvest_loop::{HarvestLoop, LoopAction};
use super::signal::HandoffSignal;
use crate::backends::hardware::{FrameGuard, MediaHardware, StageDescriptor};
use crate::config::HarvestTimeouts;
use crate::constants::HARDWARE_ERROR_BACKOFF;
use crate::errors::{HardwareError, PhotoError, PhotoResult};
use crate::media::composite_thumbnail;
use crate::storage::MappedBuffer;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Why a frame never reached the sink as a photo
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossReason {
    /// No staged full-resolution frame within the handoff window
    HandoffTimeout,
    /// The photo does not fit its output buffer
    Oversized,
    /// Frame bytes could not be mapped or parsed
    Unreadable,
}

/// Event delivered to the application sink from a harvester thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhotoEvent<'a> {
    /// A finished photo; `data` is only valid during the callback
    Ready {
        camera: u32,
        data: &'a [u8],
        sequence: u32,
        /// Thumbnail spliced into the Exif segment
        composited: bool,
    },
    /// A frame was dropped
    FrameLost {
        camera: u32,
        sequence: u32,
        reason: LossReason,
    },
}

/// Receiver of photo events.
///
/// Called on harvester threads; implementations must not block for long.
pub trait PhotoSink: Send + Sync {
    fn on_event(&self, event: PhotoEvent<'_>);
}

impl<F> PhotoSink for F
where
    F: Fn(PhotoEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: PhotoEvent<'_>) {
        self(event)
    }
}

/// Photos still owed to the application
#[derive(Debug, Default)]
pub struct PendingPhotos(AtomicU32);

impl PendingPhotos {
    pub fn set(&self, count: u32) {
        self.0.store(count, Ordering::Release);
    }

    pub fn get(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }

    /// Decrement if positive; returns whether a photo was owed
    pub fn take_one(&self) -> bool {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Full-resolution frame staged for the thumbnail harvester
struct Staged {
    buffer: MappedBuffer,
    len: usize,
    sequence: u32,
    staged_at: Instant,
    /// Staged and not yet consumed by the thumbnail harvester
    fresh: bool,
}

impl Staged {
    fn expired(&self, window: Duration) -> bool {
        !self.fresh || self.staged_at.elapsed() > window
    }
}

/// State shared by the harvesters of one camera and its lifecycle owner
pub struct HarvestShared {
    camera: u32,
    hardware: Arc<dyn MediaHardware>,
    sink: Arc<dyn PhotoSink>,
    pending: PendingPhotos,
    signal: HandoffSignal,
    staging: Mutex<Staged>,
    /// Notified whenever the staged photo stops being fresh
    consumed: Condvar,
    shutdown: AtomicBool,
}

impl HarvestShared {
    pub fn new(
        camera: u32,
        hardware: Arc<dyn MediaHardware>,
        sink: Arc<dyn PhotoSink>,
        staging: MappedBuffer,
    ) -> Self {
        Self {
            camera,
            hardware,
            sink,
            pending: PendingPhotos::default(),
            signal: HandoffSignal::new(0, 1),
            staging: Mutex::new(Staged {
                buffer: staging,
                len: 0,
                sequence: 0,
                staged_at: Instant::now(),
                fresh: false,
            }),
            consumed: Condvar::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn pending(&self) -> &PendingPhotos {
        &self.pending
    }

    /// Flag shutdown and wake both harvesters from their handoff waits
    pub fn begin_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.signal.give();
        drop(self.lock_staging());
        self.consumed.notify_all();
    }

    fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn lock_staging(&self) -> MutexGuard<'_, Staged> {
        self.staging.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait up to `timeout` for the thumbnail harvester to consume the staged photo
    fn wait_consumed<'s>(
        &'s self,
        staged: MutexGuard<'s, Staged>,
        timeout: Duration,
    ) -> MutexGuard<'s, Staged> {
        self.consumed
            .wait_timeout_while(staged, timeout, |s| s.fresh && !self.is_shutting_down())
            .map(|(guard, _)| guard)
            .unwrap_or_else(|e| e.into_inner().0)
    }

    /// Mark the staged photo consumed and let the primary restage
    fn release_staged(&self, mut staged: MutexGuard<'_, Staged>) {
        staged.fresh = false;
        drop(staged);
        self.consumed.notify_all();
    }

    fn emit(&self, event: PhotoEvent<'_>) {
        self.sink.on_event(event);
    }

    fn lost(&self, sequence: u32, reason: LossReason) {
        self.emit(PhotoEvent::FrameLost {
            camera: self.camera,
            sequence,
            reason,
        });
    }
}

fn loss_reason(error: &PhotoError) -> LossReason {
    match error {
        PhotoError::BufferOverflow { .. } | PhotoError::ThumbnailTooLarge { .. } => {
            LossReason::Oversized
        }
        _ => LossReason::Unreadable,
    }
}

/// Log a failed acquire; back off unless it was a plain timeout
fn acquire_failed(stage: StageDescriptor, error: &HardwareError) {
    if error.is_timeout() {
        trace!(%stage, "No frame within acquire timeout");
    } else {
        warn!(%stage, error = %error, "Failed to acquire encoded frame");
        thread::sleep(HARDWARE_ERROR_BACKOFF);
    }
}

/// Drop the frame the encoder emitted while being set up
fn discard_warm_up(hardware: &dyn MediaHardware, stage: StageDescriptor, timeout: Duration) {
    match FrameGuard::acquire(hardware, stage, timeout) {
        Ok(frame) => debug!(%stage, sequence = frame.sequence(), "Dropped warm-up frame"),
        Err(e) => warn!(%stage, error = %e, "No warm-up frame"),
    }
}

/// Pulls full-resolution photos off the photo encoder
pub struct PrimaryHarvester {
    shared: Arc<HarvestShared>,
    stage: StageDescriptor,
    acquire_timeout: Duration,
    handoff_timeout: Duration,
    /// A thumbnail harvester consumes staged frames
    handoff: bool,
}

impl PrimaryHarvester {
    pub fn new(
        shared: Arc<HarvestShared>,
        stage: StageDescriptor,
        timeouts: &HarvestTimeouts,
        handoff: bool,
    ) -> Self {
        Self {
            shared,
            stage,
            acquire_timeout: timeouts.primary_acquire(),
            handoff_timeout: timeouts.handoff(),
            handoff,
        }
    }

    /// Run on a thread named after the encoder channel
    pub fn spawn(self) -> PhotoResult<HarvestLoop> {
        let name = format!("photo-jpeg-{}", self.stage.channel);
        HarvestLoop::start_with_init(
            &name,
            move || {
                discard_warm_up(self.shared.hardware.as_ref(), self.stage, self.acquire_timeout);
                Ok(self)
            },
            |harvester: &mut Self| harvester.step(),
        )
    }

    /// One bounded acquire and its handling
    pub fn step(&mut self) -> LoopAction {
        let hardware = Arc::clone(&self.shared.hardware);
        match FrameGuard::acquire(hardware.as_ref(), self.stage, self.acquire_timeout) {
            Ok(frame) => self.handle(&frame),
            Err(e) => acquire_failed(self.stage, &e),
        }
        LoopAction::Continue
    }

    fn handle(&self, frame: &FrameGuard<'_>) {
        let shared = &self.shared;
        let sequence = frame.sequence();

        if !self.handoff && !shared.pending.take_one() {
            trace!(camera = shared.camera, sequence, "No photo pending, frame released");
            return;
        }

        let bytes = match frame.bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(camera = shared.camera, sequence, error = %e, "Failed to map photo");
                shared.lost(sequence, LossReason::Unreadable);
                return;
            }
        };

        let mut staged = shared.lock_staging();
        let mut expired = None;
        if self.handoff {
            staged = shared.wait_consumed(staged, self.handoff_timeout);
            if shared.is_shutting_down() {
                return;
            }
            if staged.fresh {
                warn!(
                    camera = shared.camera,
                    sequence = staged.sequence,
                    "Staged photo expired before a thumbnail paired with it"
                );
                staged.fresh = false;
                expired = Some(staged.sequence);
            }
        }

        let copied = staged.buffer.copy_from(&bytes);
        if let Err(e) = copied {
            drop(staged);
            warn!(camera = shared.camera, sequence, error = %e, "Photo does not fit staging buffer");
            if let Some(old) = expired {
                shared.lost(old, LossReason::HandoffTimeout);
            }
            shared.lost(sequence, LossReason::Oversized);
            return;
        }
        staged.len = bytes.len();
        staged.sequence = sequence;

        if self.handoff {
            staged.staged_at = Instant::now();
            staged.fresh = true;
            drop(staged);
            shared.signal.give();
            if let Some(old) = expired {
                shared.lost(old, LossReason::HandoffTimeout);
            }
            debug!(camera = shared.camera, sequence, len = bytes.len(), "Photo staged");
            return;
        }

        let len = staged.len;
        shared.emit(PhotoEvent::Ready {
            camera: shared.camera,
            data: &staged.buffer.as_slice()[..len],
            sequence,
            composited: false,
        });
        debug!(camera = shared.camera, sequence, len, "Photo delivered");
    }
}

/// Pairs thumbnail frames with staged photos and delivers the composite
pub struct ThumbnailHarvester {
    shared: Arc<HarvestShared>,
    stage: StageDescriptor,
    warm_up_timeout: Duration,
    acquire_timeout: Duration,
    handoff_timeout: Duration,
    /// Composite output, owned by this harvester alone
    output: MappedBuffer,
}

impl ThumbnailHarvester {
    pub fn new(
        shared: Arc<HarvestShared>,
        stage: StageDescriptor,
        timeouts: &HarvestTimeouts,
        output: MappedBuffer,
    ) -> Self {
        Self {
            shared,
            stage,
            warm_up_timeout: timeouts.primary_acquire(),
            acquire_timeout: timeouts.thumbnail_acquire(),
            handoff_timeout: timeouts.handoff(),
            output,
        }
    }

    /// Run on a thread named after the thumbnail encoder channel
    pub fn spawn(self) -> PhotoResult<HarvestLoop> {
        let name = format!("photo-thumb-{}", self.stage.channel);
        HarvestLoop::start_with_init(
            &name,
            move || {
                discard_warm_up(self.shared.hardware.as_ref(), self.stage, self.warm_up_timeout);
                Ok(self)
            },
            |harvester: &mut Self| harvester.step(),
        )
    }

    /// One bounded acquire, one bounded handoff wait
    pub fn step(&mut self) -> LoopAction {
        let hardware = Arc::clone(&self.shared.hardware);
        let thumb = match FrameGuard::acquire(hardware.as_ref(), self.stage, self.acquire_timeout) {
            Ok(frame) => frame,
            Err(e) => {
                acquire_failed(self.stage, &e);
                return LoopAction::Continue;
            }
        };

        if !self.shared.signal.wait(self.handoff_timeout) {
            warn!(
                camera = self.shared.camera,
                sequence = thumb.sequence(),
                "Lost photo, no full frame within handoff window"
            );
            self.shared.lost(thumb.sequence(), LossReason::HandoffTimeout);
            return LoopAction::Continue;
        }
        if self.shared.is_shutting_down() {
            return LoopAction::Stop;
        }

        self.deliver(&thumb);
        LoopAction::Continue
    }

    /// Composite `thumb` with the staged photo if it is still within the window
    fn deliver(&mut self, thumb: &FrameGuard<'_>) {
        let shared = &self.shared;
        let staged = shared.lock_staging();

        if staged.expired(self.handoff_timeout) {
            shared.release_staged(staged);
            warn!(
                camera = shared.camera,
                sequence = thumb.sequence(),
                "Lost photo, thumbnail arrived after the handoff window"
            );
            shared.lost(thumb.sequence(), LossReason::HandoffTimeout);
            return;
        }
        if !shared.pending.take_one() {
            shared.release_staged(staged);
            trace!(camera = shared.camera, "No photo pending, pair released");
            return;
        }

        let sequence = staged.sequence;
        let result = thumb.bytes().map_err(PhotoError::from).and_then(|thumb_bytes| {
            let photo = &staged.buffer.as_slice()[..staged.len];
            composite_thumbnail(photo, &thumb_bytes, self.output.as_mut_slice())
        });
        shared.release_staged(staged);

        match result {
            Ok(len) => {
                shared.emit(PhotoEvent::Ready {
                    camera: shared.camera,
                    data: &self.output.as_slice()[..len],
                    sequence,
                    composited: true,
                });
                debug!(camera = shared.camera, sequence, len, "Composited photo delivered");
            }
            Err(e) => {
                warn!(camera = shared.camera, sequence, error = %e, "Thumbnail composite failed");
                shared.lost(sequence, loss_reason(&e));
            }
        }
    }
}
