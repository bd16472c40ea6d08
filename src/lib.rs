// SPDX-License-Identifier: MPL-2.0

//! Photo Capture - still-photo coordination core for hardware media pipelines
//!
//! This library drives a capture → (scale) → JPEG encode stage graph, harvests
//! encoded photos on dedicated threads, splices a thumbnail into each photo's
//! Exif segment and hands the result to an application sink.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`backends`]: Hardware pipeline abstraction and a simulated backend
//! - [`media`]: JPEG/Exif thumbnail lookup and compositing
//! - [`pipelines`]: Photo pipeline topology, harvesters and lifecycle
//! - [`config`]: Pipeline parameter store
//! - [`storage`]: Memory-mapped scratch buffers
//!
//! # Example
//!
//! ```ignore
//! let hw = Arc::new(SimulatedHardware::new());
//! let mut service = PhotoService::new(hw, Config::default())?;
//! service.init(PhotoAttr::new(0, |event: PhotoEvent<'_>| println!("{event:?}")))?;
//! service.take_photo(0, PhotoMode::Single)?;
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod media;
pub mod pipelines;
pub mod storage;

// Re-export commonly used types
pub use config::Config;
pub use errors::{PhotoError, PhotoResult};
pub use pipelines::photo::{
    LifecycleState, PhotoAttr, PhotoEvent, PhotoMode, PhotoService, PhotoSink,
};
