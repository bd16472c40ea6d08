// SPDX-License-Identifier: MPL-2.0

//! Processing pipelines
//!
//! ```text
//! ┌──────────────┐     ┌───────────────────┐     ┌──────────────┐
//! │ Sensor/ISP   │ ──▶ │  Photo Pipeline   │ ──▶ │  Sink        │
//! │  (capture)   │     │  - scale/encode   │     │  (JPEG with  │
//! │              │     │  - harvest        │     │   thumbnail) │
//! │              │     │  - composite      │     │              │
//! └──────────────┘     └───────────────────┘     └──────────────┘
//! ```
//!
//! # Modules
//!
//! - [`photo`]: Still-photo topology, harvesters and lifecycle

pub mod photo;
