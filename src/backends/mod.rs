// SPDX-License-Identifier: MPL-2.0

//! Backend abstraction layer for the hardware media pipeline
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               Photo Pipeline                │
//! └────────────────────┬────────────────────────┘
//!                      │
//! ┌────────────────────┴────────────────────────┐
//! │              Backend Layer                  │
//! │  ┌──────────────────┐  ┌─────────────────┐  │
//! │  │  MediaHardware   │  │   Simulated     │  │
//! │  │     (trait)      │◀─│   hardware      │  │
//! │  └──────────────────┘  └─────────────────┘  │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`hardware`]: Stage/queue operations and the in-memory implementation

pub mod hardware;
