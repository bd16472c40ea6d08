// SPDX-License-Identifier: GPL-3.0-only
//! Thread lifecycle management for harvester loops
//!
//! Each harvester runs on its own named OS thread. The controller owns the
//! join handle and a cooperative stop flag; the loop body only ever blocks on
//! bounded waits, so a stop request is observed within one iteration.

use crate::errors::{PhotoError, PhotoResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Action returned by the loop callback to control loop behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    /// Continue running the loop
    Continue,
    /// Stop the loop gracefully
    Stop,
}

/// Controller for a harvester loop running in a separate thread
pub struct HarvestLoop {
    /// Thread handle for joining
    thread_handle: Option<JoinHandle<()>>,
    /// Signal to stop the loop
    stop_signal: Arc<AtomicBool>,
    /// Thread name, also used for logging
    name: String,
}

impl HarvestLoop {
    /// Start a loop with initialization on a thread called `name`
    ///
    /// The `init_fn` is called once on the new thread to produce the loop
    /// state. If it fails, the thread exits without running `loop_fn`.
    /// `loop_fn` is then called repeatedly until it returns
    /// `LoopAction::Stop` or a stop is requested.
    ///
    /// Fails with `TaskSpawn` when the OS refuses to create the thread.
    pub fn start_with_init<S, I, F>(name: &str, init_fn: I, mut loop_fn: F) -> PhotoResult<Self>
    where
        S: Send + 'static,
        I: FnOnce() -> PhotoResult<S> + Send + 'static,
        F: FnMut(&mut S) -> LoopAction + Send + 'static,
    {
        let stop_signal = Arc::new(AtomicBool::new(false));
        let stop_signal_clone = Arc::clone(&stop_signal);
        let name_clone = name.to_string();

        info!(name = %name, "Starting harvest loop");

        let thread_handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                debug!(name = %name_clone, "Harvest loop thread started, initializing...");

                let mut state = match init_fn() {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(name = %name_clone, error = %e, "Initialization failed");
                        return;
                    }
                };

                loop {
                    if stop_signal_clone.load(Ordering::SeqCst) {
                        debug!(name = %name_clone, "Stop signal received");
                        break;
                    }

                    match loop_fn(&mut state) {
                        LoopAction::Continue => {}
                        LoopAction::Stop => {
                            debug!(name = %name_clone, "Loop requested stop");
                            break;
                        }
                    }
                }

                info!(name = %name_clone, "Harvest loop thread exiting");
            })
            .map_err(|source| PhotoError::TaskSpawn {
                name: name.to_string(),
                source,
            })?;

        Ok(Self {
            thread_handle: Some(thread_handle),
            stop_signal,
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if the loop is still running
    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Signal the loop to stop (non-blocking)
    pub fn request_stop(&self) {
        debug!(name = %self.name, "Requesting harvest loop stop");
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Stop the loop and wait for the thread to finish
    pub fn stop(&mut self) {
        self.request_stop();
        self.join();
    }

    /// Wait for the thread to finish without sending stop signal
    pub fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            debug!(name = %self.name, "Waiting for harvest loop thread to finish");
            if let Err(e) = handle.join() {
                warn!(name = %self.name, "Harvest loop thread panicked: {:?}", e);
            } else {
                debug!(name = %self.name, "Harvest loop thread finished");
            }
        }
    }
}

impl Drop for HarvestLoop {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            debug!(name = %self.name, "HarvestLoop dropped, stopping loop");
            self.stop();
        }
    }
}
