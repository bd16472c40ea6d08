// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for photo pipeline operations
//!
//! This module provides command-line functionality for:
//! - Taking photos through the simulated hardware pipeline
//! - Extracting embedded thumbnails from JPEG files
//! - Printing the default parameter store

use chrono::Local;
use photo_capture::backends::hardware::SimulatedHardware;
use photo_capture::media::{ThumbnailAttr, ThumbnailKind, get_embedded_thumbnail_ex};
use photo_capture::{Config, PhotoAttr, PhotoEvent, PhotoMode, PhotoService};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::{Duration, Instant};

/// Folder created under the user's picture directory
const DEFAULT_SAVE_FOLDER: &str = "photo-capture";

/// Upper bound for a whole CLI capture run
const CAPTURE_DEADLINE: Duration = Duration::from_secs(30);

/// Photo copied out of the sink callback
struct SavedPhoto {
    sequence: u32,
    data: Vec<u8>,
    composited: bool,
}

/// Take `count` photos and write them to `output`
pub fn take_photos(
    camera: u32,
    count: u32,
    config_path: Option<PathBuf>,
    output: Option<PathBuf>,
    no_thumbnail: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match config_path {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };
    if no_thumbnail {
        config.thumbnail.enabled = false;
    }

    let output_dir = output.unwrap_or_else(get_default_photo_dir);
    std::fs::create_dir_all(&output_dir)?;

    let (sender, receiver) = mpsc::channel::<SavedPhoto>();
    let sink = move |event: PhotoEvent<'_>| match event {
        PhotoEvent::Ready {
            data,
            sequence,
            composited,
            ..
        } => {
            let _ = sender.send(SavedPhoto {
                sequence,
                data: data.to_vec(),
                composited,
            });
        }
        PhotoEvent::FrameLost {
            sequence, reason, ..
        } => {
            eprintln!("Lost frame {} ({:?})", sequence, reason);
        }
    };

    let hardware = Arc::new(SimulatedHardware::new());
    let mut service = PhotoService::new(hardware, config)?;
    service.init(PhotoAttr::new(camera, sink))?;

    // Set up Ctrl+C handler
    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_clone = Arc::clone(&stop_flag);
    ctrlc::set_handler(move || {
        stop_flag_clone.store(true, Ordering::SeqCst);
    })?;

    let mode = if count == 1 {
        PhotoMode::Single
    } else {
        PhotoMode::Multiple(count)
    };
    service.take_photo(camera, mode)?;
    println!("Taking {} photo(s) on camera {}...", count, camera);

    let start = Instant::now();
    let mut saved = 0;
    while saved < count && start.elapsed() < CAPTURE_DEADLINE {
        if stop_flag.load(Ordering::SeqCst) {
            println!();
            println!("Stopping early...");
            break;
        }

        match receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(photo) => {
                let path = write_photo(&output_dir, &photo)?;
                println!(
                    "Photo saved: {} ({} bytes{})",
                    path.display(),
                    photo.data.len(),
                    if photo.composited { ", thumbnail" } else { "" }
                );
                saved += 1;
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    service.deinit(camera)?;
    println!("{} of {} photo(s) saved", saved, count);
    Ok(())
}

fn write_photo(dir: &Path, photo: &SavedPhoto) -> std::io::Result<PathBuf> {
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    let path = dir.join(format!("IMG_{}_{:04}.jpg", timestamp, photo.sequence));
    std::fs::write(&path, &photo.data)?;
    Ok(path)
}

/// Extract the embedded thumbnail of `input`
pub fn extract_thumbnail(
    input: &Path,
    output: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default();
    let attr = get_embedded_thumbnail_ex(
        input,
        ThumbnailKind::Dcf,
        ThumbnailAttr::default(),
        &config.thumbnail,
    )?;
    let data = attr.data().ok_or("Thumbnail buffer missing")?;

    println!(
        "Thumbnail: {} bytes (requested {}x{})",
        attr.size, attr.width, attr.height
    );
    if let Some(path) = output {
        std::fs::write(&path, data)?;
        println!("Thumbnail saved: {}", path.display());
    }
    Ok(())
}

/// Print `Config::default()` as pretty JSON
pub fn print_config() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(&Config::default())?);
    Ok(())
}

/// Get default photo directory
fn get_default_photo_dir() -> PathBuf {
    dirs::picture_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join(DEFAULT_SAVE_FOLDER)
}
