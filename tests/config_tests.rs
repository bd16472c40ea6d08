// SPDX-License-Identifier: MPL-2.0

//! Integration tests for configuration module

use photo_capture::{Config, PhotoError};
use std::time::Duration;

#[test]
fn test_config_default() {
    // Test that default config can be created
    let config = Config::default();

    // Check sensible defaults
    assert_eq!(config.sensors.len(), 1, "One sensor should be configured");
    assert!(config.thumbnail.enabled, "Thumbnails should be enabled by default");
    assert!(config.validate().is_ok());
}

#[test]
fn test_default_timeouts_are_bounded() {
    let timeouts = Config::default().timeouts;
    assert!(timeouts.thumbnail_acquire() < timeouts.primary_acquire());
    assert!(timeouts.handoff() > Duration::ZERO);
}

#[test]
fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("photo.json");
    let mut config = Config::default();
    config.sensors[0].photo.qfactor = 90;
    std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

    let loaded = Config::load(&path).unwrap();
    assert_eq!(loaded.sensors[0].photo.qfactor, 90);
    assert_eq!(loaded, config);
}

#[test]
fn test_load_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let result = Config::load(&dir.path().join("missing.json"));
    assert!(matches!(result, Err(PhotoError::Io { .. })));
}

#[test]
fn test_load_rejects_invalid_values() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("photo.json");
    let mut config = Config::default();
    config.encoder_buffer_divisor = 0;
    std::fs::write(&path, serde_json::to_string(&config).unwrap()).unwrap();

    assert!(matches!(
        Config::load(&path),
        Err(PhotoError::Configuration(_))
    ));
}

#[test]
fn test_scratch_paths_live_in_scratch_dir() {
    let mut config = Config::default();
    config.scratch_dir = "/var/photo".into();
    assert!(config.staging_path(0).starts_with("/var/photo"));
    assert_ne!(config.staging_path(0), config.staging_path(1));
    assert_ne!(config.staging_path(0), config.composite_path(0));
}
