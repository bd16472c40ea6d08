// SPDX-License-Identifier: GPL-3.0-only

//! Pipeline parameter store
//!
//! Mirrors the per-sensor photo parameters, the shared thumbnail parameters
//! and the harvester timing constants. Loaded from JSON, or built from
//! [`Config::default`] for a single 1080p sensor.

use crate::backends::hardware::PixelFormat;
use crate::constants;
use crate::errors::{PhotoError, PhotoResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Capture (sensor/ISP output) channel settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Capture channel index
    pub channel: i32,
    /// Native output width of the channel
    pub width: u32,
    /// Native output height of the channel
    pub height: u32,
    /// Pixel format delivered to the encoder
    pub pixel_format: PixelFormat,
}

/// Photo stream settings for one sensor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoConfig {
    /// Encoded photo width
    pub image_width: u32,
    /// Encoded photo height
    pub image_height: u32,
    /// Capture channel feeding the photo stream
    pub capture: CaptureConfig,
    /// Scaler channel used when the capture size differs from the photo size
    pub scaler_channel: i32,
    /// JPEG encoder channel
    pub encoder_channel: i32,
    /// JPEG quality factor (1-99)
    pub qfactor: u32,
    /// Attach the encoder to a combo group instead of binding it
    #[serde(default)]
    pub enable_combo: bool,
    /// Encoder channel that owns the combo group
    #[serde(default)]
    pub combo_encoder_channel: i32,
}

/// Sensor limits plus its photo stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Largest width the sensor can deliver
    pub max_width: u32,
    /// Largest height the sensor can deliver
    pub max_height: u32,
    /// Photo stream parameters
    pub photo: PhotoConfig,
}

/// Thumbnail stream settings shared by all sensors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThumbConfig {
    /// Run the thumbnail harvester and composite thumbnails into photos
    pub enabled: bool,
    /// Thumbnail width before alignment
    pub width: u32,
    /// Thumbnail height before alignment
    pub height: u32,
    /// Capture channel feeding the thumbnail encoder
    pub capture_channel: i32,
    /// Thumbnail JPEG encoder channel
    pub encoder_channel: i32,
}

impl Default for ThumbConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            width: 320,
            height: 180,
            capture_channel: 2,
            encoder_channel: 15,
        }
    }
}

/// Harvester wait bounds, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestTimeouts {
    pub primary_acquire_ms: u64,
    pub thumbnail_acquire_ms: u64,
    pub handoff_ms: u64,
}

impl HarvestTimeouts {
    pub fn primary_acquire(&self) -> Duration {
        Duration::from_millis(self.primary_acquire_ms)
    }

    pub fn thumbnail_acquire(&self) -> Duration {
        Duration::from_millis(self.thumbnail_acquire_ms)
    }

    pub fn handoff(&self) -> Duration {
        Duration::from_millis(self.handoff_ms)
    }
}

impl Default for HarvestTimeouts {
    fn default() -> Self {
        Self {
            primary_acquire_ms: constants::PRIMARY_ACQUIRE_TIMEOUT.as_millis() as u64,
            thumbnail_acquire_ms: constants::THUMBNAIL_ACQUIRE_TIMEOUT.as_millis() as u64,
            handoff_ms: constants::HANDOFF_TIMEOUT.as_millis() as u64,
        }
    }
}

fn default_scratch_dir() -> PathBuf {
    PathBuf::from(constants::DEFAULT_SCRATCH_DIR)
}

fn default_buffer_divisor() -> u32 {
    constants::DEFAULT_ENCODER_BUFFER_DIVISOR
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the scratch files behind the shared buffers
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,
    /// Sensor parameters, indexed by camera id
    pub sensors: Vec<SensorConfig>,
    /// Thumbnail parameters
    #[serde(default)]
    pub thumbnail: ThumbConfig,
    /// Harvester wait bounds
    #[serde(default)]
    pub timeouts: HarvestTimeouts,
    /// Encoder stream buffer is `max_width * max_height / divisor`
    #[serde(default = "default_buffer_divisor")]
    pub encoder_buffer_divisor: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scratch_dir: default_scratch_dir(),
            sensors: vec![SensorConfig {
                max_width: 2688,
                max_height: 1520,
                photo: PhotoConfig {
                    image_width: 1920,
                    image_height: 1080,
                    capture: CaptureConfig {
                        channel: 1,
                        width: 1920,
                        height: 1080,
                        pixel_format: PixelFormat::Nv12,
                    },
                    scaler_channel: 0,
                    encoder_channel: 2,
                    qfactor: 70,
                    enable_combo: false,
                    combo_encoder_channel: 0,
                },
            }],
            thumbnail: ThumbConfig::default(),
            timeouts: HarvestTimeouts::default(),
            encoder_buffer_divisor: default_buffer_divisor(),
        }
    }
}

impl Config {
    /// Load the parameter store from a JSON file
    pub fn load(path: &Path) -> PhotoResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| PhotoError::io(path, e))?;
        let config: Config = serde_json::from_str(&text)
            .map_err(|e| PhotoError::Configuration(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        debug!(path = %path.display(), sensors = config.sensors.len(), "Loaded config");
        Ok(config)
    }

    /// Reject values that would make buffer sizing meaningless
    pub fn validate(&self) -> PhotoResult<()> {
        if self.encoder_buffer_divisor == 0 {
            return Err(PhotoError::Configuration(
                "encoder_buffer_divisor must be non-zero".into(),
            ));
        }
        for (camera, sensor) in self.sensors.iter().enumerate() {
            let photo = &sensor.photo;
            if sensor.max_width == 0
                || sensor.max_height == 0
                || photo.image_width == 0
                || photo.image_height == 0
            {
                return Err(PhotoError::Configuration(format!(
                    "sensor {camera}: zero dimension"
                )));
            }
        }
        if self.thumbnail.enabled && (self.thumbnail.width == 0 || self.thumbnail.height == 0) {
            return Err(PhotoError::Configuration(
                "thumbnail enabled with zero dimension".into(),
            ));
        }
        Ok(())
    }

    /// Look up the sensor parameters of a camera
    pub fn sensor(&self, camera: u32) -> PhotoResult<&SensorConfig> {
        self.sensors.get(camera as usize).ok_or_else(|| {
            PhotoError::Configuration(format!("no sensor config for camera {camera}"))
        })
    }

    pub fn sensor_mut(&mut self, camera: u32) -> PhotoResult<&mut SensorConfig> {
        self.sensors.get_mut(camera as usize).ok_or_else(|| {
            PhotoError::Configuration(format!("no sensor config for camera {camera}"))
        })
    }

    /// Scratch file backing the staged full-resolution photo
    pub fn staging_path(&self, camera: u32) -> PathBuf {
        self.scratch_dir.join(constants::staging_file_name(camera))
    }

    /// Scratch file backing the composited photo
    pub fn composite_path(&self, camera: u32) -> PathBuf {
        self.scratch_dir.join(constants::composite_file_name(camera))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_round_trips_through_json() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_optional_sections_fill_defaults() {
        let json = r#"{
            "sensors": [{
                "max_width": 640, "max_height": 480,
                "photo": {
                    "image_width": 640, "image_height": 480,
                    "capture": { "channel": 0, "width": 640, "height": 480, "pixel_format": "Nv12" },
                    "scaler_channel": 0, "encoder_channel": 1, "qfactor": 80
                }
            }]
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.timeouts, HarvestTimeouts::default());
        assert_eq!(config.encoder_buffer_divisor, 2);
        assert!(!config.sensors[0].photo.enable_combo);
        assert_eq!(config.scratch_dir, PathBuf::from("/tmp"));
    }

    #[test]
    fn test_missing_sensor_is_configuration_error() {
        let config = Config::default();
        assert!(matches!(
            config.sensor(3),
            Err(PhotoError::Configuration(_))
        ));
    }

    #[test]
    fn test_zero_divisor_rejected() {
        let config = Config {
            encoder_buffer_divisor: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
