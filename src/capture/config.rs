//! Camera capture and pipeline configuration.
//!
//! Only plumbing is configurable here: device, preview size, model
//! artifacts and the export directory. The burst selection heuristic
//! is fixed at compile time (see [`crate::burst`]).

use crate::detection::ModelSpec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Preview size requested from the camera.
pub const DESIRED_PREVIEW_WIDTH: u32 = 640;
/// Preview size requested from the camera.
pub const DESIRED_PREVIEW_HEIGHT: u32 = 480;

/// Configuration for camera capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Camera device index or identifier.
    pub device_id: u32,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Target frames per second.
    pub fps: u32,
    /// Sensor orientation relative to the display, in degrees.
    ///
    /// Folded into the frame-to-model transform so the detector sees
    /// upright images.
    pub sensor_rotation: i32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_id: 0,
            width: DESIRED_PREVIEW_WIDTH,
            height: DESIRED_PREVIEW_HEIGHT,
            fps: 30,
            sensor_rotation: 0,
        }
    }
}

impl CaptureConfig {
    /// Creates a new configuration with the specified dimensions.
    pub fn with_dimensions(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Default::default()
        }
    }

    /// Validates the configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::InvalidDimensions);
        }
        if self.fps == 0 || self.fps > 120 {
            return Err(ConfigError::InvalidFrameRate);
        }
        if self.sensor_rotation.rem_euclid(90) != 0 {
            return Err(ConfigError::InvalidRotation(self.sensor_rotation));
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// Width or height is zero.
    #[error("invalid frame dimensions")]
    InvalidDimensions,
    /// Frame rate outside 1-120.
    #[error("invalid frame rate (must be 1-120 fps)")]
    InvalidFrameRate,
    /// Rotation is not a multiple of 90 degrees.
    #[error("invalid sensor rotation {0} (must be a multiple of 90 degrees)")]
    InvalidRotation(i32),
    /// The file could not be read.
    #[error("failed to read config file: {0}")]
    FileReadError(String),
    /// The file is not valid TOML for this format.
    #[error("failed to parse config file: {0}")]
    ParseError(String),
}

/// Full configuration file format.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileConfig {
    /// Camera settings.
    #[serde(default)]
    pub capture: CaptureConfig,
    /// Detector artifacts and runtime settings.
    #[serde(default)]
    pub model: ModelSpec,
    /// Export destination.
    #[serde(default)]
    pub export: ExportConfig,
    /// Run length, metrics and debug output.
    #[serde(default)]
    pub output: OutputConfig,
}

/// Where exported burst winners are written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Directory receiving `max<millis>.jpg` files. Created on demand.
    pub directory: PathBuf,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("captures"),
        }
    }
}

/// Output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Run continuously (true) or process fixed number of frames (false).
    pub continuous: bool,
    /// Number of capture attempts if not continuous.
    pub frame_count: u32,
    /// Metrics server port (0 to disable).
    pub metrics_port: u16,
    /// Outline kept detections on a copy of each model input.
    pub annotate_crops: bool,
    /// Overwrite `preview.jpg` in the export directory with each model
    /// input.
    pub save_crops: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            continuous: false,
            frame_count: 100,
            metrics_port: 9090,
            annotate_crops: false,
            save_crops: false,
        }
    }
}

impl FileConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileReadError(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Parses configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: FileConfig =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.capture.validate()?;
        Ok(config)
    }
}
