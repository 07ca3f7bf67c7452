//! Camera input and frame handling.
//!
//! This module provides abstractions for capturing RGB frames from a
//! camera and managing capture configuration. Frames are borrowed by
//! the pipeline only for as long as it takes to snapshot them.

mod camera;
mod config;
mod frame;

#[cfg(feature = "camera")]
pub use camera::NokhwaCamera;
pub use camera::{Camera, CameraError, MockCamera};
pub use config::{
    CaptureConfig, ConfigError, ExportConfig, FileConfig, OutputConfig, DESIRED_PREVIEW_HEIGHT,
    DESIRED_PREVIEW_WIDTH,
};
pub use frame::{Frame, RGB_CHANNELS};
