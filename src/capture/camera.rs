//! Camera abstraction for frame capture.
//!
//! This module provides a trait-based abstraction over camera hardware,
//! allowing for both real camera input and mock implementations for testing.

use super::{frame::RGB_CHANNELS, CaptureConfig, Frame};
use thiserror::Error;

/// Errors that can occur during camera operations.
#[derive(Debug, Error)]
pub enum CameraError {
    /// No camera with the requested identifier.
    #[error("camera device not found: {0}")]
    DeviceNotFound(String),
    /// The device refused to open.
    #[error("failed to open camera: {0}")]
    OpenFailed(String),
    /// The requested format could not be applied.
    #[error("failed to configure camera: {0}")]
    ConfigFailed(String),
    /// Reading a frame failed.
    #[error("failed to capture frame: {0}")]
    CaptureFailed(String),
    /// The camera has not been opened.
    #[error("camera not initialized")]
    NotInitialized,
}

/// Trait for camera implementations.
///
/// This abstraction allows swapping between real camera hardware
/// and mock implementations for testing.
pub trait Camera {
    /// Opens and initializes the camera with the given configuration.
    fn open(&mut self, config: &CaptureConfig) -> Result<(), CameraError>;

    /// Captures a single RGB frame.
    fn capture(&mut self) -> Result<Frame, CameraError>;

    /// Checks if the camera is currently open.
    fn is_open(&self) -> bool;

    /// Closes the camera and releases resources.
    fn close(&mut self);
}

/// Side length of the bright square drawn by [`MockCamera`].
const MOCK_SUBJECT_SIZE: u32 = 64;

/// Mock camera that renders a bright square bouncing vertically
/// over a dark textured background.
///
/// Gives the synthetic detector something to find, with a vertical
/// position that changes from frame to frame.
#[derive(Debug, Default)]
pub struct MockCamera {
    config: Option<CaptureConfig>,
    sequence: u64,
}

impl MockCamera {
    /// Creates a closed camera.
    pub fn new() -> Self {
        Self::default()
    }

    /// Top edge of the subject square for a given sequence number.
    fn subject_top(height: u32, sequence: u64) -> u32 {
        let travel = height.saturating_sub(MOCK_SUBJECT_SIZE).max(1) as u64;
        let step = (sequence * 7) % (2 * travel);
        // Triangle wave: down then back up
        if step < travel {
            step as u32
        } else {
            (2 * travel - step) as u32
        }
    }
}

impl Camera for MockCamera {
    fn open(&mut self, config: &CaptureConfig) -> Result<(), CameraError> {
        config
            .validate()
            .map_err(|e| CameraError::ConfigFailed(e.to_string()))?;
        self.config = Some(config.clone());
        self.sequence = 0;
        tracing::info!("MockCamera opened with config: {:?}", config);
        Ok(())
    }

    fn capture(&mut self) -> Result<Frame, CameraError> {
        let config = self.config.as_ref().ok_or(CameraError::NotInitialized)?;

        let (width, height) = (config.width, config.height);
        let top = Self::subject_top(height, self.sequence);
        let left = width.saturating_sub(MOCK_SUBJECT_SIZE) / 2;

        let mut pixels = Vec::with_capacity((width * height) as usize * RGB_CHANNELS);
        for y in 0..height {
            for x in 0..width {
                let inside = x >= left
                    && x < left + MOCK_SUBJECT_SIZE
                    && y >= top
                    && y < top + MOCK_SUBJECT_SIZE;
                if inside {
                    pixels.extend_from_slice(&[240, 230, 220]);
                } else {
                    // Low-amplitude texture, stays well below the subject
                    let v = (((x as u64) ^ (y as u64) ^ self.sequence) % 40) as u8;
                    pixels.extend_from_slice(&[v, v, v]);
                }
            }
        }

        self.sequence += 1;
        Ok(Frame::new(pixels, width, height, self.sequence))
    }

    fn is_open(&self) -> bool {
        self.config.is_some()
    }

    fn close(&mut self) {
        self.config = None;
        tracing::info!("MockCamera closed");
    }
}

/// Camera backed by a real capture device through `nokhwa`.
#[cfg(feature = "camera")]
pub struct NokhwaCamera {
    device: Option<nokhwa::Camera>,
    sequence: u64,
}

#[cfg(feature = "camera")]
impl NokhwaCamera {
    /// Creates a closed camera.
    pub fn new() -> Self {
        Self {
            device: None,
            sequence: 0,
        }
    }
}

#[cfg(feature = "camera")]
impl Default for NokhwaCamera {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "camera")]
impl Camera for NokhwaCamera {
    fn open(&mut self, config: &CaptureConfig) -> Result<(), CameraError> {
        use nokhwa::pixel_format::RgbFormat;
        use nokhwa::utils::{
            CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
            Resolution,
        };

        config
            .validate()
            .map_err(|e| CameraError::ConfigFailed(e.to_string()))?;

        let format = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(
            CameraFormat::new(
                Resolution::new(config.width, config.height),
                FrameFormat::MJPEG,
                config.fps,
            ),
        ));
        let mut device = nokhwa::Camera::new(CameraIndex::Index(config.device_id), format)
            .map_err(|e| CameraError::DeviceNotFound(e.to_string()))?;
        device
            .open_stream()
            .map_err(|e| CameraError::OpenFailed(e.to_string()))?;

        tracing::info!(device = config.device_id, "Camera stream opened");
        self.device = Some(device);
        self.sequence = 0;
        Ok(())
    }

    fn capture(&mut self) -> Result<Frame, CameraError> {
        use nokhwa::pixel_format::RgbFormat;

        let device = self.device.as_mut().ok_or(CameraError::NotInitialized)?;
        let buffer = device
            .frame()
            .map_err(|e| CameraError::CaptureFailed(e.to_string()))?;
        let image = buffer
            .decode_image::<RgbFormat>()
            .map_err(|e| CameraError::CaptureFailed(e.to_string()))?;

        self.sequence += 1;
        Ok(Frame::from_image(image, self.sequence))
    }

    fn is_open(&self) -> bool {
        self.device.is_some()
    }

    fn close(&mut self) {
        if let Some(mut device) = self.device.take() {
            if let Err(e) = device.stop_stream() {
                tracing::warn!("Failed to stop camera stream: {}", e);
            }
        }
        tracing::info!("Camera closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_camera_lifecycle() {
        let mut camera = MockCamera::new();
        let config = CaptureConfig::default();

        assert!(!camera.is_open());

        camera.open(&config).unwrap();
        assert!(camera.is_open());

        let frame = camera.capture().unwrap();
        assert!(frame.is_valid());
        assert_eq!(frame.sequence(), 1);

        let frame2 = camera.capture().unwrap();
        assert_eq!(frame2.sequence(), 2);

        camera.close();
        assert!(!camera.is_open());
    }

    #[test]
    fn test_capture_without_open() {
        let mut camera = MockCamera::new();
        assert!(matches!(
            camera.capture(),
            Err(CameraError::NotInitialized)
        ));
    }

    #[test]
    fn test_subject_moves_between_frames() {
        let top1 = MockCamera::subject_top(480, 1);
        let top2 = MockCamera::subject_top(480, 2);
        assert_ne!(top1, top2);
        assert!(top1 + MOCK_SUBJECT_SIZE <= 480);
    }
}
