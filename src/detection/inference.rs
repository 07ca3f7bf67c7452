//! Inference port: the boundary to the object-detection model.
//!
//! The model itself is an opaque artifact. The pipeline only needs
//! something that turns a square RGB image into a list of
//! [`Detection`]s, and that can be built from a named model file and
//! a named label list.

use super::{BoundingBox, Detection};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Square input edge the detector expects, in pixels.
pub const MODEL_INPUT_SIZE: u32 = 416;

/// Backend threads used unless configured otherwise.
pub const DEFAULT_NUM_THREADS: usize = 1;

/// Errors raised by an inference port.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// The model artifact is missing or malformed.
    #[error("failed to load model {path}: {reason}")]
    ModelLoad {
        /// Model artifact path.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },
    /// The label list is missing or empty.
    #[error("failed to load labels {path}: {reason}")]
    Labels {
        /// Label list path.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },
    /// The image does not fit the model input.
    #[error("invalid input image: {0}")]
    InvalidInput(String),
    /// The backend failed while running or reconfiguring.
    #[error("inference backend failure: {0}")]
    Backend(String),
}

/// Object detector consumed by the frame pipeline.
///
/// Calls are synchronous and may take tens to hundreds of
/// milliseconds. The pipeline guarantees at most one call is in
/// flight at a time.
pub trait InferencePort: Send {
    /// Runs the model on an image of `input_size() x input_size()`.
    fn recognize(&mut self, image: &RgbImage) -> Result<Vec<Detection>, InferenceError>;

    /// Edge length of the square image `recognize` expects.
    fn input_size(&self) -> u32;

    /// Limits the worker threads the backend may use.
    ///
    /// Backends without a thread pool ignore it.
    fn set_num_threads(&mut self, _threads: usize) -> Result<(), InferenceError> {
        Ok(())
    }

    /// Switches a hardware accelerator on or off.
    ///
    /// Backends without one ignore it.
    fn set_use_accelerator(&mut self, _enabled: bool) -> Result<(), InferenceError> {
        Ok(())
    }
}

/// Names the model artifact and label list a port is built from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSpec {
    /// Model artifact.
    pub model_file: PathBuf,
    /// Label list, one class name per line.
    pub labels_file: PathBuf,
    /// Square input edge in pixels.
    pub input_size: u32,
    /// Backend worker threads, applied once the port is built.
    pub num_threads: usize,
    /// Hardware accelerator, applied once the port is built.
    pub use_accelerator: bool,
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self {
            model_file: PathBuf::from("assets/synthetic-detector.toml"),
            labels_file: PathBuf::from("assets/coco.txt"),
            input_size: MODEL_INPUT_SIZE,
            num_threads: DEFAULT_NUM_THREADS,
            use_accelerator: false,
        }
    }
}

/// Class names indexed by class id.
#[derive(Debug, Clone, Default)]
pub struct LabelMap {
    labels: Vec<String>,
}

impl LabelMap {
    /// Loads a label list, one name per line. Blank lines are skipped.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, InferenceError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| InferenceError::Labels {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let map = Self::from_lines(&content);
        if map.is_empty() {
            return Err(InferenceError::Labels {
                path: path.to_path_buf(),
                reason: "label list is empty".to_string(),
            });
        }
        Ok(map)
    }

    /// Parses labels from text.
    pub fn from_lines(content: &str) -> Self {
        let labels = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect();
        Self { labels }
    }

    /// Name for a class id.
    pub fn get(&self, class_id: u32) -> Option<&str> {
        self.labels.get(class_id as usize).map(String::as_str)
    }

    /// Number of classes.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// True if no labels were loaded.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Parameters stored in a synthetic model artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticParams {
    /// Luma at or above which a pixel counts as foreground.
    pub luma_threshold: u8,
    /// Class reported for the foreground region.
    pub class_id: u32,
    /// Fewer foreground pixels than this means nothing was seen.
    pub min_pixels: u32,
}

impl Default for SyntheticParams {
    fn default() -> Self {
        Self {
            luma_threshold: 128,
            class_id: 0,
            min_pixels: 16,
        }
    }
}

/// Stand-in detector that reports the bright foreground region of an
/// image as a single detection.
///
/// Confidence is the fraction of the reported box that is actually
/// foreground, so a solid blob scores close to 1.0 and scattered
/// highlights score low.
pub struct SyntheticDetector {
    params: SyntheticParams,
    labels: LabelMap,
    input_size: u32,
}

impl SyntheticDetector {
    /// Builds the detector from a model artifact (TOML parameters) and
    /// a label list.
    pub fn from_spec(spec: &ModelSpec) -> Result<Self, InferenceError> {
        let model_load = |reason: String| InferenceError::ModelLoad {
            path: spec.model_file.clone(),
            reason,
        };
        let content =
            std::fs::read_to_string(&spec.model_file).map_err(|e| model_load(e.to_string()))?;
        let params: SyntheticParams =
            toml::from_str(&content).map_err(|e| model_load(e.to_string()))?;
        if spec.input_size == 0 {
            return Err(model_load("input size must be non-zero".to_string()));
        }
        let labels = LabelMap::from_file(&spec.labels_file)?;

        tracing::info!(
            model = %spec.model_file.display(),
            labels = labels.len(),
            input_size = spec.input_size,
            "Synthetic detector loaded"
        );

        Ok(Self::new(params, labels, spec.input_size))
    }

    /// Builds the detector from already-loaded parts.
    pub fn new(params: SyntheticParams, labels: LabelMap, input_size: u32) -> Self {
        Self {
            params,
            labels,
            input_size,
        }
    }
}

impl InferencePort for SyntheticDetector {
    fn recognize(&mut self, image: &RgbImage) -> Result<Vec<Detection>, InferenceError> {
        if image.dimensions() != (self.input_size, self.input_size) {
            return Err(InferenceError::InvalidInput(format!(
                "expected {0}x{0}, got {1}x{2}",
                self.input_size,
                image.width(),
                image.height()
            )));
        }

        let mut count = 0u32;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (u32::MAX, u32::MAX, 0u32, 0u32);
        for (x, y, pixel) in image.enumerate_pixels() {
            let [r, g, b] = pixel.0;
            let luma = (r as u32 * 299 + g as u32 * 587 + b as u32 * 114) / 1000;
            if luma >= self.params.luma_threshold as u32 {
                count += 1;
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);
            }
        }

        if count < self.params.min_pixels.max(1) {
            return Ok(Vec::new());
        }

        let bbox = BoundingBox::new(
            min_x as f32,
            min_y as f32,
            (max_x + 1) as f32,
            (max_y + 1) as f32,
        );
        let area = bbox.width() * bbox.height();
        let confidence = (count as f32 / area).clamp(0.0, 1.0);

        let mut detection = Detection::new(self.params.class_id, confidence, bbox);
        if let Some(label) = self.labels.get(self.params.class_id) {
            detection = detection.with_label(label);
        }
        Ok(vec![detection])
    }

    fn input_size(&self) -> u32 {
        self.input_size
    }
}
