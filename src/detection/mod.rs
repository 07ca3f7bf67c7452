//! Object detection: model boundary, result filtering and coordinate
//! mapping between camera frames and the model input.

mod annotate;
mod filter;
mod inference;
mod transform;
mod types;

pub use annotate::{annotate_crop, draw_boxes, BOX_COLOR, BOX_STROKE};
pub use filter::{burst_metric, DetectionFilter, MIN_CONFIDENCE, TARGET_CLASS};
pub use inference::{
    InferenceError, InferencePort, LabelMap, ModelSpec, SyntheticDetector, SyntheticParams,
    DEFAULT_NUM_THREADS, MODEL_INPUT_SIZE,
};
pub use transform::{Affine, FrameTransform, TransformError};
pub use types::{BoundingBox, Detection};
