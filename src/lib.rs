//! Burst Capture Library
//!
//! Runs an object detector over live camera frames without ever
//! queueing work, forwards the detections to a tracker, and while the
//! shutter is held collects a burst of frames, picks the best one and
//! saves it as a JPEG.
//!
//! # Architecture
//!
//! ```text
//! capture → pipeline (drop-if-busy) → detection → tracking
//!                                          ↓
//!                                  burst buffer → select → export
//! ```
//!
//! # Design Principles
//!
//! - **Never queue frames**: a frame arriving during detection is dropped
//! - **Busy never sticks**: the in-flight flag is released on every exit path
//! - **Copy on capture**: buffered samples own their pixels
//! - **Export off the hot path**: file I/O runs on its own thread, outside
//!   the burst lock and the busy window
//!
//! # Example
//!
//! ```no_run
//! use burst_capture::{
//!     burst::{Exporter, LogNotifier},
//!     capture::{Camera, CaptureConfig, MockCamera},
//!     detection::{ModelSpec, SyntheticDetector},
//!     pipeline::{FramePipeline, PipelineOptions},
//!     tracking::LatestTracker,
//! };
//! use std::sync::Arc;
//!
//! let config = CaptureConfig::default();
//! let mut camera = MockCamera::new();
//! camera.open(&config).unwrap();
//!
//! let notifier = Arc::new(LogNotifier);
//! let pipeline = FramePipeline::load(
//!     &config,
//!     &ModelSpec::default(),
//!     PipelineOptions::default(),
//!     SyntheticDetector::from_spec,
//!     Box::new(LatestTracker::new()),
//!     Exporter::with_manifest("captures", notifier.clone()),
//!     notifier.as_ref(),
//! )
//! .unwrap();
//!
//! // Hold the shutter for 40 frames
//! for i in 0..40 {
//!     let frame = camera.capture().unwrap();
//!     if let Some(ticket) = pipeline.on_frame(&frame, i >= 5).ticket() {
//!         ticket.wait();
//!     }
//! }
//!
//! pipeline.shutdown();
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod burst;
pub mod capture;
pub mod detection;
pub mod metrics;
pub mod pipeline;
pub mod tracking;

// Re-export commonly used types at crate root
pub use burst::{BurstBuffer, Exporter, FrameSample, Notifier, BURST_SIZE};
pub use capture::{Camera, CaptureConfig, FileConfig, Frame, MockCamera};
pub use detection::{Detection, InferencePort, ModelSpec, SyntheticDetector};
pub use pipeline::{FrameDisposition, FrameOutcome, FramePipeline, PipelineOptions};
pub use tracking::{LatestTracker, Tracker};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
