//! Prometheus metrics for the frame pipeline.
//!
//! # Metrics Exposed
//!
//! ## Frame Flow
//! - `burst_capture_frames_received_total` - Frames delivered by the camera
//! - `burst_capture_frames_dropped_total` - Frames skipped while busy
//! - `burst_capture_frames_rejected_total` - Malformed frames or frames after shutdown
//! - `burst_capture_frames_processed_total` - Frames that completed detection
//! - `burst_capture_busy` - 1 while a frame is in detection
//!
//! ## Detection
//! - `burst_capture_inference_failures_total` - Crop or inference failures
//! - `burst_capture_detections_forwarded_total` - Detections given to the tracker
//! - `burst_capture_inference_milliseconds` - Latest detection latency
//!
//! ## Bursts
//! - `burst_capture_burst_buffered` - Samples in the burst buffer
//! - `burst_capture_bursts_drained_total` - Completed bursts
//! - `burst_capture_exports_succeeded_total` - Winners written
//! - `burst_capture_exports_failed_total` - Winners that could not be written
//!
//! With the `metrics` feature, [`MetricsServer`] serves them over HTTP.

mod collector;
#[cfg(feature = "metrics")]
mod server;

pub use collector::{MetricsError, MetricsRegistry, MetricsSnapshot};
#[cfg(feature = "metrics")]
pub use server::{MetricsServer, MetricsServerConfig, MetricsState, ServerError};
