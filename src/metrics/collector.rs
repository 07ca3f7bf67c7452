//! Metrics collection and registry.

use crate::pipeline::StatsSnapshot;
use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Registry, TextEncoder};
use thiserror::Error;

/// Errors that can occur during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// Registration or encoding failed.
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// A snapshot of pipeline state for metrics update.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    /// Pipeline counters.
    pub stats: StatsSnapshot,
    /// Samples currently held in the burst buffer.
    pub burst_buffered: usize,
    /// Whether a frame is currently in detection.
    pub busy: bool,
}

impl MetricsSnapshot {
    /// Reads the current state of a running pipeline.
    pub fn from_pipeline(pipeline: &crate::pipeline::FramePipeline) -> Self {
        Self {
            stats: pipeline.stats(),
            burst_buffered: pipeline.buffered(),
            busy: pipeline.is_busy(),
        }
    }
}

/// Prometheus metrics registry for pipeline monitoring.
pub struct MetricsRegistry {
    registry: Registry,

    // Frame flow
    frames_received: IntCounter,
    frames_dropped: IntCounter,
    frames_rejected: IntCounter,
    frames_processed: IntCounter,
    busy: IntGauge,

    // Detection
    inference_failures: IntCounter,
    detections_forwarded: IntCounter,
    inference_ms: Gauge,

    // Bursts
    burst_buffered: IntGauge,
    bursts_drained: IntCounter,
    exports_succeeded: IntCounter,
    exports_failed: IntCounter,
}

/// Advances a counter to an absolute value it has not yet reached.
fn advance(counter: &IntCounter, total: u64) {
    let current = counter.get();
    if total > current {
        counter.inc_by(total - current);
    }
}

impl MetricsRegistry {
    /// Creates a new metrics registry with all pipeline metrics registered.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let frames_received = IntCounter::new(
            "burst_capture_frames_received_total",
            "Frames delivered by the camera",
        )?;
        let frames_dropped = IntCounter::new(
            "burst_capture_frames_dropped_total",
            "Frames skipped because a detection was in flight",
        )?;
        let frames_rejected = IntCounter::new(
            "burst_capture_frames_rejected_total",
            "Frames refused as malformed or during shutdown",
        )?;
        let frames_processed = IntCounter::new(
            "burst_capture_frames_processed_total",
            "Frames that completed detection",
        )?;
        let busy = IntGauge::new(
            "burst_capture_busy",
            "Whether a frame is in detection (1=busy, 0=idle)",
        )?;

        let inference_failures = IntCounter::new(
            "burst_capture_inference_failures_total",
            "Frames whose crop or inference failed",
        )?;
        let detections_forwarded = IntCounter::new(
            "burst_capture_detections_forwarded_total",
            "Filtered detections passed to the tracker",
        )?;
        let inference_ms = Gauge::new(
            "burst_capture_inference_milliseconds",
            "Duration of the most recent crop and inference step",
        )?;

        let burst_buffered = IntGauge::new(
            "burst_capture_burst_buffered",
            "Samples currently in the burst buffer",
        )?;
        let bursts_drained = IntCounter::new(
            "burst_capture_bursts_drained_total",
            "Completed bursts drained for export",
        )?;
        let exports_succeeded = IntCounter::new(
            "burst_capture_exports_succeeded_total",
            "Burst winners written to storage",
        )?;
        let exports_failed = IntCounter::new(
            "burst_capture_exports_failed_total",
            "Burst winners that could not be written",
        )?;

        registry.register(Box::new(frames_received.clone()))?;
        registry.register(Box::new(frames_dropped.clone()))?;
        registry.register(Box::new(frames_rejected.clone()))?;
        registry.register(Box::new(frames_processed.clone()))?;
        registry.register(Box::new(busy.clone()))?;
        registry.register(Box::new(inference_failures.clone()))?;
        registry.register(Box::new(detections_forwarded.clone()))?;
        registry.register(Box::new(inference_ms.clone()))?;
        registry.register(Box::new(burst_buffered.clone()))?;
        registry.register(Box::new(bursts_drained.clone()))?;
        registry.register(Box::new(exports_succeeded.clone()))?;
        registry.register(Box::new(exports_failed.clone()))?;

        Ok(Self {
            registry,
            frames_received,
            frames_dropped,
            frames_rejected,
            frames_processed,
            busy,
            inference_failures,
            detections_forwarded,
            inference_ms,
            burst_buffered,
            bursts_drained,
            exports_succeeded,
            exports_failed,
        })
    }

    /// Updates all metrics from a snapshot of pipeline state.
    pub fn update(&self, snapshot: &MetricsSnapshot) {
        let stats = &snapshot.stats;

        advance(&self.frames_received, stats.frames_received);
        advance(&self.frames_dropped, stats.frames_dropped);
        advance(&self.frames_rejected, stats.frames_rejected);
        advance(&self.frames_processed, stats.frames_processed);
        self.busy.set(if snapshot.busy { 1 } else { 0 });

        advance(&self.inference_failures, stats.inference_failures);
        advance(&self.detections_forwarded, stats.detections_forwarded);
        self.inference_ms.set(stats.last_inference_ms);

        self.burst_buffered.set(snapshot.burst_buffered as i64);
        advance(&self.bursts_drained, stats.bursts_drained);
        advance(&self.exports_succeeded, stats.exports_succeeded);
        advance(&self.exports_failed, stats.exports_failed);
    }

    /// Returns the underlying Prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
