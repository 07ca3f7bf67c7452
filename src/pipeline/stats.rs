//! Lock-free counters shared by the pipeline threads.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Running pipeline counters.
#[derive(Debug, Default)]
pub struct PipelineStats {
    frames_received: AtomicU64,
    frames_dropped: AtomicU64,
    frames_rejected: AtomicU64,
    frames_processed: AtomicU64,
    inference_failures: AtomicU64,
    detections_forwarded: AtomicU64,
    bursts_drained: AtomicU64,
    exports_succeeded: AtomicU64,
    exports_failed: AtomicU64,
    last_inference_us: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsSnapshot {
    /// Frames handed to `on_frame`.
    pub frames_received: u64,
    /// Frames skipped because a detection was in flight.
    pub frames_dropped: u64,
    /// Frames refused because they were malformed or the worker was gone.
    pub frames_rejected: u64,
    /// Frames that completed the detection step.
    pub frames_processed: u64,
    /// Frames whose crop or inference failed.
    pub inference_failures: u64,
    /// Detections passed to the tracker.
    pub detections_forwarded: u64,
    /// Bursts that reached full size and were drained.
    pub bursts_drained: u64,
    /// Burst winners written to disk.
    pub exports_succeeded: u64,
    /// Burst winners that could not be written.
    pub exports_failed: u64,
    /// Duration of the most recent crop + inference step.
    pub last_inference_ms: f64,
}

impl PipelineStats {
    pub(crate) fn frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn frame_rejected(&self) {
        self.frames_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn frame_processed(&self, forwarded: usize) {
        self.frames_processed.fetch_add(1, Ordering::Relaxed);
        self.detections_forwarded
            .fetch_add(forwarded as u64, Ordering::Relaxed);
    }

    pub(crate) fn inference_failed(&self) {
        self.inference_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inference_took(&self, elapsed: Duration) {
        self.last_inference_us
            .store(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub(crate) fn burst_drained(&self) {
        self.bursts_drained.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn export_finished(&self, success: bool) {
        let counter = if success {
            &self.exports_succeeded
        } else {
            &self.exports_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Reads every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_rejected: self.frames_rejected.load(Ordering::Relaxed),
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            inference_failures: self.inference_failures.load(Ordering::Relaxed),
            detections_forwarded: self.detections_forwarded.load(Ordering::Relaxed),
            bursts_drained: self.bursts_drained.load(Ordering::Relaxed),
            exports_succeeded: self.exports_succeeded.load(Ordering::Relaxed),
            exports_failed: self.exports_failed.load(Ordering::Relaxed),
            last_inference_ms: self.last_inference_us.load(Ordering::Relaxed) as f64 / 1000.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let stats = PipelineStats::default();
        stats.frame_received();
        stats.frame_received();
        stats.frame_dropped();
        stats.frame_processed(3);
        stats.export_finished(false);
        stats.inference_took(Duration::from_micros(2500));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.frames_received, 2);
        assert_eq!(snapshot.frames_dropped, 1);
        assert_eq!(snapshot.detections_forwarded, 3);
        assert_eq!(snapshot.exports_failed, 1);
        assert_eq!(snapshot.exports_succeeded, 0);
        assert_eq!(snapshot.last_inference_ms, 2.5);
    }
}
