//! Object tracker boundary.
//!
//! The pipeline hands each frame's filtered detections to a tracker
//! and moves on; what the tracker does with them (overlay drawing,
//! identity assignment) is outside this crate.

use crate::detection::Detection;
use std::sync::{Arc, Mutex, MutexGuard};

/// Receives the filtered detections of every processed frame.
pub trait Tracker: Send {
    /// Records detections (frame coordinates) for a frame timestamp.
    ///
    /// Must not block for long; it runs inside the busy window.
    fn track_results(&mut self, detections: &[Detection], timestamp: u64);
}

/// What a [`LatestTracker`] last saw.
#[derive(Debug, Clone, Default)]
pub struct TrackedState {
    /// Timestamp of the last tracked frame.
    pub timestamp: u64,
    /// Detections of the last tracked frame.
    pub detections: Vec<Detection>,
    /// Number of frames tracked so far.
    pub frames_tracked: u64,
}

/// Tracker that keeps the most recent frame's detections for display.
#[derive(Debug, Clone, Default)]
pub struct LatestTracker {
    state: Arc<Mutex<TrackedState>>,
}

impl LatestTracker {
    /// Tracker with nothing seen yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the current tracked state.
    ///
    /// Clones of the tracker share state, so a clone kept by the UI
    /// side sees what the pipeline's copy records.
    pub fn snapshot(&self) -> TrackedState {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, TrackedState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Tracker for LatestTracker {
    fn track_results(&mut self, detections: &[Detection], timestamp: u64) {
        let mut state = self.lock();
        state.timestamp = timestamp;
        state.detections = detections.to_vec();
        state.frames_tracked += 1;

        tracing::trace!(
            timestamp,
            tracked = detections.len(),
            "Tracker updated"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::BoundingBox;

    #[test]
    fn test_clones_share_state() {
        let viewer = LatestTracker::new();
        let mut pipeline_side = viewer.clone();

        let detection = Detection::new(0, 0.9, BoundingBox::new(1.0, 2.0, 3.0, 4.0));
        pipeline_side.track_results(&[detection.clone()], 7);
        pipeline_side.track_results(&[], 8);

        let state = viewer.snapshot();
        assert_eq!(state.timestamp, 8);
        assert!(state.detections.is_empty());
        assert_eq!(state.frames_tracked, 2);
    }
}
