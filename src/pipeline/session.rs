//! Camera-driven capture session.

use super::FramePipeline;
use crate::capture::Camera;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Failed captures in a row after which a session gives up.
pub const MAX_CONSECUTIVE_CAPTURE_FAILURES: u32 = 30;

/// How a session is paced and bounded.
#[derive(Debug, Clone)]
pub struct SessionPlan {
    /// Capture attempts to make, `None` to run until stopped.
    pub frame_budget: Option<u64>,
    /// Attempts (1-based) during which the shutter is held.
    pub shutter: RangeInclusive<u64>,
    /// Minimum time from one capture attempt to the next.
    pub frame_interval: Duration,
    /// Give up after this many failed captures in a row.
    pub max_consecutive_failures: u32,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Every budgeted attempt was made.
    BudgetSpent,
    /// The stop flag was raised.
    Interrupted,
    /// The camera failed too many times in a row.
    CameraFailed,
}

/// Counters of a finished session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    /// Capture attempts, successful or not.
    pub attempts: u64,
    /// Frames handed to the pipeline.
    pub captured: u64,
    /// Attempts where the camera returned an error.
    pub capture_failures: u64,
    /// Why the loop stopped.
    pub end: SessionEnd,
}

/// Feeds camera frames to `pipeline` until the budget is spent, `stop`
/// is raised or the camera keeps failing.
///
/// Every attempt counts toward the budget and is paced to
/// `frame_interval`, whether the capture worked or not. `after_frame`
/// runs after each frame is offered.
pub fn run_session(
    camera: &mut dyn Camera,
    pipeline: &FramePipeline,
    plan: &SessionPlan,
    stop: &AtomicBool,
    mut after_frame: impl FnMut(&FramePipeline),
) -> SessionSummary {
    let mut summary = SessionSummary {
        attempts: 0,
        captured: 0,
        capture_failures: 0,
        end: SessionEnd::BudgetSpent,
    };
    let mut consecutive_failures = 0u32;

    loop {
        if stop.load(Ordering::SeqCst) {
            summary.end = SessionEnd::Interrupted;
            break;
        }
        if plan
            .frame_budget
            .is_some_and(|budget| summary.attempts >= budget)
        {
            break;
        }

        let started = Instant::now();
        summary.attempts += 1;

        match camera.capture() {
            Ok(frame) => {
                consecutive_failures = 0;
                summary.captured += 1;
                let shutter_held = plan.shutter.contains(&summary.attempts);
                let _ = pipeline.on_frame(&frame, shutter_held);
                after_frame(pipeline);
            }
            Err(e) => {
                consecutive_failures += 1;
                summary.capture_failures += 1;
                tracing::warn!(
                    attempt = summary.attempts,
                    consecutive_failures,
                    "Frame capture failed: {}",
                    e
                );
                if consecutive_failures >= plan.max_consecutive_failures {
                    tracing::error!(consecutive_failures, "Camera keeps failing, stopping");
                    summary.end = SessionEnd::CameraFailed;
                    break;
                }
            }
        }

        if let Some(rest) = plan.frame_interval.checked_sub(started.elapsed()) {
            std::thread::sleep(rest);
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::burst::{CollectingNotifier, Exporter};
    use crate::capture::{CameraError, CaptureConfig, Frame, MockCamera};
    use crate::detection::{LabelMap, SyntheticDetector, SyntheticParams};
    use crate::tracking::LatestTracker;
    use std::sync::Arc;

    /// Camera that was unplugged after opening.
    struct UnpluggedCamera;

    impl Camera for UnpluggedCamera {
        fn open(&mut self, _config: &CaptureConfig) -> Result<(), CameraError> {
            Ok(())
        }

        fn capture(&mut self) -> Result<Frame, CameraError> {
            Err(CameraError::CaptureFailed("device disconnected".to_string()))
        }

        fn is_open(&self) -> bool {
            true
        }

        fn close(&mut self) {}
    }

    fn pipeline(dir: &std::path::Path, config: &CaptureConfig) -> FramePipeline {
        let port = SyntheticDetector::new(
            SyntheticParams::default(),
            LabelMap::from_lines("person"),
            32,
        );
        FramePipeline::new(
            config,
            Box::new(port),
            Box::new(LatestTracker::new()),
            Exporter::with_manifest(dir, Arc::new(CollectingNotifier::new())),
        )
        .unwrap()
    }

    fn plan(frame_budget: Option<u64>, max_consecutive_failures: u32) -> SessionPlan {
        SessionPlan {
            frame_budget,
            shutter: 1..=u64::MAX,
            frame_interval: Duration::from_millis(2),
            max_consecutive_failures,
        }
    }

    #[test]
    fn test_unplugged_camera_ends_continuous_session() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path(), &CaptureConfig::with_dimensions(64, 64));
        let started = Instant::now();

        let summary = run_session(
            &mut UnpluggedCamera,
            &pipeline,
            &plan(None, 5),
            &AtomicBool::new(false),
            |_| {},
        );

        assert_eq!(summary.end, SessionEnd::CameraFailed);
        assert_eq!(summary.attempts, 5);
        assert_eq!(summary.capture_failures, 5);
        assert_eq!(summary.captured, 0);
        // Failed attempts are paced too
        assert!(started.elapsed() >= Duration::from_millis(8));
        pipeline.shutdown();
    }

    #[test]
    fn test_failed_captures_count_toward_budget() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path(), &CaptureConfig::with_dimensions(64, 64));

        let summary = run_session(
            &mut UnpluggedCamera,
            &pipeline,
            &plan(Some(3), 100),
            &AtomicBool::new(false),
            |_| {},
        );

        assert_eq!(summary.end, SessionEnd::BudgetSpent);
        assert_eq!(summary.attempts, 3);
        assert_eq!(summary.capture_failures, 3);
        pipeline.shutdown();
    }

    #[test]
    fn test_stop_flag_interrupts() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path(), &CaptureConfig::with_dimensions(64, 64));

        let summary = run_session(
            &mut UnpluggedCamera,
            &pipeline,
            &plan(None, 100),
            &AtomicBool::new(true),
            |_| {},
        );

        assert_eq!(summary.end, SessionEnd::Interrupted);
        assert_eq!(summary.attempts, 0);
        pipeline.shutdown();
    }

    #[test]
    fn test_mock_camera_frames_reach_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let config = CaptureConfig::with_dimensions(96, 96);
        let pipeline = pipeline(dir.path(), &config);
        let mut camera = MockCamera::new();
        camera.open(&config).unwrap();

        let mut offered = 0;
        let summary = run_session(
            &mut camera,
            &pipeline,
            &plan(Some(6), 5),
            &AtomicBool::new(false),
            |_| offered += 1,
        );

        assert_eq!(summary.end, SessionEnd::BudgetSpent);
        assert_eq!(summary.captured, 6);
        assert_eq!(offered, 6);
        assert_eq!(pipeline.stats().frames_received, 6);
        pipeline.shutdown();
    }
}
