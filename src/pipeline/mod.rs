//! Frame pipeline: drop-if-busy detection with burst capture.
//!
//! ```text
//! camera ─on_frame─▶ busy? ──yes──▶ dropped
//!                      │no
//!                      ▼
//!              snapshot + job ─▶ detection worker
//!                                  crop → infer → filter → remap
//!                                  → tracker → burst buffer
//!                                  (busy cleared here)
//!                                        │ full burst
//!                                        ▼
//!                                  export worker → max<ms>.jpg
//! ```
//!
//! At most one frame is in detection at any time. A frame that arrives
//! while one is in flight is dropped, never queued, so the pipeline
//! always works on the freshest frame it can start.

mod session;
mod stats;
mod worker;

pub use session::{
    run_session, SessionEnd, SessionPlan, SessionSummary, MAX_CONSECUTIVE_CAPTURE_FAILURES,
};
pub use stats::{PipelineStats, StatsSnapshot};

use crate::burst::{BurstBuffer, Exporter, Notifier, BURST_SIZE, MSG_CLASSIFIER_INIT_FAILED};
use crate::capture::{CaptureConfig, ConfigError, Frame};
use crate::detection::{
    Detection, DetectionFilter, FrameTransform, InferenceError, InferencePort, ModelSpec,
    TransformError,
};
use crate::tracking::Tracker;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use image::RgbImage;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use worker::{
    apply_setting, spawn_export_worker, BusyGuard, DetectionWorker, FrameJob, WorkerMessage,
};

/// Whether the model input keeps the frame's aspect ratio.
///
/// When false the frame is stretched to the square input.
pub const MAINTAIN_ASPECT: bool = false;

/// Name of the model-input dump inside [`PipelineOptions::crop_dump_dir`].
pub const CROP_DUMP_FILE: &str = "preview.jpg";

/// Debug outputs of the detection worker. All off by default.
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    /// Attach a copy of the model input with the kept boxes outlined
    /// to every [`FrameOutcome`].
    pub annotate_crops: bool,
    /// Write every model input to [`CROP_DUMP_FILE`] in this directory,
    /// replacing the previous one.
    pub crop_dump_dir: Option<PathBuf>,
}

/// Runtime detector setting, applied on the detection thread between
/// frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorSetting {
    /// Backend worker threads.
    NumThreads(usize),
    /// Hardware accelerator on or off.
    UseAccelerator(bool),
}

/// Errors building a pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The capture configuration is invalid.
    #[error("invalid capture configuration: {0}")]
    Config(#[from] ConfigError),
    /// The inference port could not be built.
    #[error("detector unavailable: {0}")]
    Inference(#[from] InferenceError),
    /// No frame-to-model transform exists for the geometry.
    #[error("invalid frame transform: {0}")]
    Transform(#[from] TransformError),
    /// A worker thread could not be started.
    #[error("failed to start worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// What happened to a frame handed to [`FramePipeline::on_frame`].
#[derive(Debug)]
pub enum FrameDisposition {
    /// The frame was snapshotted and is being processed.
    Accepted(FrameTicket),
    /// A detection was already in flight; the frame was skipped.
    Dropped,
    /// The frame did not match the configured geometry, or the
    /// pipeline is shutting down.
    Rejected,
}

impl FrameDisposition {
    /// True if the frame went to detection.
    pub fn is_accepted(&self) -> bool {
        matches!(self, FrameDisposition::Accepted(_))
    }

    /// The ticket of an accepted frame.
    pub fn ticket(self) -> Option<FrameTicket> {
        match self {
            FrameDisposition::Accepted(ticket) => Some(ticket),
            _ => None,
        }
    }
}

/// Handle to the processing of one accepted frame.
#[derive(Debug)]
pub struct FrameTicket {
    sequence: u64,
    outcome: Receiver<FrameOutcome>,
}

impl FrameTicket {
    /// Sequence number of the frame.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Blocks until the frame has been processed.
    ///
    /// Returns `None` if processing was abandoned (worker panic or
    /// shutdown).
    pub fn wait(self) -> Option<FrameOutcome> {
        self.outcome.recv().ok()
    }

    /// Like [`FrameTicket::wait`] with an upper bound on the wait.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<FrameOutcome> {
        match self.outcome.recv_timeout(timeout) {
            Ok(outcome) => Some(outcome),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}

/// Result of processing one frame.
#[derive(Debug, Clone)]
pub struct FrameOutcome {
    /// Sequence number of the source frame.
    pub sequence: u64,
    /// Pipeline timestamp passed to the tracker.
    pub timestamp: u64,
    /// Detections reported by the model before filtering.
    pub raw_detections: usize,
    /// Filtered detections in frame coordinates, as given to the tracker.
    pub detections: Vec<Detection>,
    /// Burst metric computed for the frame.
    pub metric: f64,
    /// The crop or the inference call failed.
    pub inference_failed: bool,
    /// Samples in the burst buffer after this frame.
    pub buffered: usize,
    /// This frame completed a burst and its winner was sent for export.
    pub burst_drained: bool,
    /// Model input with the kept boxes outlined, when
    /// [`PipelineOptions::annotate_crops`] is set and the crop succeeded.
    pub annotated: Option<RgbImage>,
}

/// Drop-if-busy detection pipeline feeding a burst buffer.
pub struct FramePipeline {
    busy: Arc<AtomicBool>,
    timestamp: AtomicU64,
    frame_width: u32,
    frame_height: u32,
    buffer: Arc<BurstBuffer>,
    stats: Arc<PipelineStats>,
    jobs: Option<Sender<WorkerMessage>>,
    detection_worker: Option<JoinHandle<()>>,
    export_worker: Option<JoinHandle<()>>,
}

impl FramePipeline {
    /// Builds the inference port with `loader`, applies the runtime
    /// settings from `model` and starts the pipeline.
    ///
    /// A port that cannot be built is fatal: the user is notified and
    /// the error is returned so the caller can shut the screen down. A
    /// rejected runtime setting is only logged.
    pub fn load<P, F>(
        capture: &CaptureConfig,
        model: &ModelSpec,
        options: PipelineOptions,
        loader: F,
        tracker: Box<dyn Tracker>,
        exporter: Exporter,
        notifier: &dyn Notifier,
    ) -> Result<Self, PipelineError>
    where
        P: InferencePort + 'static,
        F: FnOnce(&ModelSpec) -> Result<P, InferenceError>,
    {
        let mut port = match loader(model) {
            Ok(port) => port,
            Err(e) => {
                tracing::error!(error = %e, "Exception initializing detector");
                notifier.notify(MSG_CLASSIFIER_INIT_FAILED);
                return Err(e.into());
            }
        };
        for setting in [
            DetectorSetting::NumThreads(model.num_threads),
            DetectorSetting::UseAccelerator(model.use_accelerator),
        ] {
            if let Err(e) = apply_setting(&mut port, setting) {
                tracing::warn!(?setting, error = %e, "Detector rejected setting");
            }
        }
        Self::with_options(capture, Box::new(port), tracker, exporter, options)
    }

    /// Starts the pipeline around an already-built inference port.
    pub fn new(
        capture: &CaptureConfig,
        port: Box<dyn InferencePort>,
        tracker: Box<dyn Tracker>,
        exporter: Exporter,
    ) -> Result<Self, PipelineError> {
        Self::with_options(capture, port, tracker, exporter, PipelineOptions::default())
    }

    /// Like [`FramePipeline::new`] with debug outputs enabled.
    pub fn with_options(
        capture: &CaptureConfig,
        port: Box<dyn InferencePort>,
        tracker: Box<dyn Tracker>,
        exporter: Exporter,
        options: PipelineOptions,
    ) -> Result<Self, PipelineError> {
        capture.validate()?;

        let transform = FrameTransform::new(
            capture.width,
            capture.height,
            port.input_size(),
            capture.sensor_rotation,
            MAINTAIN_ASPECT,
        )?;

        tracing::info!(
            width = capture.width,
            height = capture.height,
            crop = port.input_size(),
            sensor_rotation = capture.sensor_rotation,
            export_dir = %exporter.directory().display(),
            annotate_crops = options.annotate_crops,
            crop_dump = options.crop_dump_dir.is_some(),
            "Initializing frame pipeline"
        );

        let buffer = Arc::new(BurstBuffer::new(BURST_SIZE));
        let stats = Arc::new(PipelineStats::default());

        // Frames are gated by the busy flag; settings may queue freely
        let (job_tx, job_rx) = crossbeam_channel::unbounded();
        let (export_tx, export_rx) = crossbeam_channel::unbounded();

        let export_worker = spawn_export_worker(exporter, export_rx, Arc::clone(&stats))?;
        let detection_worker = DetectionWorker {
            port,
            tracker,
            transform,
            filter: DetectionFilter::default(),
            buffer: Arc::clone(&buffer),
            stats: Arc::clone(&stats),
            exports: export_tx,
            options,
        }
        .spawn(job_rx)?;

        Ok(Self {
            busy: Arc::new(AtomicBool::new(false)),
            timestamp: AtomicU64::new(0),
            frame_width: capture.width,
            frame_height: capture.height,
            buffer,
            stats,
            jobs: Some(job_tx),
            detection_worker: Some(detection_worker),
            export_worker: Some(export_worker),
        })
    }

    /// Offers a camera frame.
    ///
    /// Never blocks on detection. The frame is only read for the
    /// duration of this call; once it returns the camera may reuse the
    /// buffer. `capture_requested` is the shutter state for this frame:
    /// held frames join the burst, a released shutter discards it.
    pub fn on_frame(&self, frame: &Frame, capture_requested: bool) -> FrameDisposition {
        let timestamp = self.timestamp.fetch_add(1, Ordering::Relaxed) + 1;
        self.stats.frame_received();

        let Some(guard) = BusyGuard::try_acquire(&self.busy) else {
            tracing::trace!(sequence = frame.sequence(), "Detection in flight, frame dropped");
            self.stats.frame_dropped();
            return FrameDisposition::Dropped;
        };

        if (frame.width(), frame.height()) != (self.frame_width, self.frame_height) {
            tracing::warn!(
                sequence = frame.sequence(),
                width = frame.width(),
                height = frame.height(),
                "Frame size does not match pipeline configuration"
            );
            self.stats.frame_rejected();
            return FrameDisposition::Rejected;
        }
        let Some(image) = frame.snapshot() else {
            tracing::warn!(sequence = frame.sequence(), "Frame buffer is truncated");
            self.stats.frame_rejected();
            return FrameDisposition::Rejected;
        };

        let Some(jobs) = self.jobs.as_ref() else {
            self.stats.frame_rejected();
            return FrameDisposition::Rejected;
        };

        tracing::trace!(
            sequence = frame.sequence(),
            timestamp,
            "Preparing frame for detection"
        );

        let (reply, outcome) = crossbeam_channel::bounded(1);
        let job = FrameJob {
            image,
            timestamp,
            sequence: frame.sequence(),
            capture_requested,
            guard,
            reply,
        };
        if jobs.send(WorkerMessage::Frame(job)).is_err() {
            // The returned job, and its guard, are dropped here
            tracing::warn!(sequence = frame.sequence(), "Detection worker is gone");
            self.stats.frame_rejected();
            return FrameDisposition::Rejected;
        }

        FrameDisposition::Accepted(FrameTicket {
            sequence: frame.sequence(),
            outcome,
        })
    }

    /// Changes the backend thread count before the next frame.
    ///
    /// Returns false once the pipeline is shutting down.
    pub fn set_num_threads(&self, threads: usize) -> bool {
        self.configure(DetectorSetting::NumThreads(threads))
    }

    /// Switches the hardware accelerator before the next frame.
    ///
    /// Returns false once the pipeline is shutting down.
    pub fn set_use_accelerator(&self, enabled: bool) -> bool {
        self.configure(DetectorSetting::UseAccelerator(enabled))
    }

    fn configure(&self, setting: DetectorSetting) -> bool {
        match self.jobs.as_ref() {
            Some(jobs) => jobs.send(WorkerMessage::Configure(setting)).is_ok(),
            None => false,
        }
    }

    /// True while a frame is in detection.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Samples currently held in the burst buffer.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Current counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Stops accepting frames, finishes the in-flight frame and any
    /// pending exports, then joins the workers.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        // Closing the job channel ends the detection worker, which in
        // turn closes the export channel
        self.jobs.take();
        if let Some(handle) = self.detection_worker.take() {
            if handle.join().is_err() {
                tracing::error!("Detection worker panicked");
            }
        }
        if let Some(handle) = self.export_worker.take() {
            if handle.join().is_err() {
                tracing::error!("Export worker panicked");
            }
        }
        tracing::info!(stats = ?self.stats.snapshot(), "Frame pipeline stopped");
    }
}

impl Drop for FramePipeline {
    fn drop(&mut self) {
        if self.jobs.is_some() || self.detection_worker.is_some() {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::burst::CollectingNotifier;
    use crate::detection::{BoundingBox, SyntheticDetector, BOX_COLOR};
    use crate::tracking::LatestTracker;
    use std::sync::Mutex;

    struct FixedPort {
        size: u32,
        detections: Vec<Detection>,
    }

    impl InferencePort for FixedPort {
        fn recognize(
            &mut self,
            _image: &image::RgbImage,
        ) -> Result<Vec<Detection>, InferenceError> {
            Ok(self.detections.clone())
        }

        fn input_size(&self) -> u32 {
            self.size
        }
    }

    struct RecordingPort {
        settings: Arc<Mutex<Vec<DetectorSetting>>>,
    }

    impl InferencePort for RecordingPort {
        fn recognize(
            &mut self,
            _image: &image::RgbImage,
        ) -> Result<Vec<Detection>, InferenceError> {
            Ok(Vec::new())
        }

        fn input_size(&self) -> u32 {
            16
        }

        fn set_num_threads(&mut self, threads: usize) -> Result<(), InferenceError> {
            self.settings
                .lock()
                .unwrap()
                .push(DetectorSetting::NumThreads(threads));
            Ok(())
        }

        fn set_use_accelerator(&mut self, enabled: bool) -> Result<(), InferenceError> {
            self.settings
                .lock()
                .unwrap()
                .push(DetectorSetting::UseAccelerator(enabled));
            Err(InferenceError::Backend("no accelerator".to_string()))
        }
    }

    fn exporter(dir: &std::path::Path) -> Exporter {
        Exporter::with_manifest(dir, Arc::new(CollectingNotifier::new()))
    }

    fn frame(size: u32, sequence: u64) -> Frame {
        Frame::new(vec![0u8; (size * size * 3) as usize], size, size, sequence)
    }

    #[test]
    fn test_load_failure_notifies_user() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = CollectingNotifier::new();
        let spec = ModelSpec {
            model_file: dir.path().join("missing.toml"),
            ..Default::default()
        };

        let result = FramePipeline::load(
            &CaptureConfig::default(),
            &spec,
            PipelineOptions::default(),
            SyntheticDetector::from_spec,
            Box::new(LatestTracker::new()),
            exporter(dir.path()),
            &notifier,
        );

        assert!(matches!(result, Err(PipelineError::Inference(_))));
        assert_eq!(
            notifier.messages(),
            vec![MSG_CLASSIFIER_INIT_FAILED.to_string()]
        );
    }

    #[test]
    fn test_remaps_boxes_to_frame_space() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = LatestTracker::new();
        let port = FixedPort {
            size: 32,
            detections: vec![Detection::new(
                0,
                0.9,
                BoundingBox::new(0.0, 0.0, 16.0, 16.0),
            )],
        };
        let capture = CaptureConfig::with_dimensions(64, 64);
        let pipeline = FramePipeline::new(
            &capture,
            Box::new(port),
            Box::new(tracker.clone()),
            exporter(dir.path()),
        )
        .unwrap();

        let outcome = pipeline
            .on_frame(&frame(64, 1), false)
            .ticket()
            .unwrap()
            .wait()
            .unwrap();

        assert_eq!(
            outcome.detections[0].bbox,
            BoundingBox::new(0.0, 0.0, 32.0, 32.0)
        );
        assert_eq!(outcome.metric, 16.0);
        assert!(outcome.annotated.is_none());
        assert_eq!(tracker.snapshot().detections, outcome.detections);
        pipeline.shutdown();
    }

    #[test]
    fn test_settings_reach_port_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Arc::new(Mutex::new(Vec::new()));
        let port = RecordingPort {
            settings: Arc::clone(&settings),
        };
        let model = ModelSpec {
            num_threads: 4,
            ..Default::default()
        };

        let pipeline = FramePipeline::load(
            &CaptureConfig::with_dimensions(16, 16),
            &model,
            PipelineOptions::default(),
            |_: &ModelSpec| Ok::<_, InferenceError>(port),
            Box::new(LatestTracker::new()),
            exporter(dir.path()),
            &CollectingNotifier::new(),
        )
        .unwrap();

        assert!(pipeline.set_num_threads(2));
        assert!(pipeline.set_use_accelerator(true));
        // A rejected setting does not stop the worker
        let outcome = pipeline.on_frame(&frame(16, 1), false).ticket().unwrap().wait();
        assert!(outcome.is_some());

        assert_eq!(
            *settings.lock().unwrap(),
            vec![
                DetectorSetting::NumThreads(4),
                DetectorSetting::UseAccelerator(false),
                DetectorSetting::NumThreads(2),
                DetectorSetting::UseAccelerator(true),
            ]
        );
        pipeline.shutdown();
    }

    #[test]
    fn test_debug_outputs_annotate_and_dump_crop() {
        let dir = tempfile::tempdir().unwrap();
        let dump_dir = dir.path().join("debug");
        let port = FixedPort {
            size: 32,
            detections: vec![
                Detection::new(0, 0.9, BoundingBox::new(4.0, 4.0, 12.0, 12.0)),
                Detection::new(0, 0.1, BoundingBox::new(20.0, 20.0, 28.0, 28.0)),
            ],
        };
        let pipeline = FramePipeline::with_options(
            &CaptureConfig::with_dimensions(32, 32),
            Box::new(port),
            Box::new(LatestTracker::new()),
            exporter(dir.path()),
            PipelineOptions {
                annotate_crops: true,
                crop_dump_dir: Some(dump_dir.clone()),
            },
        )
        .unwrap();

        let outcome = pipeline
            .on_frame(&frame(32, 1), false)
            .ticket()
            .unwrap()
            .wait()
            .unwrap();

        let annotated = outcome.annotated.unwrap();
        assert_eq!(annotated.get_pixel(4, 4).0, BOX_COLOR.0);
        // Filtered-out detections are not drawn
        assert_eq!(annotated.get_pixel(20, 20).0, [0, 0, 0]);

        let dumped = image::open(dump_dir.join(CROP_DUMP_FILE)).unwrap();
        assert_eq!((dumped.width(), dumped.height()), (32, 32));
        pipeline.shutdown();
    }

    #[test]
    fn test_wrong_frame_size_rejected_without_sticking_busy() {
        let dir = tempfile::tempdir().unwrap();
        let port = FixedPort {
            size: 8,
            detections: Vec::new(),
        };
        let pipeline = FramePipeline::new(
            &CaptureConfig::with_dimensions(16, 16),
            Box::new(port),
            Box::new(LatestTracker::new()),
            exporter(dir.path()),
        )
        .unwrap();

        assert!(matches!(
            pipeline.on_frame(&frame(8, 1), true),
            FrameDisposition::Rejected
        ));
        assert!(!pipeline.is_busy());
        assert!(pipeline.on_frame(&frame(16, 2), true).is_accepted());
        pipeline.shutdown();
    }
}
