//! Background threads: one runs detection, one writes exports.

use super::{DetectorSetting, FrameOutcome, PipelineOptions, PipelineStats, CROP_DUMP_FILE};
use crate::burst::{encode_jpeg, BestFrame, BurstBuffer, Exporter, FrameSample, JPEG_QUALITY};
use crate::detection::{
    annotate_crop, burst_metric, Detection, DetectionFilter, FrameTransform, InferencePort,
};
use crate::tracking::Tracker;
use crossbeam_channel::{Receiver, Sender};
use image::RgbImage;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Holds the pipeline's busy flag; clears it when dropped.
///
/// Dropping happens on every exit path of a job, including unwinding.
pub(crate) struct BusyGuard {
    flag: Arc<AtomicBool>,
}

impl BusyGuard {
    /// Sets the flag if it was clear. `None` means a job is in flight.
    pub(crate) fn try_acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| Self {
                flag: Arc::clone(flag),
            })
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// One accepted frame on its way to the detection worker.
pub(crate) struct FrameJob {
    pub image: RgbImage,
    pub timestamp: u64,
    pub sequence: u64,
    pub capture_requested: bool,
    pub guard: BusyGuard,
    pub reply: Sender<FrameOutcome>,
}

/// Work for the detection thread, handled in arrival order.
pub(crate) enum WorkerMessage {
    Frame(FrameJob),
    Configure(DetectorSetting),
}

pub(crate) struct DetectionWorker {
    pub port: Box<dyn InferencePort>,
    pub tracker: Box<dyn Tracker>,
    pub transform: FrameTransform,
    pub filter: DetectionFilter,
    pub buffer: Arc<BurstBuffer>,
    pub stats: Arc<PipelineStats>,
    pub exports: Sender<BestFrame>,
    pub options: PipelineOptions,
}

impl DetectionWorker {
    pub(crate) fn spawn(
        self,
        messages: Receiver<WorkerMessage>,
    ) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("detection-worker".to_string())
            .spawn(move || self.run(messages))
    }

    fn run(mut self, messages: Receiver<WorkerMessage>) {
        for message in messages.iter() {
            match message {
                WorkerMessage::Frame(job) => {
                    let sequence = job.sequence;
                    // The job's guard is released during unwinding, so busy
                    // cannot stick even if a collaborator panics
                    if panic::catch_unwind(AssertUnwindSafe(|| self.process(job))).is_err() {
                        tracing::error!(sequence, "Frame processing panicked");
                        self.stats.inference_failed();
                    }
                }
                WorkerMessage::Configure(setting) => self.configure(setting),
            }
        }
        tracing::debug!("Detection worker stopped");
    }

    fn configure(&mut self, setting: DetectorSetting) {
        let port = &mut self.port;
        let result =
            panic::catch_unwind(AssertUnwindSafe(|| apply_setting(port.as_mut(), setting)));
        match result {
            Ok(Ok(())) => tracing::info!(?setting, "Detector reconfigured"),
            Ok(Err(e)) => tracing::warn!(?setting, error = %e, "Detector rejected setting"),
            Err(_) => tracing::error!(?setting, "Detector panicked while reconfiguring"),
        }
    }

    fn process(&mut self, job: FrameJob) {
        let FrameJob {
            image,
            timestamp,
            sequence,
            capture_requested,
            guard,
            reply,
        } = job;

        tracing::trace!(sequence, timestamp, "Running detection");

        let crop = self.transform.crop(&image).map_err(|e| e.to_string());
        if let (Ok(crop), Some(dir)) = (&crop, &self.options.crop_dump_dir) {
            dump_crop(dir, crop);
        }

        let started = Instant::now();
        let detected = crop
            .as_ref()
            .map_err(Clone::clone)
            .and_then(|crop| self.recognize(crop));
        let (raw, inference_failed) = match detected {
            Ok(detections) => (detections, false),
            Err(reason) => {
                tracing::warn!(sequence, %reason, "Detection failed, treating frame as empty");
                self.stats.inference_failed();
                (Vec::new(), true)
            }
        };
        self.stats.inference_took(started.elapsed());

        let raw_detections = raw.len();
        let mut detections = self.filter.apply(raw);

        // Drawn in model-input space, before the boxes are remapped
        let annotated = match (&crop, self.options.annotate_crops) {
            (Ok(crop), true) => Some(annotate_crop(crop, &detections)),
            _ => None,
        };

        for detection in &mut detections {
            detection.bbox = self.transform.box_to_frame(&detection.bbox);
        }

        self.tracker.track_results(&detections, timestamp);

        let metric = burst_metric(&detections);
        let best = self
            .buffer
            .offer(FrameSample::new(metric, image, sequence), capture_requested);
        let buffered = self.buffer.len();

        // Busy covers detection only, not the export below
        drop(guard);
        self.stats.frame_processed(detections.len());

        let burst_drained = best.is_some();
        if let Some(best) = best {
            self.stats.burst_drained();
            if self.exports.send(best).is_err() {
                tracing::warn!(sequence, "Export worker gone, burst winner dropped");
                self.stats.export_finished(false);
            }
        }

        tracing::debug!(
            sequence,
            raw = raw_detections,
            kept = detections.len(),
            metric,
            buffered,
            "Frame processed"
        );

        // The caller may have dropped its ticket
        let _ = reply.send(FrameOutcome {
            sequence,
            timestamp,
            raw_detections,
            detections,
            metric,
            inference_failed,
            buffered,
            burst_drained,
            annotated,
        });
    }

    /// Runs the port on a model input.
    ///
    /// Any failure, including a panic inside the port, is reported as
    /// an error string.
    fn recognize(&mut self, crop: &RgbImage) -> Result<Vec<Detection>, String> {
        let port = &mut self.port;
        match panic::catch_unwind(AssertUnwindSafe(|| port.recognize(crop))) {
            Ok(Ok(detections)) => Ok(detections),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err("inference port panicked".to_string()),
        }
    }
}

pub(crate) fn apply_setting(
    port: &mut dyn InferencePort,
    setting: DetectorSetting,
) -> Result<(), crate::detection::InferenceError> {
    match setting {
        DetectorSetting::NumThreads(threads) => port.set_num_threads(threads),
        DetectorSetting::UseAccelerator(enabled) => port.set_use_accelerator(enabled),
    }
}

/// Overwrites `<dir>/preview.jpg` with the model input.
fn dump_crop(dir: &Path, crop: &RgbImage) {
    let path = dir.join(CROP_DUMP_FILE);
    let result = std::fs::create_dir_all(dir)
        .map_err(|e| e.to_string())
        .and_then(|()| encode_jpeg(crop, JPEG_QUALITY).map_err(|e| e.to_string()))
        .and_then(|jpeg| std::fs::write(&path, jpeg).map_err(|e| e.to_string()));
    if let Err(reason) = result {
        tracing::warn!(path = %path.display(), %reason, "Failed to save model input");
    }
}

pub(crate) fn spawn_export_worker(
    exporter: Exporter,
    exports: Receiver<BestFrame>,
    stats: Arc<PipelineStats>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("export-worker".to_string())
        .spawn(move || {
            for best in exports.iter() {
                let result = exporter.export_and_report(&best);
                stats.export_finished(result.is_ok());
            }
            tracing::debug!("Export worker stopped");
        })
}
