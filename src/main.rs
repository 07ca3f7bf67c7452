//! Burst Capture CLI
//!
//! Drives the frame pipeline from a camera (synthetic unless built with
//! the `camera` feature), holding the shutter for a range of frames so
//! that complete bursts are selected and exported.

use burst_capture::{
    burst::{Exporter, LogNotifier},
    capture::{Camera, CameraError, CaptureConfig, FileConfig},
    detection::SyntheticDetector,
    metrics::{MetricsRegistry, MetricsSnapshot},
    pipeline::{
        run_session, FramePipeline, PipelineOptions, SessionEnd, SessionPlan,
        MAX_CONSECUTIVE_CAPTURE_FAILURES,
    },
    tracking::LatestTracker,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(name = "burst-capture", version, about = "Best-frame burst capture over live detection")]
struct Args {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of capture attempts (overrides the config file).
    #[arg(short = 'n', long)]
    frames: Option<u32>,

    /// Run until interrupted.
    #[arg(long)]
    continuous: bool,

    /// Directory for exported images (overrides the config file).
    #[arg(long)]
    export_dir: Option<PathBuf>,

    /// First frame (1-based) with the shutter held.
    #[arg(long, default_value_t = 10)]
    capture_from: u64,

    /// Last frame with the shutter held.
    #[arg(long, default_value_t = 60)]
    capture_until: u64,

    /// Metrics server port, 0 to disable (needs the `metrics` feature).
    #[arg(long)]
    metrics_port: Option<u16>,

    /// Save each model input as preview.jpg in the export directory.
    #[arg(long)]
    save_crops: bool,
}

fn open_camera(config: &CaptureConfig) -> Result<Box<dyn Camera>, CameraError> {
    #[cfg(feature = "camera")]
    let mut camera: Box<dyn Camera> = Box::new(burst_capture::capture::NokhwaCamera::new());
    #[cfg(not(feature = "camera"))]
    let mut camera: Box<dyn Camera> = Box::new(burst_capture::capture::MockCamera::new());

    camera.open(config)?;
    Ok(camera)
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    info!("Burst Capture v{}", burst_capture::VERSION);

    let mut config = match &args.config {
        Some(path) => match FileConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load config {}: {}", path.display(), e);
                std::process::exit(2);
            }
        },
        None => FileConfig::default(),
    };
    if let Some(frames) = args.frames {
        config.output.frame_count = frames;
    }
    if let Some(dir) = args.export_dir.clone() {
        config.export.directory = dir;
    }
    if let Some(port) = args.metrics_port {
        config.output.metrics_port = port;
    }
    config.output.continuous |= args.continuous;
    config.output.save_crops |= args.save_crops;

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        if let Err(e) = ctrlc::set_handler(move || shutdown.store(true, Ordering::SeqCst)) {
            warn!("Failed to install Ctrl+C handler: {}", e);
        }
    }

    let mut camera = match open_camera(&config.capture) {
        Ok(camera) => camera,
        Err(e) => {
            eprintln!("Failed to open camera: {}", e);
            std::process::exit(1);
        }
    };

    let notifier = Arc::new(LogNotifier);
    let tracker = LatestTracker::new();
    let options = PipelineOptions {
        annotate_crops: config.output.annotate_crops,
        crop_dump_dir: config
            .output
            .save_crops
            .then(|| config.export.directory.clone()),
    };
    let pipeline = match FramePipeline::load(
        &config.capture,
        &config.model,
        options,
        SyntheticDetector::from_spec,
        Box::new(tracker.clone()),
        Exporter::with_manifest(&config.export.directory, notifier.clone()),
        notifier.as_ref(),
    ) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            eprintln!("Detector could not be initialized: {}", e);
            camera.close();
            std::process::exit(1);
        }
    };

    let registry = match MetricsRegistry::new() {
        Ok(registry) => registry,
        Err(e) => {
            eprintln!("Failed to create metrics registry: {}", e);
            std::process::exit(1);
        }
    };

    #[cfg(feature = "metrics")]
    let metrics_state = start_metrics_server(config.output.metrics_port);

    let plan = SessionPlan {
        frame_budget: (!config.output.continuous).then_some(config.output.frame_count as u64),
        shutter: args.capture_from..=args.capture_until,
        frame_interval: Duration::from_secs_f64(1.0 / config.capture.fps as f64),
        max_consecutive_failures: MAX_CONSECUTIVE_CAPTURE_FAILURES,
    };

    info!(
        frames = config.output.frame_count,
        continuous = config.output.continuous,
        capture_from = args.capture_from,
        capture_until = args.capture_until,
        "Processing frames..."
    );

    let session = run_session(camera.as_mut(), &pipeline, &plan, &shutdown, |pipeline| {
        let snapshot = MetricsSnapshot::from_pipeline(pipeline);
        registry.update(&snapshot);
        #[cfg(feature = "metrics")]
        if let Some(state) = &metrics_state {
            state.blocking_write().update(snapshot);
        }
    });

    camera.close();
    let final_snapshot = MetricsSnapshot::from_pipeline(&pipeline);
    pipeline.shutdown();
    registry.update(&final_snapshot);

    let stats = &final_snapshot.stats;
    info!(
        "Processed {} of {} frames ({} dropped while busy), {} bursts, {} saved, {} failed",
        stats.frames_processed,
        stats.frames_received,
        stats.frames_dropped,
        stats.bursts_drained,
        stats.exports_succeeded,
        stats.exports_failed
    );
    info!("Tracker saw {} frames", tracker.snapshot().frames_tracked);
    info!(
        attempts = session.attempts,
        capture_failures = session.capture_failures,
        end = ?session.end,
        "Session finished"
    );

    match registry.encode() {
        Ok(text) => tracing::debug!("Final metrics:\n{}", text),
        Err(e) => warn!("Failed to encode metrics: {}", e),
    }

    if session.end == SessionEnd::CameraFailed {
        error!("Camera stopped delivering frames");
        std::process::exit(1);
    }
}

#[cfg(feature = "metrics")]
fn start_metrics_server(
    port: u16,
) -> Option<Arc<tokio::sync::RwLock<burst_capture::metrics::MetricsState>>> {
    use burst_capture::metrics::{MetricsServer, MetricsServerConfig};

    if port == 0 {
        return None;
    }
    let registry = match MetricsRegistry::new() {
        Ok(registry) => registry,
        Err(e) => {
            warn!("Metrics server disabled: {}", e);
            return None;
        }
    };
    let server = MetricsServer::new(MetricsServerConfig::with_port(port), registry);
    let state = server.state();

    std::thread::spawn(move || {
        let runtime = match tokio::runtime::Runtime::new() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!("Metrics runtime failed to start: {}", e);
                return;
            }
        };
        if let Err(e) = runtime.block_on(server.run()) {
            warn!("Metrics server stopped: {}", e);
        }
    });

    Some(state)
}
