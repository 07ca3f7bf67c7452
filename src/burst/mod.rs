//! Burst capture: accumulate frames while the shutter is held, pick
//! the best one once the burst is complete, and export it.
//!
//! The heuristic is fixed: a burst is [`BURST_SIZE`] samples, the
//! best sample is the first with the largest metric, and the export is
//! rotated [`EXPORT_ROTATION_DEGREES`] and encoded at [`JPEG_QUALITY`].

mod buffer;
mod export;
mod notify;
mod selector;

pub use buffer::{BurstBuffer, FrameSample, BURST_SIZE};
pub use export::{
    encode_jpeg, export_file_name, rotate_clockwise, rotate_for_export, ExportError, Exporter, ManifestIndex,
    MediaIndex, EXPORT_ROTATION_DEGREES, JPEG_QUALITY, MEDIA_INDEX_FILE,
};
pub use notify::{
    CollectingNotifier, LogNotifier, Notifier, MSG_CLASSIFIER_INIT_FAILED, MSG_PHOTO_FAILED,
    MSG_PHOTO_SAVED,
};
pub use selector::{select_best, BestFrame};
