//! User-facing notifications.

use std::sync::{Arc, Mutex};

/// Message shown when the detector cannot be built.
pub const MSG_CLASSIFIER_INIT_FAILED: &str = "Classifier could not be initialized";
/// Message shown after a burst winner is written.
pub const MSG_PHOTO_SAVED: &str = "Photo saved";
/// Message shown when writing a burst winner fails.
pub const MSG_PHOTO_FAILED: &str = "Photo could not be saved";

/// Transient, toast-style messages for the user.
pub trait Notifier: Send + Sync {
    /// Shows a short message to the user.
    fn notify(&self, message: &str);
}

/// Emits notifications as log events.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str) {
        tracing::info!(notification = message, "User notification");
    }
}

/// Keeps every notification in memory.
#[derive(Debug, Default, Clone)]
pub struct CollectingNotifier {
    messages: Arc<Mutex<Vec<String>>>,
}

impl CollectingNotifier {
    /// Empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages received so far, oldest first.
    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }
}

impl Notifier for CollectingNotifier {
    fn notify(&self, message: &str) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(message.to_string());
        }
    }
}
