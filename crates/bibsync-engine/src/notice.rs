//! User notification surface.

use tracing::info;

/// Where pass results are reported to the user.
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str);
}

/// Reports through the log only.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str) {
        info!(target: "bibsync::notice", "{}", message);
    }
}

/// Drops every message (notifications disabled).
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentNotifier;

impl Notifier for SilentNotifier {
    fn notify(&self, _message: &str) {}
}
