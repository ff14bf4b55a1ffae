//! Fall notification sink.

use tracing::warn;

/// Viewer the notification is directed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewerContext {
    pub viewer_id: String,
}

/// Fire-and-forget delivery of fall alerts. Implementations must not block.
pub trait FallNotifier: Send + Sync {
    fn notify_fall(&self, viewer: &ViewerContext, who: &str, message: &str);
}

/// Discards every notification.
pub struct NullNotifier;

impl FallNotifier for NullNotifier {
    fn notify_fall(&self, _viewer: &ViewerContext, _who: &str, _message: &str) {}
}

/// Writes notifications to the log.
pub struct LogNotifier;

impl FallNotifier for LogNotifier {
    fn notify_fall(&self, viewer: &ViewerContext, who: &str, message: &str) {
        warn!(viewer_id = %viewer.viewer_id, who, "{}", message);
    }
}
