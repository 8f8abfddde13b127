use tracing::info;

/// Best-effort text delivery to the operator.
///
/// Implementations must not block and must not report failure to the caller:
/// delivery errors are logged where they happen.
pub trait Notifier: Send + Sync {
    fn notify(&self, text: String);
}

/// Notifier used when no chat channel is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, text: String) {
        info!(notification = %text, "Notification (no channel configured)");
    }
}
