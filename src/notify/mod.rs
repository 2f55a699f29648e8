use tracing::info;

/// Fire-and-forget desktop notification delivery. Implementations must
/// swallow their own failures; callers never check.
#[cfg_attr(test, mockall::automock)]
pub trait NotificationSink: Send + Sync + 'static {
    fn notify(&self, title: &str, message: &str);
}

/// Default sink: notifications end up in the daemon log. Desktop delivery is
/// a platform integration that plugs in here.
pub struct LogNotifier {
    enabled: bool,
}

impl LogNotifier {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

impl NotificationSink for LogNotifier {
    fn notify(&self, title: &str, message: &str) {
        if !self.enabled {
            return;
        }
        info!("Notification: {title}: {message}");
    }
}
