//! Where notifications go

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::frame::Toast;

/// Presentation seam for inbound notifications. Called from the stream task,
/// so implementations must not block.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, toast: Toast);
}

/// Writes each notification to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, toast: Toast) {
        info!(
            title = %toast.title,
            body = %toast.body,
            severity = toast.severity.as_str(),
            duration_ms = toast.duration.as_millis() as u64,
            "notification received"
        );
    }
}

/// Forwards notifications to a bounded channel for a UI loop to drain.
/// When the receiver lags and the channel is full the notification is dropped.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Toast>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Toast>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl NotificationSink for ChannelSink {
    fn notify(&self, toast: Toast) {
        if let Err(e) = self.tx.try_send(toast) {
            warn!(error = %e, "dropping notification");
        }
    }
}
