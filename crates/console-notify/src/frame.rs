//! Inbound push frames
//!
//! The push endpoint sends JSON objects of the form `{"type": ..., "data": ...}`:
//! - `init`: `data` is the array of unread notifications at connect time
//! - `notification`: `data` is one notification with optional `title`/`content`
//!
//! Anything else is ignored.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

const INIT_TOAST_DURATION: Duration = Duration::from_secs(3);
const NOTIFICATION_TOAST_DURATION: Duration = Duration::from_secs(5);
const DEFAULT_TITLE: &str = "Notification";

/// User-visible notification handed to a `NotificationSink`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub title: String,
    pub body: String,
    pub severity: Severity,
    /// How long the notification should stay on screen
    pub duration: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Success,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Success => "success",
        }
    }
}

/// Payload of a `notification` frame. Extra fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NotificationItem {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Unread backlog delivered once per connection
    Init { unread: usize },
    Notification(NotificationItem),
    /// Well-formed JSON the client has no use for
    Other,
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    data: Value,
}

impl Frame {
    /// Decode a text frame. Returns `None` when the text is not a JSON object.
    pub fn parse(text: &str) -> Option<Frame> {
        let raw: RawFrame = serde_json::from_str(text).ok()?;
        let frame = match (raw.kind.as_deref(), raw.data) {
            (Some("init"), Value::Array(items)) => Frame::Init {
                unread: items.len(),
            },
            (Some("notification"), data @ Value::Object(_)) => {
                match serde_json::from_value::<NotificationItem>(data) {
                    Ok(item) => Frame::Notification(item),
                    Err(_) => Frame::Other,
                }
            }
            _ => Frame::Other,
        };
        Some(frame)
    }

    /// Label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Init { .. } => "init",
            Frame::Notification(_) => "notification",
            Frame::Other => "other",
        }
    }

    /// The notification to show for this frame, if any. An empty backlog
    /// shows nothing.
    pub fn into_toast(self) -> Option<Toast> {
        match self {
            Frame::Init { unread: 0 } | Frame::Other => None,
            Frame::Init { unread } => Some(Toast {
                title: "Unread notifications".to_string(),
                body: format!("You have {unread} unread notifications"),
                severity: Severity::Info,
                duration: INIT_TOAST_DURATION,
            }),
            Frame::Notification(item) => Some(Toast {
                title: item.title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
                body: item.content.unwrap_or_default(),
                severity: Severity::Success,
                duration: NOTIFICATION_TOAST_DURATION,
            }),
        }
    }
}
