//! Notification stream client for the console backend
//!
//! Holds one authenticated WebSocket to the push endpoint while a credential
//! is present, turns inbound frames into `Toast`s for a `NotificationSink`,
//! and reconnects after a fixed delay when the channel drops unexpectedly.

pub mod client;
pub mod error;
pub mod frame;
pub mod metrics;
pub mod sink;

pub use client::{ConnectionState, NotificationClient, StreamConfig, stream_url_from_api_base};
pub use error::{Error, Result};
pub use frame::{Frame, NotificationItem, Severity, Toast};
pub use sink::{ChannelSink, NotificationSink, TracingSink};
