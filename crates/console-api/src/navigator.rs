//! Navigation seam for a session that can no longer be renewed

use tracing::warn;

/// Sends the application to its unauthenticated entry point.
///
/// Called at most once per failed renewal, however many requests were
/// waiting on it. Must not block.
pub trait Navigator: Send + Sync {
    fn to_login(&self);
}

impl<F> Navigator for F
where
    F: Fn() + Send + Sync,
{
    fn to_login(&self) {
        self()
    }
}

/// Navigator for headless use: records the forced sign-out in the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNavigator;

impl Navigator for LogNavigator {
    fn to_login(&self) {
        warn!("session could not be renewed, sign-in required");
    }
}
