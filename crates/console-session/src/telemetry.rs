//! Process-wide tracing and metrics setup

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{Error, Result};

/// Install a JSON tracing subscriber filtered by `LOG_LEVEL`, then
/// `RUST_LOG`, defaulting to `info`.
///
/// Returns `false` when a global subscriber was already installed, which
/// leaves the existing one in place.
pub fn init_tracing() -> bool {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .try_init()
        .is_ok()
}

/// Install the Prometheus recorder for the request and stream counters and
/// return a handle for rendering them.
pub fn install_metrics() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| Error::Telemetry(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracing_init_is_idempotent() {
        init_tracing();
        assert!(!init_tracing());
    }

    #[test]
    fn second_metrics_install_is_an_error() {
        // Only this test installs a global recorder
        let handle = install_metrics().unwrap();
        ::metrics::counter!("api_requests_total", "outcome" => "ok").increment(1);
        assert!(handle.render().contains("api_requests_total"));

        assert!(matches!(install_metrics(), Err(Error::Telemetry(_))));
    }
}
