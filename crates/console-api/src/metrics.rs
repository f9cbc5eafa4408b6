//! Request pipeline metrics
//!
//! - `api_requests_total` (counter): label `outcome` (`ok` or an error kind)
//! - `api_renewals_total` (counter): label `outcome` (`renewed`, `failed`)
//!
//! Without an installed recorder these are no-ops.

use crate::error::Error;

/// Record the final outcome of one logical call.
pub fn record_request(result: Result<(), &Error>) {
    let outcome = match result {
        Ok(()) => "ok",
        Err(e) => e.kind(),
    };
    ::metrics::counter!("api_requests_total", "outcome" => outcome).increment(1);
}

/// Record one renewal episode.
pub fn record_renewal(outcome: &'static str) {
    ::metrics::counter!("api_renewals_total", "outcome" => outcome).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusBuilder;

    #[test]
    fn record_functions_do_not_panic_without_recorder() {
        record_request(Ok(()));
        record_renewal("renewed");
    }

    #[test]
    fn outcomes_render_as_labels() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let _guard = ::metrics::set_default_local_recorder(&recorder);

        record_request(Ok(()));
        record_request(Err(&Error::Domain {
            code: 40001,
            message: "nope".into(),
        }));
        record_renewal("failed");

        let output = handle.render();
        assert!(output.contains("api_requests_total{outcome=\"ok\"} 1"), "{output}");
        assert!(output.contains("api_requests_total{outcome=\"domain\"} 1"), "{output}");
        assert!(output.contains("api_renewals_total{outcome=\"failed\"} 1"), "{output}");
    }
}
