//! Notification stream metrics
//!
//! - `notify_connections_total` (counter): label `outcome` (`opened`, `failed`)
//! - `notify_reconnects_scheduled_total` (counter)
//! - `notify_frames_total` (counter): label `kind` (`init`, `notification`,
//!   `other`, `malformed`)

/// Record the result of one connection attempt.
pub fn record_connection(outcome: &'static str) {
    ::metrics::counter!("notify_connections_total", "outcome" => outcome).increment(1);
}

pub fn record_reconnect_scheduled() {
    ::metrics::counter!("notify_reconnects_scheduled_total").increment(1);
}

/// Record one inbound text frame by decoded kind.
pub fn record_frame(kind: &'static str) {
    ::metrics::counter!("notify_frames_total", "kind" => kind).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusBuilder;

    #[test]
    fn record_functions_do_not_panic_without_recorder() {
        record_connection("opened");
        record_reconnect_scheduled();
        record_frame("init");
    }

    #[test]
    fn counters_render_with_labels() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let _guard = ::metrics::set_default_local_recorder(&recorder);

        record_connection("failed");
        record_connection("failed");
        record_reconnect_scheduled();
        record_frame("malformed");

        let output = handle.render();
        assert!(output.contains("notify_connections_total{outcome=\"failed\"} 2"), "{output}");
        assert!(output.contains("notify_reconnects_scheduled_total 1"), "{output}");
        assert!(output.contains("notify_frames_total{kind=\"malformed\"} 1"), "{output}");
    }
}
