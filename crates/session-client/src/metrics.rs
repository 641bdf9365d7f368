//! Refresh and replay counters
//!
//! Emitted through the `metrics` facade; without an installed recorder
//! every call is a no-op.
//!
//! - `session_refresh_total` (counter): label `outcome` = success | failure
//! - `session_requests_queued_total` (counter)
//! - `session_replays_total` (counter): label `outcome` = success | failure | skipped

/// Record one completed refresh call.
pub fn record_refresh(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    metrics::counter!("session_refresh_total", "outcome" => outcome).increment(1);
}

/// Record a request parked behind an in-flight refresh.
pub fn record_queued() {
    metrics::counter!("session_requests_queued_total").increment(1);
}

/// Record a replay outcome: "success", "failure", or "skipped".
pub fn record_replay(outcome: &'static str) {
    metrics::counter!("session_replays_total", "outcome" => outcome).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};

    /// Isolated recorder/handle pair; a global recorder can only be installed once per process.
    fn isolated_recorder() -> (PrometheusRecorder, PrometheusHandle) {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        (recorder, handle)
    }

    #[test]
    fn record_functions_do_not_panic_without_recorder() {
        record_refresh(true);
        record_queued();
        record_replay("skipped");
    }

    #[test]
    fn refresh_counter_carries_outcome_label() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_refresh(true);
        record_refresh(false);
        record_refresh(false);

        let output = handle.render();
        assert!(output.contains("session_refresh_total{outcome=\"success\"} 1"), "{output}");
        assert!(output.contains("session_refresh_total{outcome=\"failure\"} 2"), "{output}");
    }

    #[test]
    fn queue_and_replay_counters_render() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_queued();
        record_queued();
        record_replay("success");
        record_replay("failure");

        let output = handle.render();
        assert!(output.contains("session_requests_queued_total 2"), "{output}");
        assert!(output.contains("session_replays_total{outcome=\"success\"} 1"), "{output}");
        assert!(output.contains("session_replays_total{outcome=\"failure\"} 1"), "{output}");
    }
}
