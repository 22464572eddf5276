use ::metrics::{counter, histogram};
use tracing::trace;

// Recorded through the `metrics` facade; the Prometheus recorder installed
// in `run()` renders them at `/metrics`. Without a recorder they are no-ops.

pub fn inc_requests(route: &'static str) {
    counter!("travelone_requests_total", "route" => route).increment(1);
    trace!(
        target = "travelone.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn status_check(outcome: &'static str) {
    counter!("travelone_status_checks_total", "outcome" => outcome).increment(1);
    trace!(
        target = "travelone.metrics",
        outcome = outcome,
        "status_checks_total_inc"
    );
}

pub fn wait_finished(phase: &'static str, elapsed_ms: u64) {
    counter!("travelone_waits_finished_total", "phase" => phase).increment(1);
    histogram!("travelone_wait_duration_seconds", "phase" => phase)
        .record(elapsed_ms as f64 / 1000.0);
    trace!(
        target = "travelone.metrics",
        phase = phase,
        elapsed_ms = elapsed_ms,
        "wait_finished"
    );
}
