//! Process-wide exporter metrics, recorded into the installed recorder.

use std::time::Duration;

use metrics::{counter, histogram};

/// Records the outcome of a probe run for `module`.
pub fn record_probe(module: &str, success: bool) {
    let result = if success { "success" } else { "failure" };
    counter!(
        "twamp_exporter_probes_total",
        "module" => module.to_string(),
        "result" => result
    )
    .increment(1);
}

/// Records the wall-clock duration of a probe run.
pub fn record_probe_duration(module: &str, elapsed: Duration) {
    histogram!("twamp_exporter_probe_seconds", "module" => module.to_string())
        .record(elapsed.as_secs_f64());
}
