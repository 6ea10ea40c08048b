//! Prometheus metrics.
//!
//! Two recorders are in play. Every `/probe` request renders its outcome into a
//! fresh recorder built for that request alone, so concurrent probes never
//! share gauges. The process recorder, installed once by [`init`], carries
//! exporter-wide counters and is served on `/metrics`.

pub mod exporter_metrics;

use metrics::{describe_gauge, gauge};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

use crate::stats::{LatencyStats, Summary};

/// Error type for metrics initialization failures.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Failed to build or install the Prometheus recorder.
    #[error("Failed to build metrics recorder: {0}")]
    RecorderBuild(String),
}

/// Installs the process-wide recorder and returns the handle rendering it.
pub fn init() -> Result<PrometheusHandle, MetricsError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Suffix("_seconds".to_string()),
            &[
                0.005, // 5 milliseconds
                0.01,  // 10 milliseconds
                0.025, // 25 milliseconds
                0.05,  // 50 milliseconds
                0.1,   // 100 milliseconds
                0.25,  // 250 milliseconds
                0.5,   // 500 milliseconds
                1.0,   // 1 second
                2.5,   // 2.5 seconds
                5.0,   // 5 seconds
                10.0,  // 10 seconds
                30.0,  // 30 seconds
                60.0,  // 1 minute
            ],
        )
        .map_err(|e| MetricsError::RecorderBuild(e.to_string()))?
        .install_recorder()
        .map_err(|e| MetricsError::RecorderBuild(e.to_string()))
}

fn set_summary(direction: &'static str, summary: &Summary) {
    for (kind, value) in [
        ("min", summary.min),
        ("avg", summary.avg),
        ("max", summary.max),
    ] {
        gauge!(
            "probe_duration_seconds",
            "direction" => direction,
            "type" => kind
        )
        .set(value);
    }
}

/// Renders the outcome of one probe as a Prometheus text document.
pub fn render_probe(stats: &LatencyStats) -> String {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    metrics::with_local_recorder(&recorder, || {
        describe_gauge!("probe_success", "Displays whether or not the probe was a success");
        describe_gauge!(
            "probe_duration_seconds",
            "Duration of the TWAMP exchanges by direction"
        );
        describe_gauge!("probe_packets_sent", "Test packets sent by the probe");
        describe_gauge!(
            "probe_packets_received",
            "Reflected test packets received by the probe"
        );

        gauge!("probe_success").set(if stats.success { 1.0 } else { 0.0 });
        set_summary("forward", &stats.forward);
        set_summary("backward", &stats.backward);
        set_summary("both", &stats.round_trip);
        gauge!("probe_packets_sent").set(stats.packets_sent as f64);
        gauge!("probe_packets_received").set(stats.packets_received as f64);
    });

    handle.render()
}
