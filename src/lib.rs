//! TWAMP Exporter - on-demand TWAMP (RFC 5357) probes for Prometheus.
//!
//! Every `/probe?module=<name>&target=<host>` request runs one light-weight
//! TWAMP session against `target` with the named profile and answers with the
//! forward, backward and round-trip latencies as a Prometheus text document.
//!
//! # Usage
//!
//! ```bash
//! twamp-exporter --config.file config.yaml --web.listen-address 0.0.0.0:2112
//! curl 'http://localhost:2112/probe?module=default&target=192.0.2.1'
//! ```

/// Command-line flags and probe profiles.
pub mod configuration;
/// Prometheus rendering of probe results and process metrics.
pub mod metrics;
/// TWAMP-Test packet structures and serialization.
pub mod packets;
/// Probe orchestration.
pub mod prober;
/// Target name resolution with address family preference.
pub mod resolver;
/// HTTP handlers.
pub mod server;
/// Measurement session seams.
pub mod session;
/// Latency statistics.
pub mod stats;
/// NTP timestamp utilities.
pub mod time;
/// TWAMP client.
pub mod twamp;
