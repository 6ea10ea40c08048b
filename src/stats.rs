//! Latency statistics of a single probe.
//!
//! [`RttCollector`] summarizes round-trip times on the measurement side, while
//! [`LatencyAggregator`] splits every exchange into its forward and backward
//! halves and folds them into min/avg/max values.

use chrono::{DateTime, Utc};

/// Timestamps of one test exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    /// Sender clock, test packet transmitted.
    pub sender: DateTime<Utc>,
    /// Reflector clock, test packet received.
    pub receive: DateTime<Utc>,
    /// Reflector clock, reply transmitted.
    pub reflect: DateTime<Utc>,
    /// Sender clock, reply received.
    pub finished: DateTime<Utc>,
}

impl Sample {
    /// Sender to reflector latency in seconds.
    pub fn forward(&self) -> f64 {
        seconds_between(self.receive, self.sender)
    }

    /// Reflector to sender latency in seconds.
    pub fn backward(&self) -> f64 {
        seconds_between(self.finished, self.reflect)
    }

    /// Full exchange duration in seconds.
    pub fn round_trip(&self) -> f64 {
        seconds_between(self.finished, self.sender)
    }
}

fn seconds_between(later: DateTime<Utc>, earlier: DateTime<Utc>) -> f64 {
    let delta = later.signed_duration_since(earlier);
    match delta.num_nanoseconds() {
        Some(ns) => ns as f64 / 1_000_000_000.0,
        None => delta.num_milliseconds() as f64 / 1_000.0,
    }
}

/// Minimum, average and maximum of one direction, in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Summary {
    pub min: f64,
    pub avg: f64,
    pub max: f64,
}

/// Round-trip statistics reported by a test run.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RoundTripSummary {
    pub stats: Summary,
    pub packets_sent: u32,
    pub packets_received: u32,
}

/// Collects round-trip times of a test run.
pub struct RttCollector {
    min: Option<f64>,
    max: Option<f64>,
    sum: f64,
    received: u32,
}

impl RttCollector {
    /// Creates a new empty collector.
    pub fn new() -> Self {
        RttCollector {
            min: None,
            max: None,
            sum: 0.0,
            received: 0,
        }
    }

    /// Records a round-trip time in seconds.
    pub fn record(&mut self, rtt: f64) {
        self.min = Some(self.min.map_or(rtt, |m| m.min(rtt)));
        self.max = Some(self.max.map_or(rtt, |m| m.max(rtt)));
        self.sum += rtt;
        self.received += 1;
    }

    /// Builds a summary over the received replies.
    pub fn snapshot(&self, packets_sent: u32) -> RoundTripSummary {
        let avg = if self.received > 0 {
            self.sum / self.received as f64
        } else {
            0.0
        };
        RoundTripSummary {
            stats: Summary {
                min: self.min.unwrap_or(0.0),
                avg,
                max: self.max.unwrap_or(0.0),
            },
            packets_sent,
            packets_received: self.received,
        }
    }
}

impl Default for RttCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of a probe.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LatencyStats {
    pub forward: Summary,
    pub backward: Summary,
    pub round_trip: Summary,
    pub packets_sent: u32,
    pub packets_received: u32,
    pub success: bool,
}

impl LatencyStats {
    /// Zeroed, unsuccessful result.
    pub fn failed() -> Self {
        LatencyStats::default()
    }
}

#[derive(Default)]
struct Running {
    min: Option<f64>,
    max: Option<f64>,
    sum: f64,
}

impl Running {
    fn record(&mut self, value: f64) {
        if self.min.map_or(true, |m| value < m) {
            self.min = Some(value);
        }
        if self.max.map_or(true, |m| value > m) {
            self.max = Some(value);
        }
        self.sum += value;
    }

    fn summary(&self, denominator: u32) -> Summary {
        Summary {
            min: self.min.unwrap_or(0.0),
            avg: self.sum / denominator as f64,
            max: self.max.unwrap_or(0.0),
        }
    }
}

/// Folds per-exchange samples into forward and backward statistics.
///
/// Averages divide by the expected sample count given at construction, not by
/// the number of samples actually observed.
pub struct LatencyAggregator {
    sample_count: u32,
    forward: Running,
    backward: Running,
}

impl LatencyAggregator {
    pub fn new(sample_count: u32) -> Self {
        LatencyAggregator {
            sample_count,
            forward: Running::default(),
            backward: Running::default(),
        }
    }

    pub fn observe(&mut self, sample: &Sample) {
        self.forward.record(sample.forward());
        self.backward.record(sample.backward());
    }

    /// Completes the statistics with the round trip reported by the test run.
    ///
    /// A run that lost every exchange still succeeds, with zeroed latencies
    /// and `packets_received == 0`.
    pub fn finish(self, round_trip: &RoundTripSummary) -> LatencyStats {
        if self.sample_count == 0 {
            return LatencyStats::failed();
        }

        LatencyStats {
            forward: self.forward.summary(self.sample_count),
            backward: self.backward.summary(self.sample_count),
            round_trip: round_trip.stats,
            packets_sent: round_trip.packets_sent,
            packets_received: round_trip.packets_received,
            success: true,
        }
    }
}
