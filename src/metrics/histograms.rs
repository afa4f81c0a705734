//! Histogram metrics

use super::labels;

/// Wall time of a dial in milliseconds
pub fn dial_duration(outcome: &'static str, duration_ms: u64) {
    ::metrics::histogram!(labels::DIAL_DURATION, "outcome" => outcome).record(duration_ms as f64);
}
