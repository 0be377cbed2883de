//! Histogram helpers

use super::labels;
use std::time::Duration;

/// Record a backoff sleep
pub fn backoff(delay: Duration) {
    metrics::histogram!(labels::BACKOFF_SECONDS).record(delay.as_secs_f64());
}

/// Record a query round trip
pub fn query_duration(elapsed: Duration) {
    metrics::histogram!(labels::QUERY_DURATION_MS).record(elapsed.as_secs_f64() * 1000.0);
}
