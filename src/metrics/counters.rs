//! Counter helpers

use super::labels;

/// Record one connection attempt and its outcome
pub fn connect_attempt(outcome: &'static str, reconnect: bool) {
    metrics::counter!(
        labels::CONNECT_ATTEMPTS,
        "outcome" => outcome,
        "reconnect" => if reconnect { "true" } else { "false" }
    )
    .increment(1);
}

/// Record a reconnect triggered by `execute`
pub fn reconnect(reason: &'static str) {
    metrics::counter!(labels::RECONNECTS, "reason" => reason).increment(1);
}

/// Record the outcome of one `execute` call
pub fn query_completed(outcome: &'static str) {
    metrics::counter!(labels::QUERIES, "outcome" => outcome).increment(1);
}

/// Record a rejected concurrent `execute`
pub fn query_rejected() {
    metrics::counter!(labels::QUERIES_REJECTED).increment(1);
}

/// Record an authentication attempt
pub fn auth_attempted(mechanism: &'static str) {
    metrics::counter!(labels::AUTH_ATTEMPTS, "mechanism" => mechanism).increment(1);
}

/// Record an authentication result
pub fn auth_result(mechanism: &'static str, outcome: &'static str) {
    metrics::counter!(
        labels::AUTH_RESULTS,
        "mechanism" => mechanism,
        "outcome" => outcome
    )
    .increment(1);
}
