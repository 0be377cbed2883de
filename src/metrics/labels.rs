//! Metric names and label values

/// Connection attempts by outcome
pub const CONNECT_ATTEMPTS: &str = "dolphie_pg_connect_attempts_total";
/// Reconnects triggered from the query path
pub const RECONNECTS: &str = "dolphie_pg_reconnects_total";
/// Completed `execute` calls by outcome
pub const QUERIES: &str = "dolphie_pg_queries_total";
/// `execute` calls rejected because another query was in flight
pub const QUERIES_REJECTED: &str = "dolphie_pg_queries_rejected_total";
/// Authentication attempts by mechanism
pub const AUTH_ATTEMPTS: &str = "dolphie_pg_auth_attempts_total";
/// Authentication outcomes by mechanism
pub const AUTH_RESULTS: &str = "dolphie_pg_auth_results_total";
/// Backoff sleep before a retry, in seconds
pub const BACKOFF_SECONDS: &str = "dolphie_pg_backoff_seconds";
/// Query round-trip time, in milliseconds
pub const QUERY_DURATION_MS: &str = "dolphie_pg_query_duration_ms";

/// Cleartext password auth
pub const MECHANISM_CLEARTEXT: &str = "cleartext";
/// MD5 password auth
pub const MECHANISM_MD5: &str = "md5";
/// SCRAM-SHA-256 auth
pub const MECHANISM_SCRAM: &str = "scram-sha-256";
/// No password exchange (trust)
pub const MECHANISM_TRUST: &str = "trust";

/// Successful outcome
pub const OUTCOME_OK: &str = "ok";
/// Failed outcome
pub const OUTCOME_ERROR: &str = "error";
/// Error suppressed by the caller
pub const OUTCOME_IGNORED: &str = "ignored";
/// Skipped because the session is disconnected
pub const OUTCOME_DISCONNECTED: &str = "disconnected";

/// Reconnect after a link-level failure
pub const REASON_CONNECTION_ERROR: &str = "connection_error";
/// Reconnect after the handle became unusable
pub const REASON_HANDLE_INVALID: &str = "handle_invalid";
