//! Retry and backoff policy

use std::time::Duration;

/// Retries granted to an interactive session (three attempts in total)
pub const INTERACTIVE_MAX_RETRIES: u32 = 2;

/// Retries granted to a daemon session; effectively unbounded
pub const DAEMON_MAX_RETRIES: u32 = 999_999_999;

/// How a session retries failed connects and queries.
///
/// Attempts are numbered from 0. Attempt `i` that fails with a
/// connection-class error is followed by a sleep of
/// `min(2^i, max_backoff_units) * backoff_unit`, then a reconnect, then
/// attempt `i + 1`, for at most `max_retries + 1` attempts in total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Length of one backoff unit
    pub backoff_unit: Duration,
    /// Cap on the exponential backoff, in units
    pub max_backoff_units: u32,
    /// Pause after replacing an invalidated handle, in units
    pub reconnect_pause_units: u32,
    /// Whether replacing an invalidated handle consumes an attempt
    pub count_handle_invalidation: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::interactive()
    }
}

impl RetryPolicy {
    /// Policy for a session driven by a person at a terminal
    pub fn interactive() -> Self {
        Self {
            max_retries: INTERACTIVE_MAX_RETRIES,
            backoff_unit: Duration::from_secs(1),
            max_backoff_units: 60,
            reconnect_pause_units: 1,
            count_handle_invalidation: false,
        }
    }

    /// Policy for an unattended, long-running session
    pub fn daemon() -> Self {
        Self {
            max_retries: DAEMON_MAX_RETRIES,
            ..Self::interactive()
        }
    }

    /// Set the retry budget
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the backoff unit
    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    /// Make handle invalidation consume an attempt
    pub fn with_count_handle_invalidation(mut self, count: bool) -> Self {
        self.count_handle_invalidation = count;
        self
    }

    /// Sleep before the retry that follows failed attempt `attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let units = 1u64
            .checked_shl(attempt)
            .unwrap_or(u64::MAX)
            .min(u64::from(self.max_backoff_units));
        // units <= max_backoff_units, which is a u32
        self.backoff_unit.saturating_mul(units as u32)
    }

    /// Pause after replacing an invalidated handle
    pub fn reconnect_pause(&self) -> Duration {
        self.backoff_unit.saturating_mul(self.reconnect_pause_units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_then_caps() {
        let policy = RetryPolicy::interactive();
        let secs: Vec<u64> = (0..9).map(|i| policy.backoff(i).as_secs()).collect();
        assert_eq!(secs, [1, 2, 4, 8, 16, 32, 60, 60, 60]);
    }

    #[test]
    fn test_backoff_saturates_for_huge_attempts() {
        let policy = RetryPolicy::daemon();
        assert_eq!(policy.backoff(63), Duration::from_secs(60));
        assert_eq!(policy.backoff(64), Duration::from_secs(60));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_secs(60));

        let huge = policy.with_backoff_unit(Duration::MAX);
        assert_eq!(huge.backoff(10), Duration::MAX);
    }

    #[test]
    fn test_backoff_uses_unit() {
        let policy = RetryPolicy::interactive().with_backoff_unit(Duration::from_millis(10));
        assert_eq!(policy.backoff(0), Duration::from_millis(10));
        assert_eq!(policy.backoff(3), Duration::from_millis(80));
        assert_eq!(policy.reconnect_pause(), Duration::from_millis(10));
    }

    #[test]
    fn test_presets() {
        let interactive = RetryPolicy::default();
        assert_eq!(interactive.max_retries, 2);
        assert!(!interactive.count_handle_invalidation);

        let daemon = RetryPolicy::daemon();
        assert_eq!(daemon.max_retries, 999_999_999);
        assert_eq!(daemon.backoff_unit, interactive.backoff_unit);
    }
}
