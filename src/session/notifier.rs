//! User-facing notification sink

use std::time::Duration;

/// Notification severity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Informational
    Information,
    /// Something the user should look at
    Warning,
    /// A request was refused or failed
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Information => write!(f, "information"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Receives notifications the session raises for the user.
pub trait Notifier: Send + Sync {
    /// Show `message` under `title` for `timeout`
    fn notify(&self, message: &str, title: &str, severity: Severity, timeout: Duration);
}

/// Writes notifications to the `tracing` log
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, message: &str, title: &str, severity: Severity, timeout: Duration) {
        let timeout_secs = timeout.as_secs();
        match severity {
            Severity::Information => tracing::info!(title, timeout_secs, "{}", message),
            Severity::Warning => tracing::warn!(title, timeout_secs, "{}", message),
            Severity::Error => tracing::error!(title, timeout_secs, "{}", message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_severity_display() {
        assert_eq!(Severity::Information.to_string(), "information");
        assert_eq!(Severity::Warning.to_string(), "warning");
        assert_eq!(Severity::Error.to_string(), "error");
    }

    #[test]
    fn test_tracing_notifier_is_object_safe() {
        let notifier: Arc<dyn Notifier> = Arc::new(TracingNotifier);
        notifier.notify("msg", "title", Severity::Warning, Duration::from_secs(1));
    }
}
