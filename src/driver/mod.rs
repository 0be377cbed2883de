//! Transport contract between the session and a database driver
//!
//! The session only ever talks to a [`Connector`] and the
//! [`DriverConnection`] handles it opens. Failures come back as a
//! [`DriverError`] carrying one kind from a closed set, and the session's
//! whole retry policy keys off [`is_connection_error`].
//!
//! [`PgConnector`] is the production implementation over the native
//! PostgreSQL wire client.

mod params;
mod postgres;
mod value;

pub use params::{ConnectParams, Endpoint, TlsParams, APPLICATION_NAME, DEFAULT_CONNECT_TIMEOUT};
pub use postgres::{PgConnection, PgConnector};
pub use value::{Column, Param, QueryResult, Row};

use async_trait::async_trait;
use thiserror::Error;

/// Closed set of driver failure kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Link-level failure: refused, reset, timed out, server shutting down
    Operational,
    /// Client/server desynchronisation or protocol violation
    Interface,
    /// The handle can no longer be used (torn down, busy, closed)
    HandleInvalid,
    /// Bad SQL or reference to a missing object
    Programming,
    /// Constraint violation
    Integrity,
    /// Invalid data or value out of range
    Data,
    /// Insufficient privilege
    Permission,
    /// Feature not supported by the server or driver
    NotSupported,
    /// Invalid connection settings (TLS files, socket mode)
    Configuration,
    /// Anything else
    Internal,
}

impl ErrorKind {
    /// Short lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Operational => "operational",
            Self::Interface => "interface",
            Self::HandleInvalid => "handle_invalid",
            Self::Programming => "programming",
            Self::Integrity => "integrity",
            Self::Data => "data",
            Self::Permission => "permission",
            Self::NotSupported => "not_supported",
            Self::Configuration => "configuration",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// True only for the kinds that mean the link itself failed.
pub fn is_connection_error(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::Operational | ErrorKind::Interface)
}

/// Error returned by a [`Connector`] or [`DriverConnection`]
///
/// Displays as the raw driver or server message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct DriverError {
    /// Failure kind
    pub kind: ErrorKind,
    /// Raw message
    pub message: String,
}

impl DriverError {
    /// Create an error of the given kind
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Whether the link itself failed
    pub fn is_connection_error(&self) -> bool {
        is_connection_error(self.kind)
    }
}

impl From<crate::Error> for DriverError {
    fn from(err: crate::Error) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

/// Opens connections
#[async_trait]
pub trait Connector: Send + Sync {
    /// Handle type produced by [`Connector::open`]
    type Connection: DriverConnection;

    /// Open a new connection
    async fn open(&self, params: &ConnectParams) -> Result<Self::Connection, DriverError>;
}

/// One open connection
#[async_trait]
pub trait DriverConnection: Send {
    /// Switch autocommit on or off
    async fn set_autocommit(&mut self, enabled: bool) -> Result<(), DriverError>;

    /// Run one statement and collect its whole result
    async fn execute(&mut self, sql: &str, params: &[Param]) -> Result<QueryResult, DriverError>;

    /// Cheap liveness probe
    async fn ping(&mut self) -> Result<(), DriverError>;

    /// Server-assigned identifier of this connection
    async fn backend_id(&mut self) -> Result<Option<i64>, DriverError>;

    /// Release the connection
    async fn close(self) -> Result<(), DriverError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_classifier() {
        assert!(is_connection_error(ErrorKind::Operational));
        assert!(is_connection_error(ErrorKind::Interface));
        for kind in [
            ErrorKind::HandleInvalid,
            ErrorKind::Programming,
            ErrorKind::Integrity,
            ErrorKind::Data,
            ErrorKind::Permission,
            ErrorKind::NotSupported,
            ErrorKind::Configuration,
            ErrorKind::Internal,
        ] {
            assert!(!is_connection_error(kind), "{}", kind);
        }
    }

    #[test]
    fn test_driver_error_displays_raw_message() {
        let err = DriverError::new(ErrorKind::Programming, "syntax error at or near \"SELEC\"");
        assert_eq!(err.to_string(), "syntax error at or near \"SELEC\"");
        assert!(!err.is_connection_error());
    }

    #[test]
    fn test_driver_error_from_crate_error() {
        let err: DriverError = crate::Error::ConnectionClosed.into();
        assert_eq!(err.kind, ErrorKind::Operational);
        assert!(err.is_connection_error());

        let err: DriverError = crate::Error::ConnectionBusy("reading_results".into()).into();
        assert_eq!(err.kind, ErrorKind::HandleInvalid);
    }
}
