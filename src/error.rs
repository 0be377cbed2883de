//! Error types

use crate::driver::ErrorKind;
use crate::protocol::ErrorFields;
use std::io;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Debug, Error)]
pub enum Error {
    /// The link to the server could not be established or maintained
    #[error("{0}")]
    Connection(String),

    /// User-facing failure surfaced by the session (raw server/driver message)
    #[error("{0}")]
    Manual(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Protocol violation
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Query text or parameter cannot be sent (e.g. interior NUL byte)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Authentication failure
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Error reported by the server in an ErrorResponse
    #[error("{0}")]
    Server(ServerError),

    /// The server closed the connection
    #[error("connection closed by server")]
    ConnectionClosed,

    /// Connection is not idle (a previous query never finished)
    #[error("connection busy: {0}")]
    ConnectionBusy(String),

    /// Invalid state transition
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state description
        expected: String,
        /// Actual state description
        actual: String,
    },

    /// Connect phase exceeded its deadline
    #[error("timeout expired after {0:?}")]
    Timeout(std::time::Duration),
}

/// Server error with its SQLSTATE
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    /// SQLSTATE code (five characters)
    pub code: String,
    /// Primary message
    pub message: String,
    /// Optional detail line
    pub detail: Option<String>,
}

impl ServerError {
    /// Two-character SQLSTATE class
    pub fn class(&self) -> &str {
        self.code.get(..2).unwrap_or("")
    }
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(detail) = &self.detail {
            write!(f, "\nDETAIL:  {}", detail)?;
        }
        Ok(())
    }
}

impl From<ErrorFields> for ServerError {
    fn from(fields: ErrorFields) -> Self {
        Self {
            code: fields.code.unwrap_or_else(|| "XX000".to_string()),
            message: fields
                .message
                .unwrap_or_else(|| "unknown server error".to_string()),
            detail: fields.detail,
        }
    }
}

impl Error {
    /// Classify this error into the transport's closed error set.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Connection(_)
            | Error::Io(_)
            | Error::ConnectionClosed
            | Error::Authentication(_)
            | Error::Timeout(_) => ErrorKind::Operational,
            Error::Protocol(_) => ErrorKind::Interface,
            Error::ConnectionBusy(_) | Error::InvalidState { .. } => ErrorKind::HandleInvalid,
            Error::Config(_) => ErrorKind::Configuration,
            Error::InvalidInput(_) => ErrorKind::Data,
            Error::Manual(_) => ErrorKind::Internal,
            Error::Server(err) => sqlstate_kind(&err.code),
        }
    }
}

/// Map a SQLSTATE code to an error kind.
pub fn sqlstate_kind(code: &str) -> ErrorKind {
    if code == "42501" {
        return ErrorKind::Permission;
    }
    match code.get(..2).unwrap_or("") {
        // connection exception, insufficient resources, operator intervention,
        // system error, transaction rollback, invalid authorization
        "08" | "53" | "57" | "58" | "40" | "28" => ErrorKind::Operational,
        "42" => ErrorKind::Programming,
        "23" => ErrorKind::Integrity,
        "22" => ErrorKind::Data,
        "0A" => ErrorKind::NotSupported,
        _ => ErrorKind::Internal,
    }
}
