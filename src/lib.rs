//! dolphie-pg: a resilient PostgreSQL session for a monitoring front end.
//!
//! The crate is layered bottom-up:
//!
//! * [`protocol`]: frontend/backend message codec
//! * [`auth`]: MD5 and SCRAM-SHA-256 password exchanges
//! * [`connection`]: one native connection (TCP, TLS, Unix socket)
//! * [`driver`]: the `Connector` / `DriverConnection` seam and its
//!   production implementation over [`connection`]
//! * [`session`]: retry, backoff and reconnect on top of any `Connector`
//! * [`config`]: session settings and `postgres://` URL parsing
//!
//! ```ignore
//! use dolphie_pg::{PgConnector, Session, SessionConfig, TracingNotifier};
//! use std::sync::Arc;
//!
//! let config = SessionConfig::builder().host("localhost").user("postgres").build();
//! let session = Session::start(PgConnector::new(), config, Arc::new(TracingNotifier)).await?;
//! session.execute("SELECT 1", &[]).await?;
//! let row = session.fetch_one().await;
//! ```

#![warn(missing_docs)]

pub mod auth;
pub mod config;
pub mod connection;
pub mod driver;
pub mod error;
pub mod metrics;
pub mod protocol;
pub mod session;

pub use config::{SessionConfig, SessionConfigBuilder, TlsOptions};
pub use driver::{
    is_connection_error, Column, ConnectParams, Connector, DriverConnection, DriverError, Endpoint,
    ErrorKind, Param, PgConnection, PgConnector, QueryResult, Row, TlsParams,
};
pub use error::{Error, Result, ServerError};
pub use session::{Notifier, RetryPolicy, Session, Severity, TracingNotifier, QUERY_MARKER};
