//! Native PostgreSQL connection
//!
//! This module handles:
//! * Socket layer (TCP, TLS over TCP, Unix socket)
//! * Connection lifecycle (TLS negotiation, startup, auth, queries)
//! * State machine enforcement

mod conn;
mod state;
mod tls;
mod transport;

pub use conn::{Connection, ConnectionConfig, ConnectionConfigBuilder, QueryOutcome};
pub use state::ConnectionState;
pub use tls::{server_name, SslMode, TlsConfig, TlsConfigBuilder};
pub use transport::Transport;
