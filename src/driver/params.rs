//! Connection parameters handed to a [`Connector`](super::Connector)

use crate::connection::SslMode;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// `application_name` every session identifies itself with
pub const APPLICATION_NAME: &str = "Dolphie";

/// Deadline for opening a connection
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Where the server listens
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// TCP host and port
    Tcp {
        /// Host name or address
        host: String,
        /// Port
        port: u16,
    },
    /// Path of the Unix socket file
    Unix(PathBuf),
}

impl Endpoint {
    /// Unix endpoint from a socket file or a socket directory.
    ///
    /// A directory resolves to `<dir>/.s.PGSQL.<port>` the way libpq does.
    pub fn unix_socket(path: impl AsRef<Path>, port: u16) -> Self {
        let path = path.as_ref();
        if path.is_dir() {
            Endpoint::Unix(path.join(format!(".s.PGSQL.{}", port)))
        } else {
            Endpoint::Unix(path.to_path_buf())
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Tcp { host, port } => write!(f, "{}:{}", host, port),
            Endpoint::Unix(path) => write!(f, "{}", path.display()),
        }
    }
}

/// TLS settings forwarded to the driver
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsParams {
    /// `sslmode`
    pub mode: SslMode,
    /// Trust anchors (`sslrootcert`)
    pub root_cert: Option<PathBuf>,
    /// Client certificate (`sslcert`)
    pub cert: Option<PathBuf>,
    /// Client key (`sslkey`)
    pub key: Option<PathBuf>,
}

/// Everything needed to open one connection
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectParams {
    /// Server endpoint
    pub endpoint: Endpoint,
    /// User name
    pub user: String,
    /// Password
    pub password: Option<String>,
    /// Database; omitted from startup when `None`
    pub database: Option<String>,
    /// Deadline for the whole open (socket, TLS, startup, auth)
    pub connect_timeout: Duration,
    /// Reported as `application_name`
    pub application_name: String,
    /// TLS settings
    pub tls: TlsParams,
}

impl ConnectParams {
    /// Parameters with defaults for everything but endpoint and user
    pub fn new(endpoint: Endpoint, user: impl Into<String>) -> Self {
        Self {
            endpoint,
            user: user.into(),
            password: None,
            database: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            application_name: APPLICATION_NAME.to_string(),
            tls: TlsParams::default(),
        }
    }
}

impl std::fmt::Debug for ConnectParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectParams")
            .field("endpoint", &self.endpoint)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("database", &self.database)
            .field("connect_timeout", &self.connect_timeout)
            .field("application_name", &self.application_name)
            .field("tls", &self.tls)
            .finish()
    }
}
