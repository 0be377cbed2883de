//! Session configuration
//!
//! [`SessionConfig`] carries everything the session needs to reach the
//! server plus its behavioural switches. Build it field by field with
//! [`SessionConfig::builder`] or from a `postgres://` URL with
//! [`SessionConfig::from_url`].

mod connection_string;

use crate::connection::SslMode;
use crate::driver::{ConnectParams, Endpoint, TlsParams, APPLICATION_NAME, DEFAULT_CONNECT_TIMEOUT};
use crate::session::RetryPolicy;
use std::path::PathBuf;
use std::time::Duration;

/// Default server host
pub const DEFAULT_HOST: &str = "localhost";

/// Default server port
pub const DEFAULT_PORT: u16 = 5432;

/// TLS option bag.
///
/// Without an explicit `ssl_mode` TLS is still only preferred, so a bag that
/// carries nothing but file paths keeps plaintext servers reachable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsOptions {
    /// Explicit `sslmode`
    pub ssl_mode: Option<SslMode>,
    /// Trust anchors (`sslrootcert`)
    pub ssl_ca: Option<PathBuf>,
    /// Client certificate (`sslcert`)
    pub ssl_cert: Option<PathBuf>,
    /// Client key (`sslkey`)
    pub ssl_key: Option<PathBuf>,
}

impl TlsOptions {
    fn to_params(&self) -> TlsParams {
        TlsParams {
            mode: self.ssl_mode.unwrap_or(SslMode::Prefer),
            root_cert: self.ssl_ca.clone(),
            cert: self.ssl_cert.clone(),
            key: self.ssl_key.clone(),
        }
    }
}

/// Session configuration
#[derive(Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Server host
    pub host: String,
    /// Server port; also names the socket file inside a socket directory
    pub port: u16,
    /// Unix socket file or directory; takes precedence over `host`
    pub socket: Option<PathBuf>,
    /// User name
    pub user: String,
    /// Password
    pub password: Option<String>,
    /// Database; the server default applies when unset
    pub database: Option<String>,
    /// TLS option bag; `None` means `sslmode=prefer`
    pub tls: Option<TlsOptions>,
    /// Capture `pg_backend_pid()` after every connect
    pub persist_backend_id: bool,
    /// Long-running mode: practically unlimited retries, any error after the
    /// first successful connect triggers a reconnect
    pub daemon_mode: bool,
    /// Connect while constructing the session
    pub auto_connect: bool,
    /// Deadline for opening one connection
    pub connect_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            socket: None,
            user: whoami::username(),
            password: None,
            database: None,
            tls: None,
            persist_backend_id: true,
            daemon_mode: false,
            auto_connect: true,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("socket", &self.socket)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("database", &self.database)
            .field("tls", &self.tls)
            .field("persist_backend_id", &self.persist_backend_id)
            .field("daemon_mode", &self.daemon_mode)
            .field("auto_connect", &self.auto_connect)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl SessionConfig {
    /// Create a builder starting from the defaults
    ///
    /// ```ignore
    /// let config = SessionConfig::builder()
    ///     .host("db.internal")
    ///     .user("monitor")
    ///     .password("secret")
    ///     .daemon_mode(true)
    ///     .build();
    /// ```
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder {
            config: SessionConfig::default(),
        }
    }

    /// Transport parameters for one open attempt.
    ///
    /// A socket path wins over host and port; a socket directory resolves to
    /// the `.s.PGSQL.<port>` file inside it.
    pub fn connect_params(&self) -> ConnectParams {
        let endpoint = match &self.socket {
            Some(socket) => Endpoint::unix_socket(socket, self.port),
            None => Endpoint::Tcp {
                host: self.host.clone(),
                port: self.port,
            },
        };
        ConnectParams {
            endpoint,
            user: self.user.clone(),
            password: self.password.clone(),
            database: self.database.clone(),
            connect_timeout: self.connect_timeout,
            application_name: APPLICATION_NAME.to_string(),
            tls: self.tls_params(),
        }
    }

    /// TLS parameters; `prefer` unless the option bag names a mode.
    pub fn tls_params(&self) -> TlsParams {
        match &self.tls {
            None => TlsParams::default(),
            Some(options) => options.to_params(),
        }
    }

    /// Retry policy matching the configured mode
    pub fn retry_policy(&self) -> RetryPolicy {
        if self.daemon_mode {
            RetryPolicy::daemon()
        } else {
            RetryPolicy::interactive()
        }
    }
}

/// Builder for [`SessionConfig`]
#[derive(Debug, Clone)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    /// Set the host
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Set the port
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Connect through a Unix socket file or directory
    pub fn socket(mut self, socket: impl Into<PathBuf>) -> Self {
        self.config.socket = Some(socket.into());
        self
    }

    /// Set the user
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.config.user = user.into();
        self
    }

    /// Set the password
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.password = Some(password.into());
        self
    }

    /// Set the database
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.config.database = Some(database.into());
        self
    }

    /// Set the TLS option bag
    pub fn tls(mut self, options: TlsOptions) -> Self {
        self.config.tls = Some(options);
        self
    }

    /// Capture the backend process id after connecting (default: true)
    pub fn persist_backend_id(mut self, enabled: bool) -> Self {
        self.config.persist_backend_id = enabled;
        self
    }

    /// Enable daemon mode (default: false)
    pub fn daemon_mode(mut self, enabled: bool) -> Self {
        self.config.daemon_mode = enabled;
        self
    }

    /// Connect while constructing the session (default: true)
    pub fn auto_connect(mut self, enabled: bool) -> Self {
        self.config.auto_connect = enabled;
        self
    }

    /// Set the connect timeout (default: 5 seconds)
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Build the configuration
    pub fn build(self) -> SessionConfig {
        self.config
    }
}
