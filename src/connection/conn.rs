//! Core connection type

use super::state::ConnectionState;
use super::tls::TlsConfig;
use super::transport::Transport;
use crate::auth::{md5_password, ScramClient};
use crate::metrics::{counters, histograms, labels};
use crate::protocol::constants::PROTOCOL_VERSION;
use crate::protocol::{
    decode_message, encode_message, AuthenticationMessage, BackendMessage, ErrorFields,
    FieldDescription, FrontendMessage,
};
use crate::{Error, Result};
use bytes::{Buf, Bytes, BytesMut};
use std::collections::HashMap;
use std::io;
use std::time::Instant;
use tracing::Instrument;

const SCRAM_SHA_256: &str = "SCRAM-SHA-256";

/// Startup parameters and credentials for one connection
///
/// Use `ConnectionConfig::builder()` to set the optional parts.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Username
    pub user: String,
    /// Password (optional)
    pub password: Option<String>,
    /// Database name (server defaults to the user name when unset)
    pub database: Option<String>,
    /// Application name shown in `pg_stat_activity`
    pub application_name: Option<String>,
    /// Additional startup parameters
    pub params: HashMap<String, String>,
}

impl ConnectionConfig {
    /// Create a configuration with defaults for everything but the user
    pub fn new(user: impl Into<String>) -> Self {
        Self::builder(user).build()
    }

    /// Create a builder
    ///
    /// ```ignore
    /// let config = ConnectionConfig::builder("postgres")
    ///     .password("secret")
    ///     .database("app")
    ///     .application_name("Dolphie")
    ///     .build();
    /// ```
    pub fn builder(user: impl Into<String>) -> ConnectionConfigBuilder {
        ConnectionConfigBuilder {
            user: user.into(),
            password: None,
            database: None,
            application_name: None,
            params: HashMap::new(),
        }
    }

    fn startup_params(&self) -> Vec<(String, String)> {
        let mut params = vec![("user".to_string(), self.user.clone())];
        if let Some(database) = &self.database {
            params.push(("database".to_string(), database.clone()));
        }
        if let Some(app_name) = &self.application_name {
            params.push(("application_name".to_string(), app_name.clone()));
        }
        params.push(("client_encoding".to_string(), "UTF8".to_string()));
        for (k, v) in &self.params {
            params.push((k.clone(), v.clone()));
        }
        params
    }

    fn require_password(&self) -> Result<&str> {
        self.password
            .as_deref()
            .ok_or_else(|| Error::Authentication("password required".into()))
    }
}

/// Builder for [`ConnectionConfig`]
#[derive(Debug, Clone)]
pub struct ConnectionConfigBuilder {
    user: String,
    password: Option<String>,
    database: Option<String>,
    application_name: Option<String>,
    params: HashMap<String, String>,
}

impl ConnectionConfigBuilder {
    /// Set the password
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the database
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set application name for Postgres logs
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }

    /// Add a startup parameter
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Build the configuration
    pub fn build(self) -> ConnectionConfig {
        ConnectionConfig {
            user: self.user,
            password: self.password,
            database: self.database,
            application_name: self.application_name,
            params: self.params,
        }
    }
}

/// Result of one query round trip
///
/// For a multi-statement simple query only the last statement's result is
/// kept.
#[derive(Debug, Clone, Default)]
pub struct QueryOutcome {
    /// Column metadata (empty for statements without a result set)
    pub columns: Vec<FieldDescription>,
    /// Raw text-format values, one vector per row
    pub rows: Vec<Vec<Option<Bytes>>>,
    /// Command tag such as `UPDATE 3`
    pub command_tag: Option<String>,
}

impl QueryOutcome {
    /// Number of rows the statement reported, if its tag carries one
    pub fn rows_affected(&self) -> Option<u64> {
        self.command_tag.as_deref().and_then(rows_affected)
    }
}

/// Extract the row count from a command tag.
///
/// `INSERT oid rows`, `UPDATE rows`, `SELECT rows` and friends carry a count;
/// utility commands such as `CREATE TABLE` do not.
fn rows_affected(tag: &str) -> Option<u64> {
    let verb = tag.split_whitespace().next()?;
    match verb {
        "INSERT" | "UPDATE" | "DELETE" | "SELECT" | "MERGE" | "MOVE" | "FETCH" | "COPY" => {
            tag.rsplit(' ').next()?.parse().ok()
        }
        _ => None,
    }
}

/// Postgres connection
pub struct Connection {
    transport: Option<Transport>,
    state: ConnectionState,
    read_buf: BytesMut,
    process_id: Option<i32>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state)
            .field("process_id", &self.process_id)
            .field("tls", &self.transport.as_ref().map(Transport::is_tls))
            .finish()
    }
}

impl Connection {
    /// Create connection from transport
    pub fn new(transport: Transport) -> Self {
        Self {
            transport: Some(transport),
            state: ConnectionState::Initial,
            read_buf: BytesMut::with_capacity(8192),
            process_id: None,
        }
    }

    /// Get current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Backend process ID from BackendKeyData
    pub fn process_id(&self) -> Option<i32> {
        self.process_id
    }

    /// Whether the stream is TLS-encrypted
    pub fn is_tls(&self) -> bool {
        self.transport.as_ref().is_some_and(Transport::is_tls)
    }

    fn transport_mut(&mut self) -> Result<&mut Transport> {
        self.transport.as_mut().ok_or(Error::ConnectionClosed)
    }

    /// Negotiate TLS with the server via the SSLRequest protocol.
    ///
    /// If the server answers `N`, the connection stays plaintext when the
    /// mode allows it and fails otherwise.
    async fn negotiate_tls(&mut self, tls_config: &TlsConfig, hostname: &str) -> Result<()> {
        self.state.transition(ConnectionState::NegotiatingTls)?;
        self.send_message(&FrontendMessage::SslRequest).await?;

        // single-byte answer: S = proceed with TLS, N = no TLS
        let mut answer = BytesMut::with_capacity(1);
        let n = self.transport_mut()?.read_buf(&mut answer).await?;
        if n == 0 {
            return Err(Error::ConnectionClosed);
        }
        if answer.len() > 1 {
            return Err(Error::Protocol(
                "received unencrypted data after SSL response".into(),
            ));
        }

        match answer[0] {
            b'S' => {
                tracing::debug!("server accepted TLS, upgrading connection");
                let transport = self.transport.take().ok_or(Error::ConnectionClosed)?;
                self.transport = Some(transport.upgrade_to_tls(tls_config, hostname).await?);
                tracing::debug!("TLS connection established");
                Ok(())
            }
            b'N' if tls_config.mode().allows_plaintext() => {
                tracing::debug!("server declined TLS, continuing unencrypted");
                Ok(())
            }
            b'N' => Err(Error::Connection(format!(
                "server does not support SSL, but SSL was required (sslmode={})",
                tls_config.mode()
            ))),
            other => Err(Error::Protocol(format!(
                "unexpected SSLRequest response byte: 0x{:02X}",
                other
            ))),
        }
    }

    /// Perform TLS negotiation (when `tls_config` is given), startup and authentication
    pub async fn startup(
        &mut self,
        config: &ConnectionConfig,
        tls_config: Option<&TlsConfig>,
        hostname: Option<&str>,
    ) -> Result<()> {
        async {
            if let Some(tls) = tls_config {
                let host = hostname
                    .ok_or_else(|| Error::Config("TLS negotiation requires a hostname".into()))?;
                self.negotiate_tls(tls, host).await?;
            }

            self.state.transition(ConnectionState::AwaitingAuth)?;

            let startup = FrontendMessage::Startup {
                version: PROTOCOL_VERSION,
                params: config.startup_params(),
            };
            self.send_message(&startup).await?;

            self.state.transition(ConnectionState::Authenticating)?;
            self.authenticate(config).await?;

            self.state.transition(ConnectionState::Idle)?;
            tracing::debug!(process_id = ?self.process_id, tls = self.is_tls(), "startup complete");
            Ok::<(), Error>(())
        }
        .instrument(tracing::info_span!(
            "startup",
            user = %config.user,
            database = config.database.as_deref().unwrap_or("")
        ))
        .await
    }

    /// Handle authentication
    async fn authenticate(&mut self, config: &ConnectionConfig) -> Result<()> {
        let mut mechanism = labels::MECHANISM_TRUST;

        loop {
            let msg = self.receive_message().await?;

            match msg {
                BackendMessage::Authentication(auth) => match auth {
                    AuthenticationMessage::Ok => {
                        tracing::debug!(mechanism, "authentication successful");
                        counters::auth_result(mechanism, labels::OUTCOME_OK);
                        // ReadyForQuery still follows
                    }
                    AuthenticationMessage::CleartextPassword => {
                        mechanism = labels::MECHANISM_CLEARTEXT;
                        counters::auth_attempted(mechanism);
                        let password = config.require_password()?.to_string();
                        self.send_message(&FrontendMessage::Password(password)).await?;
                    }
                    AuthenticationMessage::Md5Password { salt } => {
                        mechanism = labels::MECHANISM_MD5;
                        counters::auth_attempted(mechanism);
                        let hashed = md5_password(&config.user, config.require_password()?, salt);
                        self.send_message(&FrontendMessage::Password(hashed)).await?;
                    }
                    AuthenticationMessage::Sasl { mechanisms } => {
                        mechanism = labels::MECHANISM_SCRAM;
                        counters::auth_attempted(mechanism);
                        if let Err(e) = self.handle_sasl(&mechanisms, config).await {
                            counters::auth_result(mechanism, labels::OUTCOME_ERROR);
                            return Err(e);
                        }
                    }
                    AuthenticationMessage::SaslContinue { .. }
                    | AuthenticationMessage::SaslFinal { .. } => {
                        return Err(Error::Protocol(
                            "unexpected SASL message outside of SASL flow".into(),
                        ));
                    }
                },
                BackendMessage::BackendKeyData { process_id, .. } => {
                    self.process_id = Some(process_id);
                }
                BackendMessage::ParameterStatus { name, value } => {
                    tracing::trace!("parameter status: {} = {}", name, value);
                }
                BackendMessage::NoticeResponse(notice) => {
                    tracing::debug!(%notice, "notice during startup");
                }
                BackendMessage::ReadyForQuery { .. } => {
                    break;
                }
                BackendMessage::ErrorResponse(err) => {
                    counters::auth_result(mechanism, labels::OUTCOME_ERROR);
                    return Err(Error::Connection(err.to_string()));
                }
                _ => {
                    return Err(Error::Protocol(format!(
                        "unexpected message during auth: {:?}",
                        msg
                    )));
                }
            }
        }

        Ok(())
    }

    /// Handle SASL authentication (SCRAM-SHA-256)
    async fn handle_sasl(&mut self, mechanisms: &[String], config: &ConnectionConfig) -> Result<()> {
        if !mechanisms.iter().any(|m| m == SCRAM_SHA_256) {
            return Err(Error::Authentication(format!(
                "server does not support SCRAM-SHA-256. Available: {}",
                mechanisms.join(", ")
            )));
        }

        let scram = ScramClient::new(config.require_password()?);
        tracing::debug!("initiating SCRAM-SHA-256 authentication");

        let msg = FrontendMessage::SaslInitialResponse {
            mechanism: SCRAM_SHA_256.to_string(),
            data: scram.client_first().into_bytes(),
        };
        self.send_message(&msg).await?;

        let server_first = match self.receive_message().await? {
            BackendMessage::Authentication(AuthenticationMessage::SaslContinue { data }) => data,
            BackendMessage::ErrorResponse(err) => return Err(Error::Connection(err.to_string())),
            _ => {
                return Err(Error::Protocol(
                    "expected SaslContinue message during SASL authentication".into(),
                ))
            }
        };
        let server_first = String::from_utf8(server_first).map_err(|e| {
            Error::Authentication(format!("invalid UTF-8 in server first message: {}", e))
        })?;

        let (client_final, scram_state) = scram
            .client_final(&server_first)
            .map_err(|e| Error::Authentication(format!("SCRAM error: {}", e)))?;

        let msg = FrontendMessage::SaslResponse {
            data: client_final.into_bytes(),
        };
        self.send_message(&msg).await?;

        let server_final = match self.receive_message().await? {
            BackendMessage::Authentication(AuthenticationMessage::SaslFinal { data }) => data,
            BackendMessage::ErrorResponse(err) => return Err(Error::Connection(err.to_string())),
            _ => {
                return Err(Error::Protocol(
                    "expected SaslFinal message during SASL authentication".into(),
                ))
            }
        };
        let server_final = String::from_utf8(server_final).map_err(|e| {
            Error::Authentication(format!("invalid UTF-8 in server final message: {}", e))
        })?;

        scram
            .verify_server_final(&server_final, &scram_state)
            .map_err(|e| Error::Authentication(format!("SCRAM verification failed: {}", e)))?;

        tracing::debug!("SCRAM-SHA-256 authentication successful");
        Ok(())
    }

    /// Run a query and collect its result.
    ///
    /// Without parameters the simple query protocol is used, so `sql` may
    /// hold several statements. With parameters the statement goes through
    /// the unnamed prepared statement, all values in text format.
    ///
    /// A server error leaves the connection idle and usable. Any other
    /// failure mid-exchange marks it broken.
    pub async fn query(&mut self, sql: &str, params: &[Option<String>]) -> Result<QueryOutcome> {
        self.state.ensure_idle()?;
        let request = encode_request(sql, params)?;

        let started = Instant::now();
        self.state.transition(ConnectionState::QueryInProgress)?;
        let result = self.exchange(&request).await;
        if result.is_err() && self.state != ConnectionState::Idle {
            let _ = self.state.transition(ConnectionState::Broken);
        }
        histograms::query_duration(started.elapsed());
        result
    }

    /// Round-trip `SELECT 1`
    pub async fn ping(&mut self) -> Result<()> {
        self.query("SELECT 1", &[]).await.map(|_| ())
    }

    async fn exchange(&mut self, request: &[u8]) -> Result<QueryOutcome> {
        let transport = self.transport_mut()?;
        transport.write_all(request).await?;
        transport.flush().await?;
        self.state.transition(ConnectionState::ReadingResults)?;

        let mut current = QueryOutcome::default();
        let mut last = None;
        let mut error: Option<ErrorFields> = None;

        loop {
            match self.receive_message().await? {
                BackendMessage::RowDescription(columns) => {
                    current = QueryOutcome {
                        columns,
                        ..Default::default()
                    };
                }
                BackendMessage::DataRow(values) => current.rows.push(values),
                BackendMessage::CommandComplete(tag) => {
                    current.command_tag = Some(tag);
                    last = Some(std::mem::take(&mut current));
                }
                BackendMessage::EmptyQueryResponse => last = Some(QueryOutcome::default()),
                BackendMessage::ErrorResponse(fields) => {
                    if is_fatal(&fields) {
                        // the backend exits without a ReadyForQuery
                        return Err(Error::Server(fields.into()));
                    }
                    error.get_or_insert(fields);
                }
                BackendMessage::ReadyForQuery { .. } => {
                    self.state.transition(ConnectionState::Idle)?;
                    break;
                }
                BackendMessage::ParseComplete
                | BackendMessage::BindComplete
                | BackendMessage::NoData
                | BackendMessage::CloseComplete
                | BackendMessage::PortalSuspended
                | BackendMessage::ParameterDescription(_) => {}
                BackendMessage::NoticeResponse(notice) => {
                    tracing::debug!(%notice, "server notice");
                }
                BackendMessage::ParameterStatus { name, value } => {
                    tracing::trace!("parameter status: {} = {}", name, value);
                }
                BackendMessage::NotificationResponse { channel, .. } => {
                    tracing::debug!(%channel, "ignoring asynchronous notification");
                }
                other => {
                    return Err(Error::Protocol(format!(
                        "unexpected message during query: {:?}",
                        other
                    )));
                }
            }
        }

        match error {
            Some(fields) => Err(Error::Server(fields.into())),
            None => Ok(last.unwrap_or_default()),
        }
    }

    /// Send a frontend message
    async fn send_message(&mut self, msg: &FrontendMessage) -> Result<()> {
        let buf = encode(msg)?;
        let transport = self.transport_mut()?;
        transport.write_all(&buf).await?;
        transport.flush().await?;
        Ok(())
    }

    /// Receive a backend message
    async fn receive_message(&mut self) -> Result<BackendMessage> {
        loop {
            match decode_message(&mut self.read_buf) {
                Ok((msg, consumed)) => {
                    self.read_buf.advance(consumed);
                    return Ok(msg);
                }
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {}
                Err(e) => return Err(Error::Protocol(e.to_string())),
            }

            let transport = self.transport.as_mut().ok_or(Error::ConnectionClosed)?;
            let n = transport.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
        }
    }

    /// Send Terminate and shut the socket down
    pub async fn close(mut self) -> Result<()> {
        self.state.transition(ConnectionState::Closed)?;
        let _ = self.send_message(&FrontendMessage::Terminate).await;
        if let Some(transport) = self.transport.as_mut() {
            transport.shutdown().await?;
        }
        Ok(())
    }
}

fn is_fatal(fields: &ErrorFields) -> bool {
    matches!(fields.severity.as_deref(), Some("FATAL") | Some("PANIC"))
}

fn encode(msg: &FrontendMessage) -> Result<BytesMut> {
    encode_message(msg).map_err(|e| Error::InvalidInput(e.to_string()))
}

fn encode_request(sql: &str, params: &[Option<String>]) -> Result<BytesMut> {
    if params.is_empty() {
        return encode(&FrontendMessage::Query(sql.to_string()));
    }

    let mut buf = encode(&FrontendMessage::Parse {
        query: sql.to_string(),
    })?;
    for msg in [
        FrontendMessage::Bind {
            params: params.to_vec(),
        },
        FrontendMessage::DescribePortal,
        FrontendMessage::Execute,
        FrontendMessage::Sync,
    ] {
        buf.extend_from_slice(&encode(&msg)?);
    }
    Ok(buf)
}
