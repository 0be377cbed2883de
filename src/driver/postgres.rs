//! PostgreSQL implementation of the transport contract

use super::{
    Column, ConnectParams, Connector, DriverConnection, DriverError, Endpoint, ErrorKind, Param,
    QueryResult, Row, TlsParams,
};
use crate::connection::{Connection, ConnectionConfig, QueryOutcome, TlsConfig, Transport};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::Instrument;

/// Opens native protocol connections
#[derive(Debug, Clone, Copy, Default)]
pub struct PgConnector;

impl PgConnector {
    /// Create a connector
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for PgConnector {
    type Connection = PgConnection;

    async fn open(&self, params: &ConnectParams) -> std::result::Result<PgConnection, DriverError> {
        let span = tracing::debug_span!(
            "open",
            endpoint = %params.endpoint,
            user = %params.user,
            sslmode = %params.tls.mode
        );
        match tokio::time::timeout(params.connect_timeout, establish(params))
            .instrument(span)
            .await
        {
            Ok(Ok(conn)) => Ok(PgConnection { conn }),
            Ok(Err(e)) => Err(open_error(e)),
            Err(_) => Err(open_error(Error::Timeout(params.connect_timeout))),
        }
    }
}

/// Every failure while opening is a connection failure, except settings
/// that could never work.
fn open_error(err: Error) -> DriverError {
    let kind = match err.kind() {
        ErrorKind::Configuration => ErrorKind::Configuration,
        _ => ErrorKind::Operational,
    };
    DriverError::new(kind, err.to_string())
}

async fn establish(params: &ConnectParams) -> Result<Connection> {
    let config = connection_config(params);

    match &params.endpoint {
        Endpoint::Tcp { host, port } => {
            let tls = if params.tls.mode.attempts_tls() {
                Some(tls_config(&params.tls)?)
            } else {
                None
            };
            let transport = Transport::connect_tcp(host, *port).await?;
            let mut conn = Connection::new(transport);
            conn.startup(&config, tls.as_ref(), Some(host.as_str())).await?;
            Ok(conn)
        }
        Endpoint::Unix(path) => {
            if !params.tls.mode.allows_plaintext() {
                return Err(Error::Config(format!(
                    "sslmode={} cannot be used over a Unix socket",
                    params.tls.mode
                )));
            }
            let transport = Transport::connect_unix(path).await?;
            let mut conn = Connection::new(transport);
            conn.startup(&config, None, None).await?;
            Ok(conn)
        }
    }
}

fn connection_config(params: &ConnectParams) -> ConnectionConfig {
    let mut builder = ConnectionConfig::builder(params.user.clone())
        .application_name(params.application_name.clone());
    if let Some(password) = &params.password {
        builder = builder.password(password.clone());
    }
    if let Some(database) = &params.database {
        builder = builder.database(database.clone());
    }
    builder.build()
}

fn tls_config(tls: &TlsParams) -> Result<TlsConfig> {
    let mut builder = TlsConfig::builder(tls.mode);
    if let Some(path) = &tls.root_cert {
        builder = builder.ca_cert_path(path.clone());
    }
    if let Some(path) = &tls.cert {
        builder = builder.client_cert_path(path.clone());
    }
    if let Some(path) = &tls.key {
        builder = builder.client_key_path(path.clone());
    }
    builder.build()
}

/// Open native protocol connection
#[derive(Debug)]
pub struct PgConnection {
    conn: Connection,
}

#[async_trait]
impl DriverConnection for PgConnection {
    async fn set_autocommit(&mut self, enabled: bool) -> std::result::Result<(), DriverError> {
        // every statement runs in its own implicit transaction
        if enabled {
            Ok(())
        } else {
            Err(DriverError::new(
                ErrorKind::NotSupported,
                "explicit transaction mode is not supported",
            ))
        }
    }

    async fn execute(
        &mut self,
        sql: &str,
        params: &[Param],
    ) -> std::result::Result<QueryResult, DriverError> {
        let text: Vec<Option<String>> = params.iter().map(Param::to_text).collect();
        let outcome = self.conn.query(sql, &text).await?;
        Ok(into_result(outcome))
    }

    async fn ping(&mut self) -> std::result::Result<(), DriverError> {
        Ok(self.conn.ping().await?)
    }

    async fn backend_id(&mut self) -> std::result::Result<Option<i64>, DriverError> {
        let outcome = self.conn.query("SELECT pg_backend_pid()", &[]).await?;
        let from_query = into_result(outcome)
            .rows
            .first()
            .and_then(|row| row.get_as::<i64>("pg_backend_pid"));
        Ok(from_query.or_else(|| self.conn.process_id().map(i64::from)))
    }

    async fn close(self) -> std::result::Result<(), DriverError> {
        Ok(self.conn.close().await?)
    }
}

fn into_result(outcome: QueryOutcome) -> QueryResult {
    let rows_affected = outcome.rows_affected();
    let columns: Vec<Column> = outcome
        .columns
        .iter()
        .map(|field| Column::new(field.name.clone(), field.type_oid))
        .collect();
    let shared: Arc<[Column]> = columns.clone().into();
    let rows = outcome
        .rows
        .into_iter()
        .map(|values| {
            let values = values
                .into_iter()
                .map(|v| v.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
                .collect();
            Row::new(shared.clone(), values)
        })
        .collect();
    QueryResult {
        columns,
        rows,
        rows_affected,
    }
}
