//! Resilient session over one PostgreSQL connection
//!
//! A [`Session`] owns at most one driver connection and hides transient
//! link failures from its caller: connection-class errors are retried with
//! exponential backoff and a fresh connection, everything else surfaces as
//! [`Error::Manual`] carrying the server's raw message.
//!
//! ```ignore
//! let config = SessionConfig::from_url("postgres://monitor@db.internal/postgres")?;
//! let session = Session::start(PgConnector::new(), config, Arc::new(TracingNotifier)).await?;
//!
//! session.execute("SELECT pid, state FROM pg_stat_activity", &[]).await?;
//! for row in session.fetch_all().await {
//!     println!("{:?}", row.get("state"));
//! }
//! ```

mod cursor;
mod notifier;
mod policy;

pub use notifier::{Notifier, Severity, TracingNotifier};
pub use policy::{RetryPolicy, DAEMON_MAX_RETRIES, INTERACTIVE_MAX_RETRIES};

use crate::config::SessionConfig;
use crate::driver::{Column, Connector, DriverConnection, DriverError, ErrorKind, Param, Row};
use crate::metrics::{counters, histograms, labels};
use crate::{Error, Result};
use cursor::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn, Instrument};

/// Marker prepended to every statement sent by [`Session::execute`]
pub const QUERY_MARKER: &str = "/* Dolphie */ ";

const BUSY_MESSAGE: &str = "Another query is already running, please repeat action";
const BUSY_TITLE: &str = "Unable to run multiple queries at the same time";
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

struct SessionState<H> {
    handle: Option<H>,
    cursor: Option<Cursor>,
}

/// Holds the in-flight flag for the duration of one `execute` call
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Session over a single database connection.
///
/// All methods take `&self`; a second `execute` issued while one is running
/// is refused immediately (one notification, `Ok(None)`) rather than queued.
pub struct Session<C: Connector> {
    connector: C,
    config: SessionConfig,
    policy: RetryPolicy,
    notifier: Arc<dyn Notifier>,
    state: Mutex<SessionState<C::Connection>>,
    connected: AtomicBool,
    ever_connected: AtomicBool,
    query_in_flight: AtomicBool,
    backend_id: std::sync::Mutex<Option<i64>>,
}

impl<C: Connector> std::fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("policy", &self.policy)
            .field("connected", &self.is_marked_connected())
            .field("ever_connected", &self.has_ever_connected())
            .field("query_in_flight", &self.is_query_in_flight())
            .field("backend_id", &self.backend_id())
            .finish()
    }
}

impl<C: Connector> Session<C> {
    /// Create a disconnected session. The retry policy follows
    /// `config.daemon_mode`.
    pub fn new(connector: C, config: SessionConfig, notifier: Arc<dyn Notifier>) -> Self {
        let policy = config.retry_policy();
        Self {
            connector,
            config,
            policy,
            notifier,
            state: Mutex::new(SessionState {
                handle: None,
                cursor: None,
            }),
            connected: AtomicBool::new(false),
            ever_connected: AtomicBool::new(false),
            query_in_flight: AtomicBool::new(false),
            backend_id: std::sync::Mutex::new(None),
        }
    }

    /// Replace the retry policy
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Create a session and connect it when `config.auto_connect` is set.
    pub async fn start(
        connector: C,
        config: SessionConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let session = Self::new(connector, config, notifier);
        if session.config.auto_connect {
            session.connect().await?;
        }
        Ok(session)
    }

    /// Session configuration
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Retry policy in effect
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Server process id captured at the last successful connect
    pub fn backend_id(&self) -> Option<i64> {
        *self
            .backend_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the last connect succeeded and the session was not closed
    /// since. Use [`Session::is_connected`] to probe the server.
    pub fn is_marked_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Whether any connect ever succeeded
    pub fn has_ever_connected(&self) -> bool {
        self.ever_connected.load(Ordering::Acquire)
    }

    /// Whether an `execute` call is currently running
    pub fn is_query_in_flight(&self) -> bool {
        self.query_in_flight.load(Ordering::Acquire)
    }

    fn set_backend_id(&self, id: Option<i64>) {
        *self
            .backend_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = id;
    }

    /// Open a fresh connection, replacing any current one.
    ///
    /// Connection-class failures are retried with the policy's backoff until
    /// the retry budget is spent; any other failure is returned at once.
    /// Either way the error is logged and returned as [`Error::Connection`].
    pub async fn connect(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.release(&mut state).await;

        let mut attempt: u32 = 0;
        loop {
            match self.open(&mut state, false).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_connection_error() && attempt < self.policy.max_retries => {
                    let delay = self.policy.backoff(attempt);
                    warn!(
                        attempt = attempt + 1,
                        delay_secs = delay.as_secs_f64(),
                        error = %err,
                        "PostgreSQL connection attempt failed, retrying"
                    );
                    histograms::backoff(delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(connect_failed(err)),
            }
        }
    }

    async fn open(
        &self,
        state: &mut SessionState<C::Connection>,
        reconnect: bool,
    ) -> std::result::Result<(), DriverError> {
        let params = self.config.connect_params();
        let mut handle = match self.connector.open(&params).await {
            Ok(handle) => handle,
            Err(err) => {
                counters::connect_attempt(labels::OUTCOME_ERROR, reconnect);
                return Err(err);
            }
        };

        let backend_id = match self.prepare(&mut handle).await {
            Ok(id) => id,
            Err(err) => {
                if let Err(close_err) = handle.close().await {
                    debug!(error = %close_err, "failed to close half-open connection");
                }
                counters::connect_attempt(labels::OUTCOME_ERROR, reconnect);
                return Err(err);
            }
        };

        state.handle = Some(handle);
        self.set_backend_id(backend_id);
        self.connected.store(true, Ordering::Release);
        self.ever_connected.store(true, Ordering::Release);
        counters::connect_attempt(labels::OUTCOME_OK, reconnect);

        match (reconnect, backend_id) {
            (false, Some(id)) => info!("Connected to PostgreSQL with Process ID {}", id),
            (false, None) => info!(endpoint = %params.endpoint, "Connected to PostgreSQL"),
            (true, _) => debug!(backend_id = ?backend_id, "reconnected to PostgreSQL"),
        }
        Ok(())
    }

    async fn prepare(
        &self,
        handle: &mut C::Connection,
    ) -> std::result::Result<Option<i64>, DriverError> {
        handle.set_autocommit(true).await?;
        if self.config.persist_backend_id {
            handle.backend_id().await
        } else {
            Ok(None)
        }
    }

    /// One open attempt that never raises; the failure is handed back so the
    /// next attempt can report it.
    async fn reconnect(&self, state: &mut SessionState<C::Connection>) -> Option<DriverError> {
        match self.open(state, true).await {
            Ok(()) => None,
            Err(err) => {
                debug!(error = %err, "reconnect attempt failed");
                Some(err)
            }
        }
    }

    async fn release(&self, state: &mut SessionState<C::Connection>) {
        state.cursor = None;
        self.connected.store(false, Ordering::Release);
        self.set_backend_id(None);
        if let Some(handle) = state.handle.take() {
            if let Err(err) = handle.close().await {
                debug!(error = %err, "ignoring error while closing connection");
            }
        }
    }

    /// Run a statement and keep its rows for [`Session::fetch_all`] and
    /// [`Session::fetch_one`].
    ///
    /// Returns the affected-row count. `Ok(None)` covers a statement that
    /// reports no count, a disconnected session (nothing is sent), and a
    /// refusal because another query is running.
    ///
    /// # Errors
    ///
    /// [`Error::Manual`] with the server message for a query failure, or for
    /// a connection failure once the retry budget is spent.
    /// [`Error::Connection`] when an unusable connection cannot be replaced.
    pub async fn execute(&self, query: &str, params: &[Param]) -> Result<Option<u64>> {
        self.run(query, params, false)
            .instrument(tracing::debug_span!("execute"))
            .await
    }

    /// Like [`Session::execute`], but any query failure yields `Ok(None)`
    /// without a retry.
    pub async fn execute_ignore_errors(&self, query: &str, params: &[Param]) -> Result<Option<u64>> {
        self.run(query, params, true)
            .instrument(tracing::debug_span!("execute", ignore_errors = true))
            .await
    }

    async fn run(&self, query: &str, params: &[Param], ignore_errors: bool) -> Result<Option<u64>> {
        if !self.is_marked_connected() {
            debug!("not connected, query skipped");
            counters::query_completed(labels::OUTCOME_DISCONNECTED);
            return Ok(None);
        }

        let Some(_guard) = InFlightGuard::acquire(&self.query_in_flight) else {
            self.notifier
                .notify(BUSY_MESSAGE, BUSY_TITLE, Severity::Error, BUSY_TIMEOUT);
            counters::query_rejected();
            return Ok(None);
        };

        let sql = format!("{}{}", QUERY_MARKER, query);
        let max_retries = u64::from(self.policy.max_retries);
        let mut state = self.state.lock().await;
        let mut attempt: u64 = 0;
        let mut reconnect_error: Option<DriverError> = None;

        while attempt <= max_retries {
            state.cursor = None;
            // no handle means the previous quiet reconnect failed; that counts
            // as this attempt failing with the reconnect's error
            let outcome = match state.handle.as_mut() {
                Some(handle) => handle.execute(&sql, params).await,
                None => Err(match reconnect_error.take() {
                    Some(err) if err.kind == ErrorKind::HandleInvalid => {
                        DriverError::new(ErrorKind::Operational, err.message)
                    }
                    Some(err) => err,
                    None => DriverError::new(ErrorKind::Operational, "connection is not open"),
                }),
            };

            let err = match outcome {
                Ok(result) => {
                    let affected = result.rows_affected;
                    state.cursor = Some(Cursor::from(result));
                    counters::query_completed(labels::OUTCOME_OK);
                    return Ok(affected);
                }
                Err(err) => err,
            };

            if err.kind == ErrorKind::HandleInvalid {
                warn!(error = %err, "connection handle is unusable, reconnecting");
                counters::reconnect(labels::REASON_HANDLE_INVALID);
                self.release(&mut state).await;
                if let Err(err) = self.open(&mut state, false).await {
                    counters::query_completed(labels::OUTCOME_ERROR);
                    return Err(connect_failed(err));
                }
                tokio::time::sleep(self.policy.reconnect_pause()).await;
                if self.policy.count_handle_invalidation {
                    attempt += 1;
                }
                continue;
            }

            if ignore_errors {
                debug!(error = %err, "query error ignored");
                counters::query_completed(labels::OUTCOME_IGNORED);
                return Ok(None);
            }

            let eligible =
                err.is_connection_error() || (self.config.daemon_mode && self.has_ever_connected());
            if !eligible || attempt >= max_retries {
                counters::query_completed(labels::OUTCOME_ERROR);
                return Err(Error::Manual(err.message));
            }

            error!(
                "PostgreSQL connection error (attempt {}): {}",
                attempt + 1,
                err.message
            );
            let delay = self
                .policy
                .backoff(u32::try_from(attempt).unwrap_or(u32::MAX));
            histograms::backoff(delay);
            tokio::time::sleep(delay).await;

            self.release(&mut state).await;
            reconnect_error = self.reconnect(&mut state).await;
            counters::reconnect(labels::REASON_CONNECTION_ERROR);
            attempt += 1;
        }

        Ok(None)
    }

    /// Remaining rows of the last result; empty without one.
    pub async fn fetch_all(&self) -> Vec<Row> {
        let mut state = self.state.lock().await;
        state
            .cursor
            .as_mut()
            .map(Cursor::fetch_all)
            .unwrap_or_default()
    }

    /// Next row of the last result
    pub async fn fetch_one(&self) -> Option<Row> {
        let mut state = self.state.lock().await;
        state.cursor.as_mut().and_then(Cursor::fetch_one)
    }

    /// Columns of the last result
    pub async fn columns(&self) -> Vec<Column> {
        let state = self.state.lock().await;
        state
            .cursor
            .as_ref()
            .map(|cursor| cursor.columns().to_vec())
            .unwrap_or_default()
    }

    /// Probe the server with a trivial query.
    ///
    /// Never touches the current result or the session flags; any failure
    /// reads as `false`.
    pub async fn is_connected(&self) -> bool {
        let mut state = self.state.lock().await;
        match state.handle.as_mut() {
            Some(handle) => match handle.ping().await {
                Ok(()) => true,
                Err(err) => {
                    debug!(error = %err, "connection probe failed");
                    false
                }
            },
            None => false,
        }
    }

    /// Drop the connection and the current result. Never fails and may be
    /// called repeatedly; the session can connect again afterwards.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        self.release(&mut state).await;
        debug!("session closed");
    }
}

fn connect_failed(err: DriverError) -> Error {
    error!("PostgreSQL connection error: {}", err.message);
    Error::Connection(err.message)
}
