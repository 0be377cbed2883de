//! Scripted driver and notifier shared by the session tests

#![allow(dead_code)]

use async_trait::async_trait;
use dolphie_pg::{
    Column, ConnectParams, Connector, DriverConnection, DriverError, ErrorKind, Notifier, Param,
    QueryResult, SessionConfig, Severity,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// First process id handed out by the mock server
pub const FIRST_PID: i64 = 4242;

/// What the mock driver saw and what it will answer next
#[derive(Debug, Default)]
pub struct Script {
    /// Outcomes of upcoming `open` calls; empty means success
    pub opens: VecDeque<Result<(), DriverError>>,
    /// Outcomes of upcoming `execute` calls; empty means an empty command result
    pub executes: VecDeque<Result<QueryResult, DriverError>>,
    /// Outcomes of upcoming `ping` calls; empty means success
    pub pings: VecDeque<Result<(), DriverError>>,
    /// Outcome of every `set_autocommit` call
    pub autocommit_error: Option<DriverError>,
    /// Make every `close` fail
    pub close_fails: bool,
    /// Delay inside `execute`
    pub execute_delay: Option<Duration>,

    /// Number of `open` calls
    pub open_calls: usize,
    /// SQL text of every `execute` call
    pub executed: Vec<String>,
    /// Number of `ping` calls
    pub ping_calls: usize,
    /// Number of `close` calls
    pub close_calls: usize,
    /// Arguments of `set_autocommit` calls
    pub autocommit_calls: Vec<bool>,
    /// Parameters the last `open` received
    pub last_params: Option<ConnectParams>,
    next_pid: i64,
}

/// Connector whose behaviour is driven by a shared [`Script`]
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    script: Arc<Mutex<Script>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }

    pub fn fail_opens(&self, n: usize, kind: ErrorKind, message: &str) {
        let mut script = self.script();
        for _ in 0..n {
            script.opens.push_back(Err(DriverError::new(kind, message)));
        }
    }

    pub fn succeed_open(&self) {
        self.script().opens.push_back(Ok(()));
    }

    pub fn fail_executes(&self, n: usize, kind: ErrorKind, message: &str) {
        let mut script = self.script();
        for _ in 0..n {
            script
                .executes
                .push_back(Err(DriverError::new(kind, message)));
        }
    }

    pub fn push_result(&self, result: QueryResult) {
        self.script().executes.push_back(Ok(result));
    }

    pub fn open_calls(&self) -> usize {
        self.script().open_calls
    }

    pub fn executed(&self) -> Vec<String> {
        self.script().executed.clone()
    }

    pub fn close_calls(&self) -> usize {
        self.script().close_calls
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Connection = MockConnection;

    async fn open(&self, params: &ConnectParams) -> Result<MockConnection, DriverError> {
        let mut script = self.script();
        script.open_calls += 1;
        script.last_params = Some(params.clone());
        script.opens.pop_front().unwrap_or(Ok(()))?;
        let pid = FIRST_PID + script.next_pid;
        script.next_pid += 1;
        Ok(MockConnection {
            script: self.script.clone(),
            pid,
        })
    }
}

/// Handle produced by [`MockConnector`]
#[derive(Debug)]
pub struct MockConnection {
    script: Arc<Mutex<Script>>,
    pid: i64,
}

#[async_trait]
impl DriverConnection for MockConnection {
    async fn set_autocommit(&mut self, enabled: bool) -> Result<(), DriverError> {
        let mut script = self.script.lock().unwrap();
        script.autocommit_calls.push(enabled);
        match &script.autocommit_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn execute(&mut self, sql: &str, _params: &[Param]) -> Result<QueryResult, DriverError> {
        let delay = self.script.lock().unwrap().execute_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut script = self.script.lock().unwrap();
        script.executed.push(sql.to_string());
        script
            .executes
            .pop_front()
            .unwrap_or_else(|| Ok(QueryResult::command(None)))
    }

    async fn ping(&mut self) -> Result<(), DriverError> {
        let mut script = self.script.lock().unwrap();
        script.ping_calls += 1;
        script.pings.pop_front().unwrap_or(Ok(()))
    }

    async fn backend_id(&mut self) -> Result<Option<i64>, DriverError> {
        Ok(Some(self.pid))
    }

    async fn close(self) -> Result<(), DriverError> {
        let mut script = self.script.lock().unwrap();
        script.close_calls += 1;
        if script.close_fails {
            Err(DriverError::new(ErrorKind::Interface, "connection already closed"))
        } else {
            Ok(())
        }
    }
}

/// One notification as received
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub message: String,
    pub title: String,
    pub severity: Severity,
    pub timeout: Duration,
}

/// Notifier that keeps everything it is given
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    received: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn received(&self) -> Vec<Notification> {
        self.received.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, message: &str, title: &str, severity: Severity, timeout: Duration) {
        self.received.lock().unwrap().push(Notification {
            message: message.to_string(),
            title: title.to_string(),
            severity,
            timeout,
        });
    }
}

/// Interactive config that does not connect on its own
pub fn config() -> SessionConfig {
    SessionConfig::builder()
        .host("db.test")
        .user("monitor")
        .password("secret")
        .auto_connect(false)
        .build()
}

/// Result set with one text column `n` holding the given values
pub fn numbers(values: &[i32]) -> QueryResult {
    QueryResult::rows(
        vec![Column::new("n", 23)],
        values.iter().map(|v| vec![Some(v.to_string())]),
    )
}
