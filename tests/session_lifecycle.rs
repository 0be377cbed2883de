//! Connect, query, fetch and close against a scripted driver

mod common;

use common::{config, numbers, MockConnector, RecordingNotifier, FIRST_PID};
use dolphie_pg::{
    DriverError, Endpoint, Error, ErrorKind, Param, QueryResult, Session, SessionConfig, Severity,
    TlsOptions, QUERY_MARKER,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

fn session(connector: &MockConnector, config: SessionConfig) -> Session<MockConnector> {
    Session::new(connector.clone(), config, Arc::new(RecordingNotifier::default()))
}

#[tokio::test]
async fn test_start_connects_when_auto_connect() {
    let connector = MockConnector::new();
    let config = SessionConfig::builder().user("monitor").build();
    let session = Session::start(
        connector.clone(),
        config,
        Arc::new(RecordingNotifier::default()),
    )
    .await
    .unwrap();

    assert!(session.is_marked_connected());
    assert!(session.has_ever_connected());
    assert_eq!(session.backend_id(), Some(FIRST_PID));
    assert_eq!(connector.open_calls(), 1);
    assert_eq!(connector.script().autocommit_calls, vec![true]);
}

#[tokio::test]
async fn test_start_without_auto_connect_stays_disconnected() {
    let connector = MockConnector::new();
    let session = Session::start(
        connector.clone(),
        config(),
        Arc::new(RecordingNotifier::default()),
    )
    .await
    .unwrap();

    assert!(!session.is_marked_connected());
    assert!(!session.has_ever_connected());
    assert_eq!(session.backend_id(), None);
    assert_eq!(connector.open_calls(), 0);
}

#[tokio::test]
async fn test_connect_forwards_endpoint_and_tls() {
    let connector = MockConnector::new();
    let mut config = config();
    config.database = Some("postgres".into());
    config.tls = Some(TlsOptions {
        ssl_ca: Some("/etc/ssl/ca.pem".into()),
        ..Default::default()
    });
    let session = session(&connector, config);
    session.connect().await.unwrap();

    let params = connector.script().last_params.clone().unwrap();
    assert_eq!(
        params.endpoint,
        Endpoint::Tcp {
            host: "db.test".into(),
            port: 5432
        }
    );
    assert_eq!(params.application_name, "Dolphie");
    assert_eq!(params.database.as_deref(), Some("postgres"));
    assert_eq!(params.connect_timeout, Duration::from_secs(5));
    assert_eq!(params.tls.mode.to_string(), "prefer");
    assert_eq!(params.tls.root_cert, Some("/etc/ssl/ca.pem".into()));
}

#[tokio::test]
async fn test_connect_skips_backend_id_when_not_persisted() {
    let connector = MockConnector::new();
    let mut config = config();
    config.persist_backend_id = false;
    let session = session(&connector, config);
    session.connect().await.unwrap();

    assert!(session.is_marked_connected());
    assert_eq!(session.backend_id(), None);
}

#[tokio::test]
async fn test_connect_non_connection_error_fails_first_attempt() {
    let connector = MockConnector::new();
    connector.fail_opens(1, ErrorKind::Configuration, "could not read root certificate");
    let session = session(&connector, config());

    let err = assert_err!(session.connect().await);
    assert!(matches!(err, Error::Connection(_)));
    assert_eq!(err.to_string(), "could not read root certificate");
    assert_eq!(connector.open_calls(), 1);
    assert!(!session.is_marked_connected());
    assert!(!session.has_ever_connected());
}

#[tokio::test]
async fn test_connect_setup_failure_closes_new_handle() {
    let connector = MockConnector::new();
    connector.script().autocommit_error =
        Some(DriverError::new(ErrorKind::NotSupported, "autocommit unavailable"));
    let session = session(&connector, config());

    let err = session.connect().await.unwrap_err();
    assert_eq!(err.to_string(), "autocommit unavailable");
    assert_eq!(connector.close_calls(), 1);
    assert!(!session.is_marked_connected());
    assert_eq!(session.backend_id(), None);
}

#[tokio::test]
async fn test_execute_when_disconnected_sends_nothing() {
    let connector = MockConnector::new();
    let session = session(&connector, config());

    let affected = session.execute("SELECT 1", &[]).await.unwrap();
    assert_eq!(affected, None);
    assert!(connector.executed().is_empty());
    assert_eq!(connector.open_calls(), 0);
}

#[tokio::test]
async fn test_execute_prefixes_marker_and_returns_count() {
    let connector = MockConnector::new();
    connector.push_result(QueryResult::command(Some(3)));
    let session = session(&connector, config());
    session.connect().await.unwrap();

    let affected = session
        .execute("UPDATE t SET a = $1", &[Param::from(1)])
        .await
        .unwrap();
    assert_eq!(affected, Some(3));
    assert_eq!(
        connector.executed(),
        vec![format!("{}UPDATE t SET a = $1", QUERY_MARKER)]
    );
    assert!(connector.executed()[0].starts_with("/* Dolphie */ "));
    assert!(!session.is_query_in_flight());
}

#[tokio::test]
async fn test_fetch_after_execute() {
    let connector = MockConnector::new();
    connector.push_result(numbers(&[1, 2, 3]));
    let session = session(&connector, config());
    session.connect().await.unwrap();

    assert_eq!(session.execute("SELECT n", &[]).await.unwrap(), Some(3));
    assert_eq!(session.columns().await[0].name, "n");

    let first = session.fetch_one().await.unwrap();
    assert_eq!(first.get_as::<i32>("n"), Some(1));

    let rest: Vec<i32> = session
        .fetch_all()
        .await
        .iter()
        .filter_map(|row| row.get_as("n"))
        .collect();
    assert_eq!(rest, [2, 3]);

    assert!(session.fetch_one().await.is_none());
    assert!(session.fetch_all().await.is_empty());
}

#[tokio::test]
async fn test_fetch_without_cursor() {
    let connector = MockConnector::new();
    let session = session(&connector, config());

    assert!(session.fetch_one().await.is_none());
    assert!(session.fetch_all().await.is_empty());
    assert!(session.columns().await.is_empty());
}

#[tokio::test]
async fn test_failed_execute_clears_previous_rows() {
    let connector = MockConnector::new();
    connector.push_result(numbers(&[7]));
    connector.fail_executes(1, ErrorKind::Programming, "syntax error at or near \"SELEC\"");
    let session = session(&connector, config());
    session.connect().await.unwrap();

    session.execute("SELECT n", &[]).await.unwrap();
    let err = session.execute("SELEC n", &[]).await.unwrap_err();
    assert!(matches!(err, Error::Manual(_)));
    assert!(session.fetch_all().await.is_empty());
}

#[tokio::test]
async fn test_non_connection_error_is_raised_without_retry() {
    let connector = MockConnector::new();
    connector.fail_executes(1, ErrorKind::Programming, "relation \"nope\" does not exist");
    let session = session(&connector, config());
    session.connect().await.unwrap();

    let err = session.execute("SELECT * FROM nope", &[]).await.unwrap_err();
    assert!(matches!(err, Error::Manual(_)));
    assert_eq!(err.to_string(), "relation \"nope\" does not exist");
    assert_eq!(connector.executed().len(), 1);
    assert_eq!(connector.open_calls(), 1);
    assert!(session.is_marked_connected());
}

#[tokio::test]
async fn test_ignore_errors_returns_none_without_retry() {
    let connector = MockConnector::new();
    connector.fail_executes(1, ErrorKind::Operational, "server closed the connection unexpectedly");
    let session = session(&connector, config());
    session.connect().await.unwrap();

    let affected = session
        .execute_ignore_errors("SELECT pg_reload_conf()", &[])
        .await
        .unwrap();
    assert_eq!(affected, None);
    assert_eq!(connector.executed().len(), 1);
    assert_eq!(connector.open_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_execute_is_rejected_once() {
    let connector = MockConnector::new();
    connector.script().execute_delay = Some(Duration::from_millis(50));
    connector.push_result(QueryResult::command(Some(1)));
    let notifier = Arc::new(RecordingNotifier::default());
    let session = Session::new(connector.clone(), config(), notifier.clone());
    session.connect().await.unwrap();

    let (first, second) = tokio::join!(
        session.execute("SELECT pg_sleep(1)", &[]),
        session.execute("SELECT 1", &[]),
    );
    assert_eq!(first.unwrap(), Some(1));
    assert_eq!(second.unwrap(), None);
    assert_eq!(connector.executed().len(), 1);

    let received = notifier.received();
    assert_eq!(received.len(), 1);
    assert_eq!(
        received[0].message,
        "Another query is already running, please repeat action"
    );
    assert_eq!(
        received[0].title,
        "Unable to run multiple queries at the same time"
    );
    assert_eq!(received[0].severity, Severity::Error);
    assert_eq!(received[0].timeout, Duration::from_secs(10));
    assert!(!session.is_query_in_flight());
}

#[tokio::test(start_paused = true)]
async fn test_dropped_execute_releases_in_flight_flag() {
    let connector = MockConnector::new();
    connector.script().execute_delay = Some(Duration::from_secs(30));
    let session = session(&connector, config());
    session.connect().await.unwrap();

    let timed_out =
        tokio::time::timeout(Duration::from_secs(1), session.execute("SELECT 1", &[])).await;
    assert!(timed_out.is_err());
    assert!(!session.is_query_in_flight());
}

#[tokio::test]
async fn test_is_connected_probes_without_side_effects() {
    let connector = MockConnector::new();
    connector.push_result(numbers(&[5]));
    let session = session(&connector, config());

    assert!(!session.is_connected().await);
    session.connect().await.unwrap();
    session.execute("SELECT n", &[]).await.unwrap();

    assert!(session.is_connected().await);
    assert!(session.is_connected().await);

    connector
        .script()
        .pings
        .push_back(Err(DriverError::new(ErrorKind::Operational, "connection reset")));
    assert!(!session.is_connected().await);
    assert!(session.is_marked_connected());
    assert_eq!(session.fetch_one().await.and_then(|r| r.get_as::<i32>("n")), Some(5));
    assert_eq!(connector.script().ping_calls, 3);
}

#[tokio::test]
async fn test_close_is_idempotent_and_never_fails() {
    let connector = MockConnector::new();
    connector.script().close_fails = true;
    connector.push_result(numbers(&[1]));
    let session = session(&connector, config());
    session.connect().await.unwrap();
    session.execute("SELECT n", &[]).await.unwrap();

    session.close().await;
    session.close().await;

    assert_eq!(connector.close_calls(), 1);
    assert!(!session.is_marked_connected());
    assert!(session.has_ever_connected());
    assert_eq!(session.backend_id(), None);
    assert!(session.fetch_one().await.is_none());
    assert!(!session.is_connected().await);
    assert_eq!(session.execute("SELECT 1", &[]).await.unwrap(), None);
}

#[tokio::test]
async fn test_session_reconnects_after_close() {
    let connector = MockConnector::new();
    let session = session(&connector, config());
    assert_ok!(session.connect().await);
    session.close().await;
    assert_ok!(session.connect().await);

    assert!(session.is_marked_connected());
    assert_eq!(session.backend_id(), Some(FIRST_PID + 1));
    assert_eq!(connector.open_calls(), 2);
}

#[tokio::test]
async fn test_connect_replaces_existing_handle() {
    let connector = MockConnector::new();
    let session = session(&connector, config());
    session.connect().await.unwrap();
    session.connect().await.unwrap();

    assert_eq!(connector.open_calls(), 2);
    assert_eq!(connector.close_calls(), 1);
    assert_eq!(session.backend_id(), Some(FIRST_PID + 1));
}
