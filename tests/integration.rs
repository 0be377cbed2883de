//! Integration tests for dolphie-pg
//!
//! These tests require a running Postgres instance. Point them at it with
//! `POSTGRES_HOST`, `POSTGRES_PORT`, `POSTGRES_USER`, `POSTGRES_PASSWORD`
//! and `POSTGRES_DB`.

use dolphie_pg::connection::{Connection, ConnectionConfig, Transport};
use dolphie_pg::{Error, PgConnector, Session, SessionConfig, TracingNotifier};
use std::sync::Arc;

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn live_config() -> SessionConfig {
    let mut builder = SessionConfig::builder()
        .host(env_or("POSTGRES_HOST", "localhost"))
        .port(env_or("POSTGRES_PORT", "5432").parse().expect("port"))
        .user(env_or("POSTGRES_USER", "postgres"))
        .database(env_or("POSTGRES_DB", "postgres"));
    if let Ok(password) = std::env::var("POSTGRES_PASSWORD") {
        builder = builder.password(password);
    }
    builder.build()
}

async fn live_session() -> Session<PgConnector> {
    Session::start(PgConnector::new(), live_config(), Arc::new(TracingNotifier))
        .await
        .expect("connect")
}

#[tokio::test]
#[ignore] // Requires Postgres running
async fn test_connect_and_query() {
    let config = live_config();
    let transport = Transport::connect_tcp(&config.host, config.port)
        .await
        .expect("connect");

    let mut conn = Connection::new(transport);

    let mut builder = ConnectionConfig::builder(config.user.clone());
    if let Some(password) = &config.password {
        builder = builder.password(password.clone());
    }
    conn.startup(&builder.build(), None, None)
        .await
        .expect("startup");

    let outcome = conn.query("SELECT 1", &[]).await.expect("query");
    assert_eq!(outcome.rows.len(), 1);

    conn.close().await.expect("close");
}

#[tokio::test]
#[ignore] // Requires Postgres running
async fn test_session_captures_backend_pid() {
    let session = live_session().await;

    let pid = session.backend_id().expect("backend pid");
    session
        .execute("SELECT pg_backend_pid() AS pid", &[])
        .await
        .expect("query");
    let row = session.fetch_one().await.expect("row");
    assert_eq!(row.get_as::<i64>("pid"), Some(pid));

    session.close().await;
}

#[tokio::test]
#[ignore] // Requires Postgres running
async fn test_session_marks_queries() {
    let session = live_session().await;

    session
        .execute(
            "SELECT query FROM pg_stat_activity WHERE pid = pg_backend_pid()",
            &[],
        )
        .await
        .expect("query");
    let row = session.fetch_one().await.expect("row");
    assert!(row.get("query").unwrap_or("").starts_with("/* Dolphie */ "));
}

#[tokio::test]
#[ignore] // Requires Postgres running
async fn test_session_parameters_and_counts() {
    let session = live_session().await;

    session
        .execute("CREATE TEMP TABLE probe (n int)", &[])
        .await
        .expect("create");
    let inserted = session
        .execute(
            "INSERT INTO probe SELECT generate_series(1, $1::int)",
            &[5.into()],
        )
        .await
        .expect("insert");
    assert_eq!(inserted, Some(5));

    let deleted = session
        .execute("DELETE FROM probe WHERE n > $1::int", &[3.into()])
        .await
        .expect("delete");
    assert_eq!(deleted, Some(2));
}

#[tokio::test]
#[ignore] // Requires Postgres running
async fn test_session_query_error_is_manual() {
    let session = live_session().await;

    let err = session
        .execute("SELECT * FROM table_that_does_not_exist", &[])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Manual(_)));
    assert!(err.to_string().contains("does not exist"));

    // the connection stays usable after a statement error
    assert!(session.is_connected().await);
    assert_eq!(
        session.execute_ignore_errors("SELECT 1/0", &[]).await.unwrap(),
        None
    );
}

#[tokio::test]
#[ignore] // Requires Postgres running
async fn test_session_survives_backend_termination() {
    let session = live_session().await;
    let killer = live_session().await;

    let pid = session.backend_id().expect("backend pid");
    killer
        .execute("SELECT pg_terminate_backend($1::int)", &[pid.into()])
        .await
        .expect("terminate");

    session.execute("SELECT 1", &[]).await.expect("retry");
    assert_ne!(session.backend_id(), Some(pid));
}
