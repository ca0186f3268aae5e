//! Integration tests against a real PostgreSQL server.
//!
//! Skipped unless `DATABASE_URL` points at a server the tests may use.

#![cfg(feature = "postgres")]

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPool;

use pglisten::postgres::PgNotifyPool;
use pglisten::{Listener, ListenerConfig, Notification, Subscription};

const TIMEOUT: Duration = Duration::from_secs(10);

fn database_url() -> Option<String> {
    match std::env::var("DATABASE_URL") {
        Ok(url) => Some(url),
        Err(_) => {
            eprintln!("DATABASE_URL not set, skipping");
            None
        }
    }
}

async fn next(sub: &mut Subscription) -> Notification {
    tokio::time::timeout(TIMEOUT, sub.recv())
        .await
        .expect("timed out waiting for notification")
        .expect("subscription closed")
}

async fn notify(pool: &PgPool, channel: &str, payload: &str) {
    sqlx::query("SELECT pg_notify($1, $2)")
        .bind(channel)
        .bind(payload)
        .execute(pool)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_postgres_roundtrip() {
    let Some(url) = database_url() else {
        return;
    };
    let sender = PgPool::connect(&url).await.unwrap();
    let listener = Listener::start(
        Arc::new(PgNotifyPool::from_url(&url).unwrap()),
        ListenerConfig::new(),
    );

    let mut sub = listener.subscribe("pglisten_roundtrip").unwrap();
    assert!(next(&mut sub).await.is_reset());

    notify(&sender, "pglisten_roundtrip", "42").await;
    assert_eq!(next(&mut sub).await, Notification::new("42"));

    listener.stop().await;
}

#[tokio::test]
async fn test_postgres_quoted_channel_name() {
    let Some(url) = database_url() else {
        return;
    };
    let sender = PgPool::connect(&url).await.unwrap();
    let listener = Listener::start(
        Arc::new(PgNotifyPool::from_url(&url).unwrap()),
        ListenerConfig::new(),
    );

    let channel = "pglisten \"Mixed\" Case";
    let mut sub = listener.subscribe(channel).unwrap();
    assert!(next(&mut sub).await.is_reset());

    notify(&sender, channel, "quoted").await;
    assert_eq!(next(&mut sub).await, Notification::new("quoted"));

    listener.stop().await;
}

#[tokio::test]
async fn test_postgres_reconnects_after_backend_terminated() {
    let Some(url) = database_url() else {
        return;
    };
    let admin = PgPool::connect(&url).await.unwrap();
    let listener = Listener::start(
        Arc::new(PgNotifyPool::from_url(&url).unwrap()),
        ListenerConfig::new().with_retry_interval(Duration::from_millis(100)),
    );

    let mut sub = listener.subscribe("pglisten_reconnect").unwrap();
    assert!(next(&mut sub).await.is_reset());

    sqlx::query(
        "SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
         WHERE pid <> pg_backend_pid() AND query LIKE 'LISTEN \"pglisten_reconnect\"%'",
    )
    .execute(&admin)
    .await
    .unwrap();

    assert!(next(&mut sub).await.is_reset());

    notify(&admin, "pglisten_reconnect", "back").await;
    assert_eq!(next(&mut sub).await, Notification::new("back"));

    listener.stop().await;
}
