//! pglisten - print PostgreSQL notifications as they arrive.

mod config;

use std::io::Write;
use std::sync::Arc;

use clap::Parser;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pglisten::postgres::PgNotifyPool;
use pglisten::{Listener, ListenerConfig, Notification};

use crate::config::Args;

/// Text printed in place of the payload for reset markers.
const RESET_MARKER: &str = "-- connection reset --";

#[derive(Serialize)]
struct Line<'a> {
    channel: &'a str,
    #[serde(flatten)]
    notification: &'a Notification,
}

fn format_line(
    channel: &str,
    notification: &Notification,
    json: bool,
) -> Result<String, serde_json::Error> {
    if json {
        return serde_json::to_string(&Line {
            channel,
            notification,
        });
    }

    if notification.is_reset() {
        Ok(format!("{channel}: {RESET_MARKER}"))
    } else {
        Ok(format!("{channel}: {}", notification.payload))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr; stdout carries notifications
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pglisten=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Args::parse().into_config();
    tracing::info!(
        channels = ?config.channels,
        retry_interval = ?config.retry_interval,
        "configuration loaded"
    );

    let pool = PgNotifyPool::from_url(&config.database_url)?
        .with_connect_timeout(config.connect_timeout);
    let listener = Listener::start(
        Arc::new(pool),
        ListenerConfig::new().with_retry_interval(config.retry_interval),
    );

    let mut streams = Vec::with_capacity(config.channels.len());
    for channel in &config.channels {
        let subscription = listener.subscribe(channel.as_str())?;
        let channel = channel.clone();
        streams.push(subscription.map(move |n| (channel.clone(), n)));
    }
    let mut notifications = stream::select_all(streams);

    let mut stdout = std::io::stdout().lock();
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    tracing::error!(error = %e, "failed to listen for ctrl+c");
                }
                tracing::info!("received shutdown signal");
                break;
            }
            next = notifications.next() => {
                let Some((channel, notification)) = next else {
                    break;
                };
                writeln!(stdout, "{}", format_line(&channel, &notification, config.json)?)?;
                stdout.flush()?;
            }
        }
    }

    listener.stop().await;
    tracing::info!("stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_text() {
        let line = format_line("orders", &Notification::new("42"), false).unwrap();
        assert_eq!(line, "orders: 42");

        let line = format_line("orders", &Notification::reset(), false).unwrap();
        assert_eq!(line, "orders: -- connection reset --");
    }

    #[test]
    fn test_format_json() {
        let line = format_line("orders", &Notification::new("42"), true).unwrap();
        assert_eq!(
            line,
            r#"{"channel":"orders","payload":"42","connection_reset":false}"#
        );
    }
}
