//! PostgreSQL backend built on sqlx.
//!
//! Every acquisition opens a fresh single-connection sqlx pool and a
//! [`PgListener`] on it. Closing the connection closes that pool, so a
//! session that held `LISTEN` state is never handed out again.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgListener, PgPool, PgPoolOptions};

use crate::connection::{ChannelName, ConnectionPool, NotificationConnection, RawNotification};
use crate::error::{Error, Result};

/// Default time allowed for establishing a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// [`ConnectionPool`] opening dedicated PostgreSQL sessions.
#[derive(Debug, Clone)]
pub struct PgNotifyPool {
    options: PgConnectOptions,
    connect_timeout: Duration,
}

impl PgNotifyPool {
    /// Create a pool for the given connection options.
    pub fn new(options: PgConnectOptions) -> Self {
        Self {
            options,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Create a pool from a `postgres://` URL.
    pub fn from_url(url: &str) -> Result<Self> {
        let options = PgConnectOptions::from_str(url).map_err(|e| Error::Config(e.to_string()))?;
        Ok(Self::new(options))
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// The connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}

#[async_trait]
impl ConnectionPool for PgNotifyPool {
    type Connection = PgNotifyConnection;

    async fn acquire(&self) -> Result<PgNotifyConnection> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .min_connections(0)
            .acquire_timeout(self.connect_timeout)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(self.options.clone())
            .await
            .map_err(|e| Error::Acquire(e.to_string()))?;

        let listener = match PgListener::connect_with(&pool).await {
            Ok(listener) => listener,
            Err(e) => {
                pool.close().await;
                return Err(Error::Acquire(e.to_string()));
            }
        };

        Ok(PgNotifyConnection {
            listener: Some(listener),
            pool,
        })
    }
}

/// A dedicated PostgreSQL session used for `LISTEN`.
pub struct PgNotifyConnection {
    listener: Option<PgListener>,
    pool: PgPool,
}

#[async_trait]
impl NotificationConnection for PgNotifyConnection {
    async fn listen(&mut self, channel: &ChannelName) -> Result<()> {
        let listen_err = |reason: String| Error::Listen {
            channel: channel.to_string(),
            reason,
        };

        let Some(listener) = self.listener.as_mut() else {
            return Err(listen_err("connection closed".to_string()));
        };
        listener
            .listen(channel.as_str())
            .await
            .map_err(|e| listen_err(e.to_string()))
    }

    async fn wait(&mut self) -> Result<RawNotification> {
        // try_recv surfaces a lost connection as Ok(None); recv would
        // reconnect on its own and hide the gap from subscribers
        let Some(listener) = self.listener.as_mut() else {
            return Err(Error::Wait("connection closed".to_string()));
        };
        match listener.try_recv().await {
            Ok(Some(notification)) => Ok(RawNotification::new(
                notification.channel(),
                notification.payload(),
            )),
            Ok(None) => Err(Error::Wait("connection lost".to_string())),
            Err(e) => Err(Error::Wait(e.to_string())),
        }
    }

    async fn close(&mut self) {
        drop(self.listener.take());
        self.pool.close().await;
    }
}
