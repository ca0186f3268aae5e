//! Connection seam.
//!
//! The dispatch loop talks to the database only through these traits, so any
//! client that can `LISTEN` and wait for asynchronous notifications can back a
//! [`Listener`](crate::Listener). Two implementations ship with the crate:
//! [`PgNotifyPool`](crate::postgres::PgNotifyPool) (feature `postgres`) and
//! [`MemoryBroker`](crate::memory::MemoryBroker).

use std::fmt;

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Longest identifier PostgreSQL keeps without truncation (`NAMEDATALEN - 1`).
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// A channel name that can be safely quoted as a server identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelName(String);

impl ChannelName {
    /// Validate `name`.
    ///
    /// Names the server would silently alter are rejected: empty names, names
    /// containing NUL, and names longer than [`MAX_IDENTIFIER_LEN`] bytes.
    pub fn parse(name: impl Into<String>) -> Result<Self> {
        let name = name.into();

        let reason = if name.is_empty() {
            Some("empty name")
        } else if name.contains('\0') {
            Some("contains a NUL byte")
        } else if name.len() > MAX_IDENTIFIER_LEN {
            Some("longer than 63 bytes")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(Error::InvalidChannelName { name, reason }),
            None => Ok(Self(name)),
        }
    }

    /// The raw name, as it appears in incoming notifications.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The name as a double-quoted identifier, with embedded quotes doubled.
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0.replace('"', "\"\""))
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ChannelName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A notification as received from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNotification {
    /// Channel the notification was sent on.
    pub channel: String,
    /// Notification payload.
    pub payload: String,
}

impl RawNotification {
    /// Create a raw notification.
    pub fn new(channel: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}

/// Source of dedicated notification connections.
#[async_trait]
pub trait ConnectionPool: Send + Sync + 'static {
    /// Connection type handed out by this pool.
    type Connection: NotificationConnection;

    /// Acquire one connection for exclusive use by a dispatcher.
    ///
    /// Fails with [`Error::Acquire`] when the pool is exhausted or the server
    /// is unreachable.
    async fn acquire(&self) -> Result<Self::Connection>;
}

/// A connection subscribed to notification channels.
///
/// Subscription state is scoped to the connection: once [`close`] is called
/// the connection must not be handed to anyone else.
///
/// [`close`]: NotificationConnection::close
#[async_trait]
pub trait NotificationConnection: Send + 'static {
    /// Issue `LISTEN` for `channel`.
    async fn listen(&mut self, channel: &ChannelName) -> Result<()>;

    /// Wait for the next notification on any listened channel.
    ///
    /// Must be cancel-safe: dropping the future before it completes loses no
    /// notification.
    async fn wait(&mut self) -> Result<RawNotification>;

    /// Close the connection.
    async fn close(&mut self);
}
