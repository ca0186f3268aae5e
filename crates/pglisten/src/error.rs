//! Error types.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by listeners, dispatchers and connection backends.
#[derive(Debug, Error)]
pub enum Error {
    /// A connection could not be acquired from the pool.
    #[error("acquire connection: {0}")]
    Acquire(String),

    /// The `LISTEN` command for a channel failed.
    #[error("listen channel {channel:?}: {reason}")]
    Listen {
        /// Channel the command was issued for.
        channel: String,
        /// Backend error message.
        reason: String,
    },

    /// The channel name cannot be quoted as a server identifier.
    #[error("invalid channel name {name:?}: {reason}")]
    InvalidChannelName {
        /// Rejected name.
        name: String,
        /// Why the name was rejected.
        reason: &'static str,
    },

    /// The connection failed while waiting for a notification.
    #[error("wait for notification: {0}")]
    Wait(String),

    /// The channel already has an active subscription on this listener.
    #[error("channel {0:?} is already subscribed")]
    AlreadySubscribed(String),

    /// Invalid connection configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A background task panicked.
    #[error("background task failed: {0}")]
    Task(String),
}

impl Error {
    /// True for errors caused by misuse of the API rather than by the database.
    pub fn is_programming_error(&self) -> bool {
        matches!(self, Error::AlreadySubscribed(_) | Error::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = Error::Listen {
            channel: "orders".into(),
            reason: "permission denied".into(),
        };
        assert_eq!(
            err.to_string(),
            "listen channel \"orders\": permission denied"
        );

        let err = Error::AlreadySubscribed("orders".into());
        assert_eq!(err.to_string(), "channel \"orders\" is already subscribed");
    }

    #[test]
    fn test_programming_error() {
        assert!(Error::AlreadySubscribed("a".into()).is_programming_error());
        assert!(Error::Config("bad url".into()).is_programming_error());
        assert!(!Error::Wait("eof".into()).is_programming_error());
        assert!(!Error::Acquire("refused".into()).is_programming_error());
    }
}
