//! Listener configuration.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::Dispatch;

/// Default delay before restarting a failed dispatcher.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(60);

/// Configuration for a [`Listener`](crate::Listener).
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Parent cancellation scope. Cancelling it stops the listener just like
    /// [`Listener::stop`](crate::Listener::stop), except that nobody waits.
    pub cancel: CancellationToken,

    /// Delay between a dispatcher failure and the next connection attempt.
    pub retry_interval: Duration,

    /// Log sink for the listener and its dispatchers.
    ///
    /// `None` uses the tracing dispatcher current at [`Listener::start`]
    /// (the global one, which discards everything unless the application
    /// installed a subscriber).
    ///
    /// [`Listener::start`]: crate::Listener::start
    pub dispatch: Option<Dispatch>,
}

impl ListenerConfig {
    /// Create a configuration with the defaults.
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            retry_interval: DEFAULT_RETRY_INTERVAL,
            dispatch: None,
        }
    }

    /// Run the listener inside the given cancellation scope.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Set the retry interval.
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Send the listener's logs to `dispatch` instead of the current default.
    pub fn with_dispatch(mut self, dispatch: impl Into<Dispatch>) -> Self {
        self.dispatch = Some(dispatch.into());
        self
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self::new()
    }
}
