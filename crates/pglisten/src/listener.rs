//! # Listener: supervised, reconnecting subscriptions.
//!
//! The listener owns the channel registry and a supervision task. The task
//! keeps exactly one [`Dispatcher`] alive for the current registry contents
//! and replaces it whenever the registry changes or the dispatcher fails.
//!
//! ## Supervision loop
//! ```text
//!            ┌──────────────────────────────────────────────┐
//!            ▼                                              │
//!   snapshot registry ──► start dispatcher ──► wait for:    │
//!                                              │            │
//!     stop ──────────────► stop dispatcher ──► exit         │
//!     registry changed ──► stop dispatcher ─────────────────┤
//!     dispatcher ended ──► log failure, sleep retry ────────┘
//! ```
//!
//! ## Rules
//! - Registry changes are coalesced: any number of changes made while a
//!   dispatcher runs cause a single restart against the latest contents.
//! - A change already covered by the snapshot never causes a restart of its
//!   own: generations only grow, and only one newer than the snapshot counts.
//! - At most one dispatcher runs at a time; the previous one has fully exited
//!   (and closed its connection) before the next one is started.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;

use crate::config::ListenerConfig;
use crate::connection::{ChannelName, ConnectionPool};
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::queue::{queue, Subscription};
use crate::registry::Registry;

struct Shared {
    channels: Registry<String>,
    /// Latest registry generation published to the supervision task.
    changed: watch::Sender<u64>,
}

impl Shared {
    fn publish(&self, generation: u64) {
        self.changed.send_if_modified(|current| {
            if generation > *current {
                *current = generation;
                true
            } else {
                false
            }
        });
    }

    fn unsubscribe(&self, channel: &str) {
        if let Some(generation) = self.channels.remove(channel) {
            self.publish(generation);
            tracing::debug!(channel = %channel, "subscription released");
        }
    }
}

/// Reconnecting subscriber to notification channels.
///
/// Created with [`Listener::start`]. Dropping the listener cancels its
/// supervision task without waiting for it; use [`Listener::stop`] to wait.
pub struct Listener {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    /// Cancelled once the supervision task has exited, panics included.
    exited: CancellationToken,
}

impl Listener {
    /// Start a listener drawing connections from `pool`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start<P: ConnectionPool>(pool: Arc<P>, config: ListenerConfig) -> Self {
        let cancel = config.cancel.child_token();
        let (changed, _) = watch::channel(0);
        let shared = Arc::new(Shared {
            channels: Registry::new(),
            changed,
        });

        let exited = CancellationToken::new();
        let guard = exited.clone().drop_guard();
        let supervision = supervise(
            pool,
            Arc::clone(&shared),
            cancel.clone(),
            config.retry_interval,
        );
        let task = async move {
            let _guard = guard;
            supervision.await;
        };
        match config.dispatch {
            Some(dispatch) => tokio::spawn(task.with_subscriber(dispatch)),
            None => tokio::spawn(task.with_current_subscriber()),
        };

        Self {
            shared,
            cancel,
            exited,
        }
    }

    /// Subscribe to `channel`.
    ///
    /// The first notification received on the returned subscription is a
    /// reset marker, sent once the channel is being listened to. The
    /// subscription keeps receiving across reconnections until it is
    /// released or dropped, after which `channel` may be subscribed again.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidChannelName`] if `channel` cannot be listened to.
    /// - [`Error::AlreadySubscribed`] if `channel` already has a live
    ///   subscription on this listener.
    pub fn subscribe(&self, channel: impl Into<String>) -> Result<Subscription> {
        let channel = channel.into();
        ChannelName::parse(channel.as_str())?;

        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        let key = channel.clone();
        let inserted = self.shared.channels.insert_with(channel.clone(), move || {
            queue(move || {
                if let Some(shared) = shared.upgrade() {
                    shared.unsubscribe(&key);
                }
            })
        });

        let Some((subscription, generation)) = inserted else {
            return Err(Error::AlreadySubscribed(channel));
        };

        self.shared.publish(generation);
        tracing::debug!(channel = %channel, "subscribed");

        Ok(subscription)
    }

    /// Currently subscribed channels, sorted.
    pub fn channels(&self) -> Vec<String> {
        let mut channels = self.shared.channels.keys();
        channels.sort_unstable();
        channels
    }

    /// Whether the supervision task is still running.
    pub fn is_running(&self) -> bool {
        !self.exited.is_cancelled()
    }

    /// Stop the listener and wait for its supervision task to exit.
    ///
    /// On return the active dispatcher (if any) has closed its connection.
    /// Subscriptions stay valid but receive nothing more. Any number of
    /// callers may stop concurrently; each one waits for the exit.
    pub async fn stop(&self) {
        self.cancel.cancel();
        self.exited.cancelled().await;
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

enum Wake {
    Stop,
    Changed,
    Finished(Result<()>),
}

async fn supervise<P: ConnectionPool>(
    pool: Arc<P>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    retry_interval: Duration,
) {
    tracing::info!(retry_interval = ?retry_interval, "listener started");
    let mut changed = shared.changed.subscribe();

    loop {
        let snapshot = shared.channels.snapshot();
        let seen = snapshot.generation;
        tracing::debug!(
            channels = snapshot.entries.len(),
            generation = seen,
            "starting dispatcher"
        );
        let mut dispatcher = Dispatcher::start(Arc::clone(&pool), snapshot.entries, &cancel);

        let wake = tokio::select! {
            _ = cancel.cancelled() => Wake::Stop,
            result = dispatcher.finished() => Wake::Finished(result),
            _ = async {
                let _ = changed.wait_for(|generation| *generation > seen).await;
            } => Wake::Changed,
        };

        match wake {
            Wake::Stop => {
                dispatcher.stop().await;
                break;
            }
            Wake::Changed => {
                tracing::debug!("subscriptions changed, restarting dispatcher");
                dispatcher.stop().await;
            }
            Wake::Finished(result) => {
                if let Err(err) = result {
                    tracing::warn!(
                        error = %err,
                        retry_in = ?retry_interval,
                        "dispatcher failed"
                    );
                }

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(retry_interval) => {}
                }
            }
        }
    }

    tracing::info!("listener stopped");
}
