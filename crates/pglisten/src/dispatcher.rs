//! # Dispatcher: one connection, one subscription snapshot.
//!
//! A dispatcher is started by the [`Listener`](crate::Listener) against a
//! snapshot of its registry and lives until it is cancelled or fails. It never
//! outlives its connection and never reuses one.
//!
//! ## Lifecycle
//! ```text
//! acquire ──► for each channel: LISTEN, enqueue reset marker
//!                 │
//!                 ▼
//!          loop { wait ──► lookup channel ──► enqueue payload }
//!                 │
//!   error / cancel ──► close connection ──► report
//! ```
//!
//! ## Rules
//! - Every enqueue races cancellation and the queue's release.
//! - A notification for a channel missing from the snapshot is dropped.
//! - Cancellation is a normal stop (`Ok(())`), never a failure.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;

use crate::connection::{ChannelName, ConnectionPool, NotificationConnection};
use crate::error::{Error, Result};
use crate::notification::Notification;
use crate::queue::{Delivery, QueueSender};

/// Handle to a running dispatcher task.
pub(crate) struct Dispatcher {
    cancel: CancellationToken,
    join: JoinHandle<Result<()>>,
}

impl Dispatcher {
    /// Spawn a dispatcher for `channels`, cancelled together with `parent`.
    pub(crate) fn start<P: ConnectionPool>(
        pool: Arc<P>,
        channels: HashMap<String, QueueSender>,
        parent: &CancellationToken,
    ) -> Self {
        let cancel = parent.child_token();
        let token = cancel.clone();

        let join = tokio::spawn(
            async move { run(pool.as_ref(), &channels, &token).await }.with_current_subscriber(),
        );

        Self { cancel, join }
    }

    /// Wait until the dispatcher terminates on its own.
    ///
    /// Consumes the completion; the handle must not be stopped afterwards.
    pub(crate) async fn finished(&mut self) -> Result<()> {
        match (&mut self.join).await {
            Ok(result) => result,
            Err(err) => Err(Error::Task(err.to_string())),
        }
    }

    /// Cancel the dispatcher and wait for it to exit.
    pub(crate) async fn stop(self) {
        self.cancel.cancel();
        if let Err(err) = self.join.await {
            tracing::warn!(error = %err, "dispatcher task failed during stop");
        }
    }
}

async fn run<P: ConnectionPool>(
    pool: &P,
    channels: &HashMap<String, QueueSender>,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut conn = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        conn = pool.acquire() => conn?,
    };
    tracing::debug!(channels = channels.len(), "dispatcher connected");

    let result = relay(&mut conn, channels, cancel).await;

    conn.close().await;
    tracing::debug!("dispatcher connection closed");

    result
}

async fn relay<C: NotificationConnection>(
    conn: &mut C,
    channels: &HashMap<String, QueueSender>,
    cancel: &CancellationToken,
) -> Result<()> {
    for (name, queue) in channels {
        let channel = ChannelName::parse(name.as_str())?;

        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            res = conn.listen(&channel) => res?,
        }

        if queue.deliver(Notification::reset(), cancel).await == Delivery::Canceled {
            return Ok(());
        }
    }

    loop {
        let raw = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            raw = conn.wait() => raw?,
        };

        let Some(queue) = channels.get(&raw.channel) else {
            tracing::trace!(channel = %raw.channel, "dropping notification for unknown channel");
            continue;
        };

        if queue.deliver(Notification::new(raw.payload), cancel).await == Delivery::Canceled {
            return Ok(());
        }
    }
}
