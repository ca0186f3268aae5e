//! # Fan-out: one source, many readers.
//!
//! A [`Fanout`] drains a single notification stream (typically a
//! [`Subscription`] from a [`Listener`](crate::Listener)) and copies every
//! value to each registered downstream queue.
//!
//! ## Rules
//! - A value is delivered to the queues registered when it was taken from the
//!   source; queues registered later never see it.
//! - Queues are served one after another, so a reader that does not drain its
//!   queue holds back every other reader (until it is released).
//! - Released queues are skipped; stopping the fan-out abandons a blocked
//!   delivery.
//! - The registry lock is released before delivering: [`Fanout::listen`] and
//!   releases never wait behind a stalled pass.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;

use crate::notification::Notification;
use crate::queue::{queue, Delivery, Subscription};
use crate::registry::{Registry, Snapshot};

/// Copies one notification stream to many subscriptions.
///
/// Dropping the fan-out cancels its relay task without waiting for it.
pub struct Fanout {
    outputs: Arc<Registry<u64>>,
    cancel: CancellationToken,
    /// Cancelled once the relay task has exited.
    exited: CancellationToken,
}

impl Fanout {
    /// Start relaying `source`.
    ///
    /// The relay ends when the source ends or on [`stop`](Self::stop).
    /// Must be called from within a Tokio runtime.
    pub fn start<S>(source: S) -> Self
    where
        S: Stream<Item = Notification> + Send + Unpin + 'static,
    {
        let outputs = Arc::new(Registry::new());
        let cancel = CancellationToken::new();
        let exited = CancellationToken::new();

        let guard = exited.clone().drop_guard();
        let relaying = relay(source, Arc::clone(&outputs), cancel.clone());
        tokio::spawn(
            async move {
                let _guard = guard;
                relaying.await;
            }
            .with_current_subscriber(),
        );

        Self {
            outputs,
            cancel,
            exited,
        }
    }

    /// Register a new downstream subscription.
    ///
    /// It receives every value taken from the source from now on, until it
    /// is released or dropped.
    pub fn listen(&self) -> Subscription {
        let outputs = Arc::downgrade(&self.outputs);
        let (id, subscription) = self.outputs.insert_next(move |id| {
            queue(move || {
                if let Some(outputs) = outputs.upgrade() {
                    outputs.remove(&id);
                    tracing::trace!(id, "fan-out subscription released");
                }
            })
        });

        tracing::trace!(id, "fan-out subscription added");
        subscription
    }

    /// Number of live downstream subscriptions.
    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    /// Whether there are no live downstream subscriptions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the relay task is still running.
    pub fn is_running(&self) -> bool {
        !self.exited.is_cancelled()
    }

    /// Stop relaying and wait for the relay task to exit.
    ///
    /// Idempotent; concurrent callers all wait for the exit.
    pub async fn stop(&self) {
        self.cancel.cancel();
        self.exited.cancelled().await;
    }
}

impl Drop for Fanout {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn relay<S>(mut source: S, outputs: Arc<Registry<u64>>, cancel: CancellationToken)
where
    S: Stream<Item = Notification> + Unpin,
{
    loop {
        let notification = tokio::select! {
            _ = cancel.cancelled() => break,
            next = source.next() => match next {
                Some(notification) => notification,
                None => {
                    tracing::debug!("fan-out source ended");
                    break;
                }
            },
        };

        // lock held only for the copy; membership is fixed per value here
        let snapshot = outputs.snapshot();
        if !broadcast(&snapshot, notification, &cancel).await {
            break;
        }
    }
}

/// Deliver to every queue in `snapshot`. Returns `false` if cancelled.
async fn broadcast(
    snapshot: &Snapshot<u64>,
    notification: Notification,
    cancel: &CancellationToken,
) -> bool {
    for queue in snapshot.entries.values() {
        if queue.deliver(notification.clone(), cancel).await == Delivery::Canceled {
            return false;
        }
    }
    true
}
