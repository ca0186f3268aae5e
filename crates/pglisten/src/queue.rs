//! Delivery queues.
//!
//! A queue is a single-slot mailbox with one consumer ([`Subscription`]) and
//! any number of producers ([`QueueSender`]). Producers never block forever:
//! every delivery races the queue's `released` token and the producer's own
//! cancellation token.
//!
//! ```text
//!  Dispatcher / Fanout                         consumer
//!  ───────────────────                         ────────
//!  QueueSender::deliver ──► [ slot (cap 1) ] ──► Subscription::recv
//!        │                                          │
//!        └──── select: cancel | released | send     └─ release() ─► teardown (once)
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use crate::notification::Notification;

type Teardown = Box<dyn FnOnce() + Send + 'static>;

/// Create a queue whose first release runs `teardown`.
pub(crate) fn queue(teardown: impl FnOnce() + Send + 'static) -> (QueueSender, Subscription) {
    let (tx, rx) = mpsc::channel(1);
    let state = Arc::new(ReleaseState {
        released: CancellationToken::new(),
        teardown: Mutex::new(Some(Box::new(teardown))),
    });

    let sender = QueueSender {
        tx,
        released: state.released.clone(),
    };
    let subscription = Subscription {
        rx,
        released: Box::pin(state.released.clone().cancelled_owned()),
        state,
    };

    (sender, subscription)
}

struct ReleaseState {
    released: CancellationToken,
    teardown: Mutex<Option<Teardown>>,
}

impl ReleaseState {
    fn release(&self) {
        self.released.cancel();

        let teardown = self.teardown.lock().take();
        if let Some(teardown) = teardown {
            teardown();
        }
    }
}

/// Receiving end of a delivery queue.
///
/// Yields [`Notification`]s in the order the underlying connection received
/// them. The first value after every (re)connection is a reset marker.
///
/// Dropping a subscription releases it.
pub struct Subscription {
    rx: mpsc::Receiver<Notification>,
    /// Wakes a parked [`Stream`] consumer on release.
    released: Pin<Box<WaitForCancellationFutureOwned>>,
    state: Arc<ReleaseState>,
}

impl Subscription {
    /// Wait for the next notification.
    ///
    /// Returns `None` once the subscription is released or its producer side
    /// is gone (the listener or fan-out was stopped and dropped).
    pub async fn recv(&mut self) -> Option<Notification> {
        tokio::select! {
            biased;
            _ = self.state.released.cancelled() => None,
            notification = self.rx.recv() => notification,
        }
    }

    /// Take a pending notification without waiting.
    pub fn try_recv(&mut self) -> Option<Notification> {
        if self.state.released.is_cancelled() {
            return None;
        }
        self.rx.try_recv().ok()
    }

    /// Release the subscription. Idempotent.
    pub fn release(&self) {
        self.state.release();
    }

    /// Whether [`release`](Self::release) has been called.
    pub fn is_released(&self) -> bool {
        self.state.released.is_cancelled()
    }

    /// A cloneable handle that can release this subscription from elsewhere.
    pub fn release_handle(&self) -> ReleaseHandle {
        ReleaseHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl Stream for Subscription {
    type Item = Notification;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.released.as_mut().poll(cx).is_ready() {
            return Poll::Ready(None);
        }
        this.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.state.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("released", &self.is_released())
            .finish()
    }
}

/// Releases a [`Subscription`] from another task or thread.
#[derive(Clone)]
pub struct ReleaseHandle {
    state: Arc<ReleaseState>,
}

impl ReleaseHandle {
    /// Release the subscription. Idempotent.
    pub fn release(&self) {
        self.state.release();
    }

    /// Whether the subscription has been released.
    pub fn is_released(&self) -> bool {
        self.state.released.is_cancelled()
    }
}

impl fmt::Debug for ReleaseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReleaseHandle")
            .field("released", &self.is_released())
            .finish()
    }
}

/// Outcome of a single delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    /// The value was placed into the queue.
    Delivered,
    /// The consumer released the queue; the value was dropped.
    Released,
    /// The producer was cancelled; the value was dropped.
    Canceled,
}

/// Sending end of a delivery queue.
#[derive(Clone)]
pub(crate) struct QueueSender {
    tx: mpsc::Sender<Notification>,
    released: CancellationToken,
}

impl QueueSender {
    /// Deliver `notification`, waiting for the slot to free up.
    ///
    /// Cancellation wins over release, release wins over delivery.
    pub(crate) async fn deliver(
        &self,
        notification: Notification,
        cancel: &CancellationToken,
    ) -> Delivery {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Delivery::Canceled,
            _ = self.released.cancelled() => Delivery::Released,
            res = self.tx.send(notification) => match res {
                Ok(()) => Delivery::Delivered,
                // receiver dropped
                Err(_) => Delivery::Released,
            },
        }
    }

    #[cfg(test)]
    pub(crate) fn is_released(&self) -> bool {
        self.released.is_cancelled()
    }
}
