//! In-process notification broker.
//!
//! [`MemoryBroker`] behaves like a tiny `LISTEN`/`NOTIFY` server: connections
//! acquired from it receive every notification sent on a channel they listen
//! to. It also lets callers inject faults (an unreachable server, connections
//! dropped mid-wait), which makes it the backend of choice for tests and local
//! development.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::connection::{ChannelName, ConnectionPool, NotificationConnection, RawNotification};
use crate::error::{Error, Result};

/// Number of most recent commands a broker remembers.
pub const MAX_RECORDED_COMMANDS: usize = 1024;

enum Event {
    Notification(RawNotification),
    Broken,
}

struct Live {
    channels: HashSet<String>,
    tx: mpsc::UnboundedSender<Event>,
}

#[derive(Default)]
struct State {
    unavailable: bool,
    next_id: u64,
    live: HashMap<u64, Live>,
    acquire_attempts: usize,
    acquired: usize,
    closed: usize,
    commands: VecDeque<String>,
}

/// In-memory notification server implementing [`ConnectionPool`].
#[derive(Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<State>>,
}

impl MemoryBroker {
    /// Create an empty, available broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent acquisitions succeed (`true`) or fail (`false`).
    pub fn set_available(&self, available: bool) {
        self.state.lock().unavailable = !available;
    }

    /// Send a notification to every connection listening on `channel`.
    ///
    /// Returns the number of connections it was routed to.
    pub fn notify(&self, channel: &str, payload: &str) -> usize {
        let state = self.state.lock();
        let mut routed = 0;
        for live in state.live.values() {
            if live.channels.contains(channel) {
                let event = Event::Notification(RawNotification::new(channel, payload));
                if live.tx.send(event).is_ok() {
                    routed += 1;
                }
            }
        }
        routed
    }

    /// Push a raw notification to every open connection, listening or not.
    pub fn inject(&self, notification: RawNotification) {
        let state = self.state.lock();
        for live in state.live.values() {
            let _ = live.tx.send(Event::Notification(notification.clone()));
        }
    }

    /// Fail every open connection: pending and future waits return
    /// [`Error::Wait`] and no further notifications are routed to them.
    pub fn break_connections(&self) {
        let mut state = self.state.lock();
        for (_, live) in state.live.drain() {
            let _ = live.tx.send(Event::Broken);
        }
    }

    /// Number of acquisition attempts, successful or not.
    pub fn acquire_attempts(&self) -> usize {
        self.state.lock().acquire_attempts
    }

    /// Number of connections handed out.
    pub fn acquired(&self) -> usize {
        self.state.lock().acquired
    }

    /// Number of connections closed.
    pub fn closed(&self) -> usize {
        self.state.lock().closed
    }

    /// Connections handed out and not yet closed.
    pub fn open_connections(&self) -> usize {
        let state = self.state.lock();
        state.acquired - state.closed
    }

    /// Every channel a recorded `LISTEN` was issued for, in order.
    ///
    /// Only the last [`MAX_RECORDED_COMMANDS`] commands are kept.
    pub fn listened_channels(&self) -> Vec<String> {
        self.state
            .lock()
            .commands
            .iter()
            .filter_map(|cmd| cmd.strip_prefix("LISTEN "))
            .map(unquote)
            .collect()
    }

    /// The most recent commands executed against the broker, oldest first.
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().commands.iter().cloned().collect()
    }

    /// Forget every recorded command.
    pub fn clear_commands(&self) {
        self.state.lock().commands.clear();
    }

    /// Whether some open connection is listening on `channel`.
    pub fn is_listening(&self, channel: &str) -> bool {
        self.state
            .lock()
            .live
            .values()
            .any(|live| live.channels.contains(channel))
    }

    /// Wait until some open connection listens on `channel`.
    ///
    /// Returns `false` if that did not happen within `timeout`.
    pub async fn wait_for_listen(&self, channel: &str, timeout: Duration) -> bool {
        let poll = async {
            while !self.is_listening(channel) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(timeout, poll).await.is_ok()
    }
}

fn unquote(quoted: &str) -> String {
    let inner = quoted
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(quoted);
    inner.replace("\"\"", "\"")
}

#[async_trait]
impl ConnectionPool for MemoryBroker {
    type Connection = MemoryConnection;

    async fn acquire(&self) -> Result<MemoryConnection> {
        let mut state = self.state.lock();
        state.acquire_attempts += 1;
        if state.unavailable {
            return Err(Error::Acquire("memory broker unavailable".to_string()));
        }

        state.next_id += 1;
        state.acquired += 1;
        let id = state.next_id;

        let (tx, rx) = mpsc::unbounded_channel();
        state.live.insert(
            id,
            Live {
                channels: HashSet::new(),
                tx,
            },
        );

        Ok(MemoryConnection {
            id,
            rx,
            state: Arc::clone(&self.state),
            closed: false,
        })
    }
}

/// Connection handed out by [`MemoryBroker`].
pub struct MemoryConnection {
    id: u64,
    rx: mpsc::UnboundedReceiver<Event>,
    state: Arc<Mutex<State>>,
    closed: bool,
}

#[async_trait]
impl NotificationConnection for MemoryConnection {
    async fn listen(&mut self, channel: &ChannelName) -> Result<()> {
        let mut state = self.state.lock();
        let Some(live) = state.live.get_mut(&self.id) else {
            return Err(Error::Listen {
                channel: channel.to_string(),
                reason: "connection is broken".to_string(),
            });
        };

        live.channels.insert(channel.as_str().to_string());
        if state.commands.len() == MAX_RECORDED_COMMANDS {
            state.commands.pop_front();
        }
        state.commands.push_back(format!("LISTEN {}", channel.quoted()));
        Ok(())
    }

    async fn wait(&mut self) -> Result<RawNotification> {
        match self.rx.recv().await {
            Some(Event::Notification(notification)) => Ok(notification),
            Some(Event::Broken) => Err(Error::Wait("connection reset by broker".to_string())),
            None => Err(Error::Wait("broker dropped".to_string())),
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let mut state = self.state.lock();
        state.live.remove(&self.id);
        state.closed += 1;
    }
}
