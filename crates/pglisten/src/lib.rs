//! pglisten - Reconnecting LISTEN/NOTIFY subscriptions for PostgreSQL.
//!
//! A [`Listener`] keeps one dedicated connection listening on every channel
//! that currently has a [`Subscription`], and transparently replaces it when
//! it fails or when the set of channels changes. Because notifications sent
//! while no connection was listening are lost, every (re)connection is
//! announced to each subscription with a reset marker
//! ([`Notification::is_reset`]); consumers should re-read whatever state they
//! derive from the channel when they see one.
//!
//! A [`Fanout`] copies one subscription to any number of readers.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use pglisten::postgres::PgNotifyPool;
//! use pglisten::{Fanout, Listener, ListenerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = Arc::new(PgNotifyPool::from_url("postgres://localhost/app")?);
//!     let listener = Listener::start(pool, ListenerConfig::default());
//!
//!     // Fan one channel out to several readers
//!     let fanout = Fanout::start(listener.subscribe("orders")?);
//!     let mut reader = fanout.listen();
//!
//!     while let Some(notification) = reader.recv().await {
//!         if notification.is_reset() {
//!             println!("(re)connected, reloading orders");
//!         } else {
//!             println!("order changed: {}", notification.payload);
//!         }
//!     }
//!
//!     fanout.stop().await;
//!     listener.stop().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
mod dispatcher;
pub mod error;
pub mod fanout;
pub mod listener;
pub mod memory;
pub mod notification;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod queue;
mod registry;

pub use config::{ListenerConfig, DEFAULT_RETRY_INTERVAL};
pub use connection::{ChannelName, ConnectionPool, NotificationConnection, RawNotification};
pub use error::{Error, Result};
pub use fanout::Fanout;
pub use listener::Listener;
pub use memory::MemoryBroker;
pub use notification::Notification;
pub use queue::{ReleaseHandle, Subscription};
