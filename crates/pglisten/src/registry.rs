//! Lock-protected registry of delivery queues.
//!
//! Both the listener (keyed by channel name) and the fan-out (keyed by a
//! monotonically increasing id) keep their queues here. Every mutation bumps
//! a generation counter, so a reader can tell whether a snapshot it holds is
//! still current.
//!
//! ## Rules
//! - One lock per registry; critical sections never await.
//! - Readers take a [`Snapshot`] and release the lock before delivering.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;

use parking_lot::Mutex;

use crate::queue::{QueueSender, Subscription};

/// Point-in-time copy of a registry.
pub(crate) struct Snapshot<K> {
    pub entries: HashMap<K, QueueSender>,
    pub generation: u64,
}

struct Inner<K> {
    entries: HashMap<K, QueueSender>,
    generation: u64,
    next_id: u64,
}

pub(crate) struct Registry<K> {
    inner: Mutex<Inner<K>>,
}

impl<K: Eq + Hash + Clone> Registry<K> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                generation: 0,
                next_id: 0,
            }),
        }
    }

    /// Register a queue under `key` unless the key is taken.
    ///
    /// `make` runs under the lock and only when the key is free, so a queue
    /// is never built (and later torn down) for a rejected key.
    pub(crate) fn insert_with<F>(&self, key: K, make: F) -> Option<(Subscription, u64)>
    where
        F: FnOnce() -> (QueueSender, Subscription),
    {
        let mut inner = self.inner.lock();
        if inner.entries.contains_key(&key) {
            return None;
        }

        let (sender, subscription) = make();
        inner.entries.insert(key, sender);
        inner.generation += 1;

        Some((subscription, inner.generation))
    }

    /// Remove `key`, returning the new generation if it was present.
    pub(crate) fn remove<Q>(&self, key: &Q) -> Option<u64>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let mut inner = self.inner.lock();
        inner.entries.remove(key)?;
        inner.generation += 1;
        Some(inner.generation)
    }

    pub(crate) fn snapshot(&self) -> Snapshot<K> {
        let inner = self.inner.lock();
        Snapshot {
            entries: inner.entries.clone(),
            generation: inner.generation,
        }
    }

    pub(crate) fn keys(&self) -> Vec<K> {
        self.inner.lock().entries.keys().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }
}

impl Registry<u64> {
    /// Allocate the next id and register a queue under it.
    pub(crate) fn insert_next<F>(&self, make: F) -> (u64, Subscription)
    where
        F: FnOnce(u64) -> (QueueSender, Subscription),
    {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = inner.next_id;

        let (sender, subscription) = make(id);
        inner.entries.insert(id, sender);
        inner.generation += 1;

        (id, subscription)
    }
}
