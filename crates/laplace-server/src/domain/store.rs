//! The shared data store.
//!
//! A mapping from string keys to arbitrary JSON values that the server hands
//! out on `GET`.  Two parties touch it:
//!
//! - the dispatch loop, which reads it (and optionally clears it) while
//!   answering `GET`, and
//! - the owning application, which replaces it through [`DataStore::set`]
//!   from any thread.
//!
//! # Why a Mutex and copies? (for beginners)
//!
//! A `Mutex` lets only one thread at a time look inside.  Every operation
//! below takes the lock, does its whole job, and releases it, so a reader can
//! never observe half of one write and half of another.
//!
//! [`DataStore::get`] returns a *copy* of the map rather than a reference.
//! The caller can keep, edit, or send that copy without holding the lock and
//! without being able to change the store behind the server's back.

use std::sync::{Mutex, MutexGuard, PoisonError};

use laplace_core::Payload;
use tracing::{debug, enabled, Level};

/// Thread-safe key/value store with whole-map replace semantics.
#[derive(Debug, Default)]
pub struct DataStore {
    inner: Mutex<Payload>,
}

impl DataStore {
    /// Creates a store holding `initial`.
    pub fn new(initial: Payload) -> Self {
        Self {
            inner: Mutex::new(initial),
        }
    }

    /// Replaces the entire contents with `data`.
    pub fn set(&self, data: Payload) {
        if enabled!(Level::DEBUG) {
            // serde_json's default map is ordered by key, so the dump is sorted.
            match serde_json::to_string_pretty(&data) {
                Ok(dump) => debug!("data store replaced:\n{dump}"),
                Err(e) => debug!("data store replaced ({} keys, dump failed: {e})", data.len()),
            }
        }
        *self.lock() = data;
    }

    /// Returns an independent copy of the current contents.
    pub fn get(&self) -> Payload {
        self.lock().clone()
    }

    /// Empties the store.  Equivalent to `set` with an empty map.
    pub fn clear(&self) {
        self.set(Payload::new());
    }

    /// Returns the number of top-level keys.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // A panic while the guard was held cannot leave the map half-written:
    // every write is a single assignment.
    fn lock(&self) -> MutexGuard<'_, Payload> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
