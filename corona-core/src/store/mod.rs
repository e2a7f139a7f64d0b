//! Durable key-value storage
//!
//! The collector keeps two keys in its store:
//! - [`USER_ID_STORAGE_KEY`]: the persisted user identifier (plain string)
//! - [`QUEUE_STORAGE_KEY`]: the pending-event queue (JSON array of events)
//!
//! Storage is best-effort. Every operation returns a [`Result`] so callers can
//! log why it failed, but no collector operation propagates a storage error.
//! There is exactly one queue slot per store; two processes sharing a store
//! overwrite each other's view of the queue.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::{SqliteStore, SCHEMA_VERSION};

use serde_json::Value;

use crate::error::Result;
use crate::event::Event;

/// Key holding the persisted user identifier
pub const USER_ID_STORAGE_KEY: &str = "corona_analytics_user_id";

/// Key holding the serialized pending-event queue
pub const QUEUE_STORAGE_KEY: &str = "corona_analytics_queue";

const PROBE_KEY: &str = "__storage_test__";

/// A string-to-string store that survives process restarts.
pub trait KeyValueStore: Send + Sync {
    /// Read a value; `Ok(None)` when the key is absent
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Overwrite a value
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a value; deleting a missing key succeeds
    fn remove(&self, key: &str) -> Result<()>;

    /// Check the store accepts writes by writing and removing a scratch key.
    fn probe(&self) -> Result<()> {
        self.set(PROBE_KEY, PROBE_KEY)?;
        self.remove(PROBE_KEY)
    }
}

/// Mirrors the in-memory queue into a [`KeyValueStore`].
pub struct DurableMirror<'a> {
    store: &'a dyn KeyValueStore,
}

impl<'a> DurableMirror<'a> {
    pub fn new(store: &'a dyn KeyValueStore) -> Self {
        Self { store }
    }

    /// Overwrite the stored queue with `events`.
    ///
    /// Failures are logged and swallowed; the in-memory queue stays authoritative.
    pub fn sync<'e>(&self, events: impl IntoIterator<Item = &'e Event>) {
        let events: Vec<&Event> = events.into_iter().collect();
        let result = serde_json::to_string(&events)
            .map_err(Into::into)
            .and_then(|payload| self.store.set(QUEUE_STORAGE_KEY, &payload));

        if let Err(e) = result {
            tracing::debug!(error = %e, pending = events.len(), "Failed to persist event queue");
        }
    }

    /// Load events left over from a previous construction.
    ///
    /// Anything unreadable yields an empty queue.
    pub fn recover(&self) -> Vec<Event> {
        let stored = match self.store.get(QUEUE_STORAGE_KEY) {
            Ok(Some(stored)) => stored,
            Ok(None) => return Vec::new(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read stored event queue");
                return Vec::new();
            }
        };

        match serde_json::from_str::<Value>(&stored) {
            Ok(Value::Array(items)) => items
                .into_iter()
                .filter_map(|item| match item {
                    Value::Object(fields) => Some(Event::from_fields(fields)),
                    other => {
                        tracing::debug!(item = %other, "Skipping non-object stored event");
                        None
                    }
                })
                .collect(),
            Ok(_) => {
                tracing::warn!("Stored event queue is not an array, ignoring it");
                Vec::new()
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to recover event queue");
                Vec::new()
            }
        }
    }

    /// Drop the stored queue entirely.
    pub fn clear(&self) {
        if let Err(e) = self.store.remove(QUEUE_STORAGE_KEY) {
            tracing::debug!(error = %e, "Failed to remove stored event queue");
        }
    }
}
