//! Process-local registries keyed by connection.
//!
//! Presence maps a connection to the user it joined as; typing maps a
//! connection to the username currently composing. Both are owned by a
//! [`RelayCore`](crate::relay::RelayCore) and start empty.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::debug;

use parley_types::models::{ConnectionId, PresenceEntry};

/// Who is online: connection -> `{ username, id }`.
pub type PresenceRegistry = Registry<PresenceEntry>;

/// Who is composing: connection -> username.
pub type TypingRegistry = Registry<String>;

/// A connection-keyed map. Every operation is total; snapshots come back in
/// no particular order.
#[derive(Debug)]
pub struct Registry<V> {
    entries: RwLock<HashMap<ConnectionId, V>>,
}

impl<V> Default for Registry<V> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<V: Clone> Registry<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the entry for a connection.
    pub async fn add(&self, conn_id: ConnectionId, value: V) {
        debug!(connection = %conn_id, "registry: add");
        self.entries.write().await.insert(conn_id, value);
    }

    /// Remove a connection's entry, returning it if there was one.
    pub async fn remove(&self, conn_id: &ConnectionId) -> Option<V> {
        self.entries.write().await.remove(conn_id)
    }

    pub async fn get(&self, conn_id: &ConnectionId) -> Option<V> {
        self.entries.read().await.get(conn_id).cloned()
    }

    /// Snapshot of every current value.
    pub async fn all(&self) -> Vec<V> {
        self.entries.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
