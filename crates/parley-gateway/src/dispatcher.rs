use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::debug;

use parley_types::events::GatewayEvent;
use parley_types::models::ConnectionId;

/// Outcome of a targeted send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// The connection is gone; the event was discarded.
    Dropped,
}

/// Fans events out to connected sockets: broadcast to everyone, or targeted
/// at a single connection.
///
/// Every connection has exactly one queue, and broadcasts are pushed into it
/// like any targeted event, so a connection sees events in the order they
/// were sent.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Per-connection send channels
    connections: RwLock<HashMap<ConnectionId, mpsc::UnboundedSender<GatewayEvent>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                connections: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Broadcast an event to all connected clients.
    pub async fn broadcast(&self, event: GatewayEvent) {
        let connections = self.inner.connections.read().await;
        for (conn_id, tx) in connections.iter() {
            if tx.send(event.clone()).is_err() {
                debug!(connection = %conn_id, "dropped {} for closing connection", event.kind());
            }
        }
    }

    /// Register a connection. The returned outbox yields every event sent
    /// to it from now on, broadcast or targeted.
    pub async fn register(&self, conn_id: ConnectionId) -> Outbox {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.connections.write().await.insert(conn_id, tx);
        Outbox { rx }
    }

    /// Forget a connection. Later sends to it are dropped.
    pub async fn unregister(&self, conn_id: &ConnectionId) {
        self.inner.connections.write().await.remove(conn_id);
    }

    /// Send a targeted event to a specific connection.
    pub async fn send_to(&self, conn_id: &ConnectionId, event: GatewayEvent) -> Delivery {
        let connections = self.inner.connections.read().await;
        let delivered = connections
            .get(conn_id)
            .is_some_and(|tx| tx.send(event.clone()).is_ok());

        if delivered {
            Delivery::Delivered
        } else {
            debug!(connection = %conn_id, "dropped {} for vanished connection", event.kind());
            Delivery::Dropped
        }
    }
}

/// Everything queued for one connection, in send order.
pub struct Outbox {
    rx: mpsc::UnboundedReceiver<GatewayEvent>,
}

impl Outbox {
    /// Wait for the next event. `None` once the connection is unregistered
    /// and the queue is empty. Cancel safe.
    pub async fn recv(&mut self) -> Option<GatewayEvent> {
        self.rx.recv().await
    }

    /// Next event if one is already queued.
    #[cfg(test)]
    pub fn try_recv(&mut self) -> Option<GatewayEvent> {
        self.rx.try_recv().ok()
    }

    /// Everything currently queued.
    #[cfg(test)]
    pub fn drain(&mut self) -> Vec<GatewayEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}
