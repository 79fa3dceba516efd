//! Client registry for reload notifications.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

/// Payload sent to browsers when they should reload.
pub const RELOAD_MESSAGE: &str = "reload";

/// Signal delivered to a single connected client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientSignal {
    /// Send the reload payload.
    Reload,
    /// Close the connection.
    Close,
}

#[derive(Default)]
struct Registry {
    clients: HashMap<u64, mpsc::UnboundedSender<ClientSignal>>,
    closed: bool,
}

/// Broadcast hub for connected reload clients.
///
/// Delivery is at-most-once: a client only sees broadcasts made while it is
/// registered, and nothing is queued for clients that connect later.
#[derive(Default)]
pub struct ReloadChannel {
    registry: Mutex<Registry>,
    next_id: AtomicU64,
}

impl ReloadChannel {
    /// Create an empty channel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new client.
    ///
    /// Returns `None` once [`close_all`](Self::close_all) has been called.
    /// The client is unregistered when the returned connection is dropped.
    pub fn add_client(self: &Arc<Self>) -> Option<ClientConnection> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut registry = self.registry();
        if registry.closed {
            return None;
        }
        registry.clients.insert(id, tx);

        Some(ClientConnection {
            id,
            rx,
            channel: Arc::clone(self),
        })
    }

    /// Send [`RELOAD_MESSAGE`] to every open client.
    ///
    /// Clients whose connection has already gone away are skipped and pruned.
    /// Returns the number of clients the signal was handed to.
    pub fn broadcast(&self) -> usize {
        let mut registry = self.registry();
        registry
            .clients
            .retain(|_, tx| tx.send(ClientSignal::Reload).is_ok());
        registry.clients.len()
    }

    /// Close every client and refuse new ones.
    pub fn close_all(&self) {
        let mut registry = self.registry();
        registry.closed = true;
        for (_, tx) in registry.clients.drain() {
            let _ = tx.send(ClientSignal::Close);
        }
    }

    /// Number of registered clients.
    pub fn client_count(&self) -> usize {
        self.registry().clients.len()
    }

    fn remove(&self, id: u64) {
        self.registry().clients.remove(&id);
    }
}

/// A registered client; unregisters itself on drop.
pub struct ClientConnection {
    id: u64,
    rx: mpsc::UnboundedReceiver<ClientSignal>,
    channel: Arc<ReloadChannel>,
}

impl ClientConnection {
    /// Client identifier, unique per channel.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next signal.
    ///
    /// Returns `None` if the channel dropped this client without a close signal.
    pub async fn recv(&mut self) -> Option<ClientSignal> {
        self.rx.recv().await
    }
}

impl Drop for ClientConnection {
    fn drop(&mut self) {
        self.channel.remove(self.id);
    }
}
