//! Client hub.
//!
//! All client-set mutation happens inside one event loop, so no locks are
//! needed around the set itself. The broadcast channel is capacity one:
//! publishers wait for the hub to accept each message, which keeps
//! per-publisher ordering intact all the way to every client queue.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::models::Message;

/// Bounded per-client send queue. The hub is the only writer side owner;
/// dropping it closes the queue and ends the client's write pump.
pub type ClientQueue = mpsc::Sender<Arc<Message>>;

/// Snapshot callback invoked inside the hub loop when a client registers.
/// Receives the client's subscriptions and its queue; must not block, and
/// returns false when the queue overflowed so the hub can evict the client.
pub type RegisterCallback = Box<dyn Fn(&HashSet<String>, &ClientQueue) -> bool + Send + Sync>;

/// A registered websocket client as the hub sees it.
pub struct Client {
    pub id: u64,
    pub subscriptions: HashSet<String>,
    pub queue: ClientQueue,
}

/// Cloneable handle used by workers and the websocket endpoint.
#[derive(Clone)]
pub struct HubHandle {
    register_tx: mpsc::Sender<Client>,
    unregister_tx: mpsc::Sender<u64>,
    broadcast_tx: mpsc::Sender<(&'static str, Arc<Message>)>,
    queue_capacity: usize,
    next_id: Arc<AtomicU64>,
}

impl HubHandle {
    /// Allocate a client and the receiving end of its send queue.
    pub fn new_client(
        &self,
        subscriptions: HashSet<String>,
    ) -> (Client, mpsc::Receiver<Arc<Message>>) {
        let (queue, rx) = mpsc::channel(self.queue_capacity);
        let client = Client {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            subscriptions,
            queue,
        };
        (client, rx)
    }

    pub async fn register(&self, client: Client) {
        let _ = self.register_tx.send(client).await;
    }

    pub async fn unregister(&self, client_id: u64) {
        let _ = self.unregister_tx.send(client_id).await;
    }

    /// Publish a message to every subscriber of `channel`. Waits until the
    /// hub accepts the message; empty payloads are never published.
    pub async fn broadcast(&self, channel: &'static str, message: Message) {
        if message.payload.is_empty() {
            return;
        }
        let _ = self.broadcast_tx.send((channel, Arc::new(message))).await;
    }
}

/// The hub event loop state. Build it, attach snapshot callbacks, then
/// spawn [`Hub::run`].
pub struct Hub {
    clients: HashMap<u64, Client>,
    callbacks: Vec<RegisterCallback>,
    register_rx: mpsc::Receiver<Client>,
    unregister_rx: mpsc::Receiver<u64>,
    broadcast_rx: mpsc::Receiver<(&'static str, Arc<Message>)>,
    handle: HubHandle,
}

impl Hub {
    pub fn new(queue_capacity: usize) -> Self {
        let (register_tx, register_rx) = mpsc::channel(16);
        let (unregister_tx, unregister_rx) = mpsc::channel(16);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(1);

        Self {
            clients: HashMap::new(),
            callbacks: Vec::new(),
            register_rx,
            unregister_rx,
            broadcast_rx,
            handle: HubHandle {
                register_tx,
                unregister_tx,
                broadcast_tx,
                queue_capacity,
                next_id: Arc::new(AtomicU64::new(1)),
            },
        }
    }

    pub fn handle(&self) -> HubHandle {
        self.handle.clone()
    }

    /// Attach a snapshot callback. Callbacks are fixed before the hub runs
    /// and are never removed.
    pub fn on_register(&mut self, callback: RegisterCallback) {
        self.callbacks.push(callback);
    }

    pub async fn run(self) {
        let Hub {
            clients,
            callbacks,
            mut register_rx,
            mut unregister_rx,
            mut broadcast_rx,
            handle: _,
        } = self;
        let mut state = HubState { clients, callbacks };

        loop {
            // Biased select: registrations drain ahead of broadcasts so a
            // connecting client never misses a message published after its
            // registration was accepted.
            tokio::select! {
                biased;
                Some(client) = register_rx.recv() => state.register(client),
                Some(client_id) = unregister_rx.recv() => {
                    if state.clients.remove(&client_id).is_some() {
                        debug!(client = client_id, "client unregistered");
                    }
                }
                Some((channel, message)) = broadcast_rx.recv() => {
                    state.broadcast(channel, message);
                }
                else => break,
            }
        }
    }
}

/// Mutable hub state, private to the event loop.
struct HubState {
    clients: HashMap<u64, Client>,
    callbacks: Vec<RegisterCallback>,
}

impl HubState {
    fn register(&mut self, client: Client) {
        for callback in &self.callbacks {
            if !callback(&client.subscriptions, &client.queue) {
                // The snapshot alone overran the queue; dropping the client
                // here closes it before it ever joins the set.
                warn!(client = client.id, "dropping client during snapshot replay");
                return;
            }
        }
        debug!(client = client.id, subscriptions = ?client.subscriptions, "client registered");
        self.clients.insert(client.id, client);
    }

    fn broadcast(&mut self, channel: &'static str, message: Arc<Message>) {
        let mut evicted = Vec::new();
        for (id, client) in &self.clients {
            if !client.subscriptions.contains(channel) {
                continue;
            }
            match client.queue.try_send(message.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => evicted.push(*id),
            }
        }
        for id in evicted {
            self.clients.remove(&id);
            warn!(client = id, "dropping slow client");
        }
    }
}
