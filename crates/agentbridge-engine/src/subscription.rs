//! Subscription Fabric: per-project subscriber sets and non-blocking
//! fan-out broadcast.
//!
//! Grounded on the `Arc<RwLock<HashMap<...>>>` subscription map pattern in
//! `execution_manager.rs`, generalized from one broadcast channel per
//! conversation to one bounded `mpsc` per connection fanned out per
//! project — so a single slow connection can have its own frames dropped
//! without lagging or disconnecting every other subscriber the way a shared
//! `tokio::sync::broadcast` channel would.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};

use agentbridge_common::ids::{ConnectionId, ProjectId};
use agentbridge_wire::ServerMessage;

pub type OutboundSender = mpsc::Sender<ServerMessage>;

#[derive(Default)]
pub struct SubscriptionFabric {
    subscribers: RwLock<HashMap<ProjectId, HashMap<ConnectionId, OutboundSender>>>,
    messages_broadcast: AtomicU64,
    messages_dropped: AtomicU64,
}

impl SubscriptionFabric {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `(connection_id, project_id)` as a subscriber binding.
    pub async fn join(&self, project_id: ProjectId, connection_id: ConnectionId, sender: OutboundSender) {
        let mut subs = self.subscribers.write().await;
        subs.entry(project_id).or_default().insert(connection_id, sender);
    }

    /// Removes one binding.
    pub async fn leave(&self, project_id: ProjectId, connection_id: ConnectionId) {
        let mut subs = self.subscribers.write().await;
        if let Some(set) = subs.get_mut(&project_id) {
            set.remove(&connection_id);
            if set.is_empty() {
                subs.remove(&project_id);
            }
        }
    }

    /// Removes every binding for a connection. Called when the connection
    /// closes — a closed connection loses every project subscription it
    /// held, symmetric with removing a project clearing its subscribers.
    pub async fn remove_connection(&self, connection_id: ConnectionId) {
        let mut subs = self.subscribers.write().await;
        subs.retain(|_, set| {
            set.remove(&connection_id);
            !set.is_empty()
        });
    }

    /// Removes every binding for a deleted project.
    pub async fn remove_project(&self, project_id: ProjectId) {
        self.subscribers.write().await.remove(&project_id);
    }

    /// Non-blocking fan-out: each subscriber's queue gets a `try_send`.
    /// A full queue is counted and skipped — the subscriber is never
    /// dropped and no other subscriber is ever blocked on it.
    pub async fn broadcast(&self, project_id: ProjectId, message: ServerMessage) -> usize {
        let subs = self.subscribers.read().await;
        let Some(set) = subs.get(&project_id) else {
            return 0;
        };
        let mut delivered = 0;
        for sender in set.values() {
            match sender.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    self.messages_dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        self.messages_broadcast.fetch_add(1, Ordering::Relaxed);
        delivered
    }

    pub async fn subscriber_count(&self, project_id: ProjectId) -> usize {
        self.subscribers
            .read()
            .await
            .get(&project_id)
            .map_or(0, HashMap::len)
    }

    pub fn messages_broadcast(&self) -> u64 {
        self.messages_broadcast.load(Ordering::Relaxed)
    }

    pub fn messages_dropped(&self) -> u64 {
        self.messages_dropped.load(Ordering::Relaxed)
    }
}

pub type SharedSubscriptionFabric = Arc<SubscriptionFabric>;
