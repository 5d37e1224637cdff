//! `ClientTracker` (`spec.md` §4.11): maps channel handles to stable
//! `ClientId`s and detects abrupt disconnects via a "destroyed" probe.
//!
//! A periodic background sweep over a snapshot of tracked entries,
//! evicting ones that fail a liveness check, rather than relying on
//! every caller to notice and clean up after itself.

use std::sync::Arc;

use indexmap::IndexMap;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use zubridge_core::prelude::{ClientId, CoreRuntime};

use crate::channel::ClientChannel;

struct ClientEntry {
    channel: Arc<dyn ClientChannel>,
}

/// Tracks every connected client's channel handle and reaps ones whose
/// channel reports itself destroyed.
pub struct ClientTracker {
    clients: RwLock<IndexMap<ClientId, ClientEntry>>,
    runtime: Arc<CoreRuntime>,
    cancel: CancellationToken,
}

impl ClientTracker {
    /// Spawns the periodic sweep task when
    /// `resourceManagement.enablePeriodicCleanup` is set (`spec.md` §6).
    pub fn new(runtime: Arc<CoreRuntime>) -> Arc<Self> {
        let this = Arc::new(Self { clients: RwLock::new(IndexMap::new()), runtime, cancel: CancellationToken::new() });

        if this.runtime.config().resource_management.enable_periodic_cleanup {
            spawn_reaper(Arc::clone(&this));
        }

        this
    }

    /// Register a newly connected client's channel and return its stable
    /// id. Forces an immediate sweep first if the tracker is already at
    /// `resourceManagement.maxSubscriptionManagers` (`spec.md` §6), so a
    /// burst of reconnects doesn't grow the table on dead entries alone.
    pub async fn register(self: &Arc<Self>, channel: Arc<dyn ClientChannel>) -> ClientId {
        if self.clients.read().await.len() >= self.runtime.config().resource_management.max_subscription_managers {
            self.sweep_destroyed().await;
        }

        let client_id = ClientId::new();
        self.clients.write().await.insert(client_id, ClientEntry { channel });
        client_id
    }

    pub async fn channel(&self, client_id: ClientId) -> Option<Arc<dyn ClientChannel>> {
        self.clients.read().await.get(&client_id).map(|e| Arc::clone(&e.channel))
    }

    /// Full teardown for a client that disconnected cleanly: drop its
    /// channel and clean up its subscriptions in the core.
    pub async fn remove(&self, client_id: ClientId) {
        self.clients.write().await.shift_remove(&client_id);
        self.runtime.remove_client(client_id).await;
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Evict every tracked client whose channel reports itself destroyed.
    /// Returns the evicted ids.
    pub async fn sweep_destroyed(&self) -> Vec<ClientId> {
        let destroyed: Vec<ClientId> = {
            let clients = self.clients.read().await;
            clients.iter().filter(|(_, entry)| entry.channel.is_destroyed()).map(|(id, _)| *id).collect()
        };
        for client_id in &destroyed {
            self.remove(*client_id).await;
        }
        destroyed
    }
}

impl Drop for ClientTracker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn spawn_reaper(tracker: Arc<ClientTracker>) {
    let interval = tracker.runtime.config().resource_management.cleanup_interval();
    let cancel = tracker.cancel.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let reaped = tracker.sweep_destroyed().await;
                    if !reaped.is_empty() {
                        tracing::info!(count = reaped.len(), "reaped destroyed client channels");
                    }
                }
            }
        }
    });
}

#[cfg(test)]
#[path = "tracker_tests.rs"]
mod tests;
