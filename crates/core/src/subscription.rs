//! `SubscriptionRegistry` (`spec.md` §4.3).
//!
//! Read-heavy, write-rare, so a single `RwLock<IndexMap<..>>` suffices.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use tokio::sync::RwLock;

use crate::action::ClientId;

/// A client's subscribed key set, or the universal wildcard.
#[derive(Debug, Clone, Default)]
enum KeySet {
    #[default]
    Empty,
    Wildcard,
    Keys(BTreeSet<String>),
}

/// Tracks per-client key subscriptions and enforces access control
/// (`spec.md` §3 Subscription, invariant 6).
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    clients: RwLock<IndexMap<ClientId, KeySet>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `subscribe(clientId, keys)` — `"*"` is accepted as a key to grant
    /// the wildcard; otherwise keys are unioned into the client's set.
    pub async fn subscribe(&self, client_id: ClientId, keys: impl IntoIterator<Item = String>) {
        let mut clients = self.clients.write().await;
        let entry = clients.entry(client_id).or_default();
        for key in keys {
            if key == "*" {
                *entry = KeySet::Wildcard;
                continue;
            }
            if matches!(entry, KeySet::Wildcard) {
                continue;
            }
            match entry {
                KeySet::Keys(set) => {
                    set.insert(key);
                }
                KeySet::Empty => {
                    let mut set = BTreeSet::new();
                    set.insert(key);
                    *entry = KeySet::Keys(set);
                }
                KeySet::Wildcard => unreachable!("handled above"),
            }
        }
    }

    /// `unsubscribe(clientId, keys?)` — `None` clears the client entirely.
    pub async fn unsubscribe(&self, client_id: ClientId, keys: Option<&[String]>) {
        let mut clients = self.clients.write().await;
        match keys {
            None => {
                clients.shift_remove(&client_id);
            }
            Some(keys) => {
                if let Some(entry) = clients.get_mut(&client_id) {
                    if let KeySet::Keys(set) = entry {
                        for key in keys {
                            set.remove(key);
                        }
                        if set.is_empty() {
                            clients.shift_remove(&client_id);
                        }
                    }
                    // Unsubscribing specific keys from a wildcard subscription
                    // is not expressible (the registry only records grants);
                    // callers wanting a narrower grant must unsubscribe fully
                    // then resubscribe with the keys they want to keep.
                }
            }
        }
    }

    /// Remove a client entirely (channel close/destroy, `spec.md` §3
    /// Lifecycle).
    pub async fn remove_client(&self, client_id: ClientId) {
        self.clients.write().await.shift_remove(&client_id);
    }

    /// `getSubscribedClients(stateKeys)` — clients whose subscriptions
    /// cover *any* of `state_keys`, for targeted broadcasts.
    pub async fn subscribed_clients(&self, state_keys: &[String]) -> Vec<ClientId> {
        let clients = self.clients.read().await;
        clients
            .iter()
            .filter(|(_, keys)| state_keys.iter().any(|k| key_set_covers(keys, k)))
            .map(|(id, _)| *id)
            .collect()
    }

    /// `isSubscribedToKey(clientId, k)` (`spec.md` invariant 6): true when
    /// `"*"`, any prefix segment of `k`, or any subscription of which `k`
    /// is itself a prefix, is present.
    pub async fn is_subscribed_to_key(&self, client_id: ClientId, key: &str) -> bool {
        let clients = self.clients.read().await;
        match clients.get(&client_id) {
            Some(keys) => key_set_covers(keys, key),
            None => false,
        }
    }

    /// Every currently subscribed client, for broadcasts of an untargeted
    /// mutation (no specific `keys`) that must reach anyone watching
    /// anything.
    pub async fn all_clients(&self) -> Vec<ClientId> {
        self.clients.read().await.keys().copied().collect()
    }

    pub async fn subscriptions(&self, client_id: ClientId) -> Vec<String> {
        let clients = self.clients.read().await;
        match clients.get(&client_id) {
            Some(KeySet::Wildcard) => vec!["*".to_owned()],
            Some(KeySet::Keys(set)) => set.iter().cloned().collect(),
            Some(KeySet::Empty) | None => Vec::new(),
        }
    }
}

/// Dotted-path prefix match in both directions: a subscription to `user`
/// covers `user.profile.name`, and — symmetrically — a subscription to
/// `user.profile.name` is treated as covering reads of the broader `user`
/// key a broadcast might be tagged with.
fn key_set_covers(keys: &KeySet, key: &str) -> bool {
    match keys {
        KeySet::Wildcard => true,
        KeySet::Empty => false,
        KeySet::Keys(set) => set.iter().any(|sub| dotted_prefix_match(sub, key)),
    }
}

fn dotted_prefix_match(subscription: &str, key: &str) -> bool {
    if subscription == key {
        return true;
    }
    let sub_segments: Vec<&str> = subscription.split('.').collect();
    let key_segments: Vec<&str> = key.split('.').collect();
    let common = sub_segments.len().min(key_segments.len());
    sub_segments[..common] == key_segments[..common]
}

#[cfg(test)]
#[path = "subscription_tests.rs"]
mod tests;
