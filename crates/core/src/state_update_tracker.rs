//! `StateUpdateTracker` (`spec.md` §4.4).

use std::collections::BTreeSet;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use indexmap::IndexMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::action::ClientId;
use crate::thunk::ThunkId;

/// Opaque identifier for a single broadcast transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct UpdateId(Uuid);

impl UpdateId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UpdateId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UpdateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

/// Result of [`StateUpdateTracker::acknowledge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckOutcome {
    pub done: bool,
    pub thunk_id: Option<ThunkId>,
}

struct PendingStateUpdate {
    thunk_id: Option<ThunkId>,
    client_ids: BTreeSet<ClientId>,
    acknowledged_by: BTreeSet<ClientId>,
    created_at_ms: u64,
}

impl PendingStateUpdate {
    fn all_acked(&self) -> bool {
        self.client_ids.is_subset(&self.acknowledged_by)
    }
}

/// Tracks in-flight broadcasts and their acknowledgments (`spec.md`
/// invariant 3). A single `RwLock` guards the map, consistent with the
/// rest of the core's "single logical mutex" concurrency model (§5).
#[derive(Default)]
pub struct StateUpdateTracker {
    updates: RwLock<IndexMap<UpdateId, PendingStateUpdate>>,
}

impl StateUpdateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register_update(
        &self,
        update_id: UpdateId,
        thunk_id: Option<ThunkId>,
        client_ids: impl IntoIterator<Item = ClientId>,
    ) {
        let update = PendingStateUpdate {
            thunk_id,
            client_ids: client_ids.into_iter().collect(),
            acknowledged_by: BTreeSet::new(),
            created_at_ms: now_ms(),
        };
        self.updates.write().await.insert(update_id, update);
    }

    /// Record `client_id`'s ack. Returns whether every intended recipient
    /// has now acknowledged (and the update was therefore removed), plus
    /// the thunk it belonged to, if any — a caller needs that to re-check
    /// `isFullyComplete` once the update it was waiting on clears.
    pub async fn acknowledge(&self, update_id: UpdateId, client_id: ClientId) -> AckOutcome {
        let mut updates = self.updates.write().await;
        let Some(update) = updates.get_mut(&update_id) else {
            // Already reaped or unknown: treat as fully acked so callers
            // waiting on it don't block forever.
            return AckOutcome { done: true, thunk_id: None };
        };
        update.acknowledged_by.insert(client_id);
        let done = update.all_acked();
        let thunk_id = update.thunk_id;
        if done {
            updates.shift_remove(&update_id);
        }
        AckOutcome { done, thunk_id }
    }

    /// `hasPendingFor(thunkId)` — any update still outstanding for this
    /// thunk.
    pub async fn has_pending_for(&self, thunk_id: ThunkId) -> bool {
        self.updates.read().await.values().any(|u| u.thunk_id == Some(thunk_id))
    }

    /// Reap updates older than `max_age`, treating their outstanding acks
    /// as received. Idempotent: reaping twice is a no-op the second time.
    pub async fn cleanup_expired(&self, max_age: Duration) -> Vec<UpdateId> {
        let cutoff = now_ms().saturating_sub(max_age.as_millis() as u64);
        let mut updates = self.updates.write().await;
        let expired: Vec<UpdateId> = updates
            .iter()
            .filter(|(_, u)| u.created_at_ms <= cutoff)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            updates.shift_remove(id);
        }
        expired
    }

    #[cfg(test)]
    pub(crate) async fn pending_count(&self) -> usize {
        self.updates.read().await.len()
    }
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

#[cfg(test)]
#[path = "state_update_tracker_tests.rs"]
mod tests;
