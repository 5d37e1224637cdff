//! `Bridge` (`spec.md` §4.11) — the façade wiring a transport's
//! `ClientChannel`s to a `CoreRuntime`.
//!
//! One long-lived component holding the runtime plus a per-client table,
//! reacting to an async event stream (`StateManager::subscribe`'s
//! mutation callback) by fanning a message out to whichever clients care.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::{oneshot, Mutex};

use zubridge_core::prelude::{
    Action, ActionId, ClientAckFn, ClientId, CoreConfig, CoreError, CoreRuntime, ExecuteFn, OnActionComplete,
    StateManager, Thunk, ThunkId, ThunkOptions, UpdateId,
};
use zubridge_core::state_manager::SubscriptionHandle;

use crate::channel::ClientChannel;
use crate::messages::{ActiveThunkSummary, HostMessage};
use crate::tracker::ClientTracker;

/// A client-sourced thunk's completion is signalled by its `CompleteThunk`
/// message rather than produced by any host-side future, so the host's
/// `execute_fn` for it just waits on this channel.
type CompletionTx = oneshot::Sender<Result<(), String>>;

struct PendingClientThunk {
    client_id: ClientId,
    complete_tx: Option<CompletionTx>,
}

/// Wires `CoreRuntime` to however many `ClientChannel`s a transport has
/// open. Owns no framing: callers route whatever they parse off the wire
/// into `handle_*`, and push whatever `HostMessage`s come back (or were
/// handed to `ClientChannel::send` directly by a broadcast) to the wire.
pub struct Bridge {
    runtime: Arc<CoreRuntime>,
    tracker: Arc<ClientTracker>,
    version: AtomicU64,
    pending_client_thunks: Mutex<HashMap<ThunkId, PendingClientThunk>>,
    _state_subscription: Box<dyn SubscriptionHandle>,
}

impl Bridge {
    /// Assembles a `CoreRuntime` over `state_manager` and subscribes to
    /// its mutation stream so every applied action drives a broadcast,
    /// independent of whichever client (or host code) originated it.
    pub async fn new(state_manager: Arc<dyn StateManager>, config: CoreConfig) -> Arc<Self> {
        let runtime = CoreRuntime::new(Arc::clone(&state_manager), config).await;
        let tracker = ClientTracker::new(Arc::clone(&runtime));

        Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak = weak.clone();
            let subscription = state_manager.subscribe(Box::new(move |state| {
                let state = state.clone();
                let weak = weak.clone();
                tokio::spawn(async move {
                    if let Some(this) = weak.upgrade() {
                        let thunk_id = this.runtime.current_root().await;
                        this.broadcast_state(thunk_id, state).await;
                    }
                });
            }));

            Self {
                runtime,
                tracker,
                version: AtomicU64::new(0),
                pending_client_thunks: Mutex::new(HashMap::new()),
                _state_subscription: subscription,
            }
        })
    }

    /// A new channel connected; assigns and returns its `clientId`
    /// (`GetClientId` is answered by the transport handing this back, not
    /// a separate round trip).
    pub async fn connect_client(self: &Arc<Self>, channel: Arc<dyn ClientChannel>) -> ClientId {
        self.tracker.register(channel).await
    }

    /// Channel closed (cleanly or detected destroyed): drops its
    /// subscriptions and fails any thunk it never completed.
    pub async fn disconnect_client(self: &Arc<Self>, client_id: ClientId) {
        self.tracker.remove(client_id).await;
        self.fail_pending_thunks_for(client_id, "client disconnected before completing its thunk").await;
    }

    // ---- Action intake (`spec.md` §4.11 "Action intake path") ----

    /// `Dispatch { action, parentThunkId }`. Lazily registers an unknown
    /// `parentThunkId` (the host tolerates a `Dispatch` racing ahead of
    /// its own `RegisterThunk`, `spec.md` §4.12), enforces per-key access
    /// control unless `bypassAccessControl`, then enqueues the action and
    /// answers with a `DispatchAck` once it settles.
    pub async fn handle_dispatch(
        self: &Arc<Self>,
        client_id: ClientId,
        mut action: Action,
        parent_thunk_id: Option<ThunkId>,
    ) -> Result<(), CoreError> {
        let action_id = action.ensure_id();
        if let Some(thunk_id) = parent_thunk_id {
            self.runtime.ensure_thunk_placeholder(thunk_id, client_id).await;
        }
        action.parent_thunk_id = action.parent_thunk_id.or(parent_thunk_id);

        if !action.bypass_access_control {
            if let Some(keys) = &action.keys {
                for key in keys {
                    if !self.runtime.is_subscribed_to_key(client_id, key).await {
                        let error = CoreError::access_denied(client_id, key);
                        self.send_dispatch_ack(client_id, action_id, Some(error.to_string())).await;
                        return Err(error);
                    }
                }
            }
        }

        // The resulting broadcast is driven by the generic state-manager
        // subscription set up in `new`, not from here — that is the one
        // place that also sees host-initiated mutations dispatched
        // outside of `Bridge` entirely.
        let this = Arc::clone(self);
        let on_complete: OnActionComplete = Box::new(move |action_id, error| {
            tokio::spawn(async move {
                this.send_dispatch_ack(client_id, action_id, error).await;
            });
        });

        self.runtime
            .enqueue_client_action(action, client_id, parent_thunk_id, Some(on_complete))
            .await
            .map(|_| ())
    }

    async fn send_dispatch_ack(&self, client_id: ClientId, action_id: ActionId, error: Option<String>) {
        let active_thunks = self
            .runtime
            .thunk_state(None)
            .await
            .into_iter()
            .map(summarize_thunk)
            .collect();
        let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
        self.send_to(client_id, HostMessage::DispatchAck { action_id, error, active_thunks, version }).await;
    }

    /// Fan a mutation out to every subscribed client. The generic
    /// `StateManager::subscribe` callback carries no record of which keys
    /// a mutation touched, so recipients are every client with any
    /// subscription at all — coarser than a per-key invalidation, but the
    /// most this hook can know; access control on writes (`handle_dispatch`)
    /// is what actually scopes `keys` (`spec.md` invariant 6).
    async fn broadcast_state(&self, thunk_id: Option<ThunkId>, state: serde_json::Value) {
        let recipients = self.runtime.all_subscribed_clients().await;
        if recipients.is_empty() {
            return;
        }

        let update_id = self.runtime.begin_state_update(thunk_id, recipients.iter().copied()).await;
        for client_id in recipients {
            self.send_to(client_id, HostMessage::StateUpdate { update_id, thunk_id, state: state.clone() }).await;
        }
    }

    async fn send_to(&self, client_id: ClientId, message: HostMessage) {
        if let Some(channel) = self.tracker.channel(client_id).await {
            if let Err(err) = channel.send(message).await {
                tracing::warn!(%client_id, %err, "failed to deliver message to client channel");
            }
        }
    }

    // ---- Thunk lifecycle (`spec.md` §4.12) ----

    /// `RegisterThunk { thunkId, parentId?, bypassThunkLock?, bypassAccessControl? }`.
    /// The host only holds the lock; the thunk body runs on the client,
    /// which is why `execute_fn` here merely waits for `CompleteThunk`
    /// rather than running anything.
    pub async fn handle_register_thunk(
        self: &Arc<Self>,
        client_id: ClientId,
        thunk_id: ThunkId,
        parent_id: Option<ThunkId>,
        bypass_thunk_lock: bool,
        bypass_access_control: bool,
    ) {
        let (complete_tx, complete_rx) = oneshot::channel();
        self.pending_client_thunks
            .lock()
            .await
            .insert(thunk_id, PendingClientThunk { client_id, complete_tx: Some(complete_tx) });

        let options = ThunkOptions { keys: None, bypass_thunk_lock, bypass_access_control };

        let execute_fn: ExecuteFn = Box::new(move |_thunk_id| {
            Box::pin(async move { complete_rx.await.unwrap_or_else(|_| Err("bridge dropped before the thunk completed".to_owned())) })
        });

        let this = Arc::clone(self);
        let client_ack_fn: ClientAckFn = Box::new(move |thunk_id| {
            Box::pin(async move {
                this.send_to(client_id, HostMessage::RegisterThunkAck { thunk_id, success: true, error: None }).await;
            })
        });

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let (_, result) = this
                .runtime
                .register_client_thunk(thunk_id, parent_id, client_id, options, execute_fn, client_ack_fn)
                .await;
            this.pending_client_thunks.lock().await.remove(&thunk_id);
            if let Err(error) = result {
                this.send_to(client_id, HostMessage::RegisterThunkAck { thunk_id, success: false, error: Some(error) })
                    .await;
            }
        });
    }

    /// `CompleteThunk { thunkId, error? }` — the client finished running
    /// the thunk body (or its body raised) and every action it
    /// dispatched has already been acked.
    pub async fn handle_complete_thunk(self: &Arc<Self>, thunk_id: ThunkId, error: Option<String>) {
        let sender = self.pending_client_thunks.lock().await.get_mut(&thunk_id).and_then(|p| p.complete_tx.take());
        match error {
            Some(error) => {
                if let Some(sender) = sender {
                    let _ = sender.send(Err(error.clone()));
                }
                self.runtime.fail_thunk(thunk_id, error).await;
            }
            None => {
                if let Some(sender) = sender {
                    let _ = sender.send(Ok(()));
                }
                self.runtime.complete_thunk(thunk_id, None).await;
            }
        }
    }

    async fn fail_pending_thunks_for(&self, client_id: ClientId, reason: &str) {
        let mut pending = self.pending_client_thunks.lock().await;
        let owned: Vec<ThunkId> =
            pending.iter().filter(|(_, p)| p.client_id == client_id).map(|(id, _)| *id).collect();
        for thunk_id in owned {
            if let Some(mut entry) = pending.remove(&thunk_id) {
                if let Some(sender) = entry.complete_tx.take() {
                    let _ = sender.send(Err(reason.to_owned()));
                }
            }
        }
    }

    // ---- Subscriptions (`spec.md` §4.3) ----

    /// `Subscribe { keys }` — replies are pushed back by the caller using
    /// the returned snapshot; this crate has no opinion on the ack shape
    /// the transport uses for a subscribe confirmation.
    pub async fn handle_subscribe(&self, client_id: ClientId, keys: Vec<String>) -> serde_json::Value {
        self.runtime.subscribe(client_id, keys).await
    }

    pub async fn handle_unsubscribe(&self, client_id: ClientId, keys: Option<Vec<String>>) {
        self.runtime.unsubscribe(client_id, keys.as_deref()).await;
    }

    /// `StateUpdateAck { updateId, clientId, thunkId? }`.
    pub async fn handle_state_update_ack(self: &Arc<Self>, update_id: UpdateId, client_id: ClientId) {
        self.runtime.acknowledge_state_update(update_id, client_id).await;
    }

    // ---- Request/response surface (`spec.md` §6) ----
    //
    // These have no fire-and-forget shape worth modelling as a
    // `ClientMessage`/`HostMessage` pair — a transport adapter calls the
    // matching method and marshals the result through whatever RPC
    // framing it already has.

    pub fn get_state(&self) -> serde_json::Value {
        self.runtime.get_state()
    }

    pub async fn get_thunk_state(&self, thunk_id: Option<ThunkId>) -> Vec<Thunk> {
        self.runtime.thunk_state(thunk_id).await
    }

    pub async fn get_client_subscriptions(&self, client_id: ClientId) -> Vec<String> {
        self.runtime.client_subscriptions(client_id).await
    }
}

fn summarize_thunk(thunk: Thunk) -> ActiveThunkSummary {
    ActiveThunkSummary { id: thunk.id, client_id: thunk.source_client_id, parent_id: thunk.parent_id }
}

#[cfg(test)]
#[path = "bridge_tests.rs"]
mod tests;
