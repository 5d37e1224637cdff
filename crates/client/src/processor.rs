//! `ClientThunkProcessor` (`spec.md` §4.12) — symmetric to
//! `zubridge_core::main_processor::MainThunkProcessor`, except the store
//! lives across the channel in the host process rather than locally.
//!
//! Grounded in the host-side `MainThunkProcessor`: the same `ThunkBody`/
//! `GetStateFn`/`DispatchFn` shapes drive the thunk body here too, so a
//! body closure is oblivious to whether it ends up running host-side or
//! client-side. What differs is what `getState`/`dispatch` actually do:
//! here they read a local cache and round-trip a message, instead of
//! touching a `StateManager` directly.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock as StdRwLock};

use tokio::sync::{oneshot, Mutex, OnceCell};

use zubridge_core::prelude::{
    Action, ActionId, ClientId, ClientMessage, Dispatchable, DispatchFn, GetStateFn, HostMessage,
    ThunkBody, ThunkId, ThunkOptions, ThunkStateSnapshot,
};

use crate::channel::HostChannel;
use crate::error::ClientError;

pub struct ClientThunkProcessor {
    channel: Arc<dyn HostChannel>,
    client_id: OnceCell<ClientId>,
    state_cache: StdRwLock<serde_json::Value>,
    pending_dispatch_acks: Mutex<HashMap<ActionId, oneshot::Sender<Result<(), String>>>>,
    pending_register_acks: Mutex<HashMap<ThunkId, oneshot::Sender<Result<(), String>>>>,
    /// Mirrors `MainThunkProcessor.started_thunks`: the first action
    /// dispatched under a thunk is tagged `startsThunk = true`.
    started_thunks: Mutex<HashSet<ThunkId>>,
}

impl ClientThunkProcessor {
    pub fn new(channel: Arc<dyn HostChannel>) -> Arc<Self> {
        Arc::new(Self {
            channel,
            client_id: OnceCell::new(),
            state_cache: StdRwLock::new(serde_json::Value::Null),
            pending_dispatch_acks: Mutex::new(HashMap::new()),
            pending_register_acks: Mutex::new(HashMap::new()),
            started_thunks: Mutex::new(HashSet::new()),
        })
    }

    /// Route a `HostMessage` pushed in off the wire: resolves whichever
    /// pending ack it answers, and folds a `StateUpdate` into the local
    /// cache `get_state` reads from.
    pub async fn handle_host_message(&self, message: HostMessage) {
        match message {
            HostMessage::StateUpdate { update_id, thunk_id, state } => {
                *self.state_cache.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = state;
                match self.resolve_client_id().await {
                    Ok(client_id) => {
                        let ack = ClientMessage::StateUpdateAck { update_id, client_id, thunk_id };
                        if let Err(err) = self.channel.send(ack).await {
                            tracing::warn!(%err, "failed to ack state update");
                        }
                    }
                    Err(err) => tracing::warn!(%err, "dropping state update ack: client id unresolved"),
                }
            }
            HostMessage::DispatchAck { action_id, error, .. } => {
                if let Some(tx) = self.pending_dispatch_acks.lock().await.remove(&action_id) {
                    let _ = tx.send(error.map_or(Ok(()), Err));
                }
            }
            HostMessage::RegisterThunkAck { thunk_id, success, error } => {
                if let Some(tx) = self.pending_register_acks.lock().await.remove(&thunk_id) {
                    let result =
                        if success { Ok(()) } else { Err(error.unwrap_or_else(|| "registration rejected".to_owned())) };
                    let _ = tx.send(result);
                }
            }
        }
    }

    /// `dispatch(action|thunk, options?)`.
    pub async fn dispatch(
        self: &Arc<Self>,
        dispatchable: Dispatchable,
        options: ThunkOptions,
    ) -> Result<serde_json::Value, ClientError> {
        match dispatchable {
            Dispatchable::Action(mut action) => {
                action.bypass_thunk_lock |= options.bypass_thunk_lock;
                action.bypass_access_control |= options.bypass_access_control;
                if options.keys.is_some() {
                    action.keys = options.keys;
                }
                self.dispatch_action(action, None).await?;
                Ok(serde_json::Value::Null)
            }
            Dispatchable::Thunk(body) => self.execute_thunk(body, options, None).await,
        }
    }

    /// A plain action, sent and awaited — no thunk registration involved.
    async fn dispatch_action(
        &self,
        mut action: Action,
        parent_thunk_id: Option<ThunkId>,
    ) -> Result<(), ClientError> {
        let action_id = action.ensure_id();
        action.parent_thunk_id = action.parent_thunk_id.or(parent_thunk_id);
        let (tx, rx) = oneshot::channel();
        self.pending_dispatch_acks.lock().await.insert(action_id, tx);

        if let Err(err) = self.channel.send(ClientMessage::Dispatch { action, parent_thunk_id }).await {
            self.pending_dispatch_acks.lock().await.remove(&action_id);
            return Err(ClientError::Channel(err));
        }

        rx.await
            .unwrap_or_else(|_| Err("host closed before acking the dispatch".to_owned()))
            .map_err(ClientError::Rejected)
    }

    /// Registers the thunk with the host, runs its body, then reports
    /// completion — `RegisterThunk` → await `RegisterThunkAck` → run body
    /// (routing every emitted action/nested thunk back through the host)
    /// → `CompleteThunk`.
    pub async fn execute_thunk(
        self: &Arc<Self>,
        body: ThunkBody,
        options: ThunkOptions,
        parent_id: Option<ThunkId>,
    ) -> Result<serde_json::Value, ClientError> {
        let thunk_id = ThunkId::new();
        let (tx, rx) = oneshot::channel();
        self.pending_register_acks.lock().await.insert(thunk_id, tx);

        let register = ClientMessage::RegisterThunk {
            thunk_id,
            parent_id,
            bypass_thunk_lock: options.bypass_thunk_lock,
            bypass_access_control: options.bypass_access_control,
        };
        if let Err(err) = self.channel.send(register).await {
            self.pending_register_acks.lock().await.remove(&thunk_id);
            return Err(ClientError::Channel(err));
        }

        rx.await
            .unwrap_or_else(|_| Err("host closed before acking the registration".to_owned()))
            .map_err(ClientError::Rejected)?;

        let this = Arc::clone(self);
        let get_state: GetStateFn = Arc::new(move || this.get_state());

        let this = Arc::clone(self);
        let dispatch: DispatchFn = Arc::new(move |dispatchable| {
            let this = Arc::clone(&this);
            Box::pin(async move { this.dispatch_within(thunk_id, dispatchable).await })
        });

        let result = body(get_state, dispatch).await;
        let error = result.as_ref().err().cloned();
        if let Err(err) = self.channel.send(ClientMessage::CompleteThunk { thunk_id, error }).await {
            tracing::warn!(%err, %thunk_id, "failed to report thunk completion");
        }
        result.map_err(ClientError::Rejected)
    }

    async fn dispatch_within(
        self: &Arc<Self>,
        parent_id: ThunkId,
        dispatchable: Dispatchable,
    ) -> Result<serde_json::Value, String> {
        match dispatchable {
            Dispatchable::Thunk(body) => {
                self.execute_thunk(body, ThunkOptions::default(), Some(parent_id)).await.map_err(|err| err.to_string())
            }
            Dispatchable::Action(mut action) => {
                action.parent_thunk_id = Some(parent_id);
                action.starts_thunk = self.mark_starts_thunk_if_first(parent_id).await;
                self.dispatch_action(action, Some(parent_id)).await.map_err(|err| err.to_string())?;
                Ok(serde_json::Value::Null)
            }
        }
    }

    async fn mark_starts_thunk_if_first(&self, thunk_id: ThunkId) -> bool {
        self.started_thunks.lock().await.insert(thunk_id)
    }

    pub async fn subscribe(&self, keys: Vec<String>) -> Result<(), ClientError> {
        self.channel.send(ClientMessage::Subscribe { keys }).await.map_err(ClientError::Channel)
    }

    pub async fn unsubscribe(&self, keys: Option<Vec<String>>) -> Result<(), ClientError> {
        self.channel.send(ClientMessage::Unsubscribe { keys }).await.map_err(ClientError::Channel)
    }

    /// The locally cached mirror of host state, fed by pushed
    /// `StateUpdate`s. Backs `GetStateFn` inside a thunk body, which must
    /// resolve synchronously and so cannot itself round-trip the
    /// channel; use `request_state` for an authoritative read before a
    /// subscription has seeded the cache.
    pub fn get_state(&self) -> serde_json::Value {
        self.state_cache.read().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    pub async fn request_state(&self) -> Result<serde_json::Value, ClientError> {
        self.channel.request_state().await.map_err(ClientError::Channel)
    }

    pub async fn request_thunk_state(&self) -> Result<ThunkStateSnapshot, ClientError> {
        self.channel.request_thunk_state().await.map_err(ClientError::Channel)
    }

    pub async fn request_client_subscriptions(&self, client_id: ClientId) -> Result<Vec<String>, ClientError> {
        self.channel.request_client_subscriptions(client_id).await.map_err(ClientError::Channel)
    }

    pub async fn client_id(&self) -> Result<ClientId, ClientError> {
        self.resolve_client_id().await
    }

    async fn resolve_client_id(&self) -> Result<ClientId, ClientError> {
        self.client_id
            .get_or_try_init(|| async { self.channel.request_client_id().await })
            .await
            .map(|id| *id)
            .map_err(ClientError::Channel)
    }
}

#[cfg(test)]
#[path = "processor_tests.rs"]
mod tests;
