//! The push-style wire messages exchanged between a host and a client
//! (`spec.md` §6), shared here so `zubridge-host` and `zubridge-client`
//! speak the same wire contract without one depending on the other.
//!
//! Request/response traffic (`GetState`, `GetClientId`, `GetThunkState`,
//! `GetClientSubscriptions`) has no fire-and-forget shape worth modelling
//! as a variant here — a transport adapter calls the matching method on
//! `Bridge` or `ClientThunkProcessor`'s channel directly and marshals the
//! result through whatever RPC framing it already has; the binary framing
//! is explicitly out of scope.

use serde::{Deserialize, Serialize};

use crate::action::{Action, ActionId, ClientId};
use crate::thunk::ThunkId;
use crate::state_update_tracker::UpdateId;

/// A snapshot entry in `DispatchAck.active_thunks`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveThunkSummary {
    pub id: ThunkId,
    pub client_id: Option<ClientId>,
    pub parent_id: Option<ThunkId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HostMessage {
    StateUpdate { update_id: UpdateId, thunk_id: Option<ThunkId>, state: serde_json::Value },
    DispatchAck {
        action_id: ActionId,
        error: Option<String>,
        active_thunks: Vec<ActiveThunkSummary>,
        version: u64,
    },
    RegisterThunkAck { thunk_id: ThunkId, success: bool, error: Option<String> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    Dispatch { action: Action, parent_thunk_id: Option<ThunkId> },
    RegisterThunk {
        thunk_id: ThunkId,
        parent_id: Option<ThunkId>,
        #[serde(default)]
        bypass_thunk_lock: bool,
        #[serde(default)]
        bypass_access_control: bool,
    },
    /// `error` is absent on the happy path; a client whose thunk body
    /// raised sends it so the host's blocked `executeFn` fails the thunk
    /// instead of waiting out `actionCompletionTimeoutMs` for nothing.
    CompleteThunk {
        thunk_id: ThunkId,
        #[serde(default)]
        error: Option<String>,
    },
    StateUpdateAck { update_id: UpdateId, client_id: ClientId, thunk_id: Option<ThunkId> },
    Subscribe { keys: Vec<String> },
    Unsubscribe { keys: Option<Vec<String>> },
}

/// Answer to `GetThunkState()` (`spec.md` §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThunkStateSnapshot {
    pub version: u64,
    pub thunks: Vec<ActiveThunkSummary>,
}
