//! `Action` and related identifiers (`spec.md` §3, §9 "Dynamic action shapes").

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::thunk::ThunkId;

/// Opaque action identifier, assigned at the boundary if the dispatcher
/// omits one (`spec.md` §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActionId(Uuid);

impl ActionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ActionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Stable identifier for a client process, assigned on channel handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClientId(Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// A named intent to mutate state, modelled as a tagged record with a
/// compulsory `type` string and an opaque JSON payload rather than the
/// source system's open-ended record (Design Notes §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    /// Absent when a client dispatches an action without one; the first
    /// component to touch it (`ActionQueueManager::enqueue_action`, or
    /// `ActionExecutor` for a directly-constructed test action) assigns
    /// one via `ensure_id`.
    #[serde(default)]
    pub id: Option<ActionId>,
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    #[serde(default)]
    pub source_client_id: Option<ClientId>,
    #[serde(default)]
    pub parent_thunk_id: Option<ThunkId>,
    #[serde(default)]
    pub starts_thunk: bool,
    #[serde(default)]
    pub ends_thunk: bool,
    #[serde(default)]
    pub is_from_host: bool,
    #[serde(default)]
    pub bypass_thunk_lock: bool,
    #[serde(default)]
    pub bypass_access_control: bool,
    #[serde(default)]
    pub keys: Option<BTreeSet<String>>,
}

impl Action {
    /// Construct an action with only the required `type`; `id` is
    /// assigned immediately (callers that must accept a caller-supplied
    /// id use `with_id`).
    pub fn new(action_type: impl Into<String>) -> Self {
        Self {
            id: Some(ActionId::new()),
            action_type: action_type.into(),
            payload: None,
            source_client_id: None,
            parent_thunk_id: None,
            starts_thunk: false,
            ends_thunk: false,
            is_from_host: false,
            bypass_thunk_lock: false,
            bypass_access_control: false,
            keys: None,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_keys(mut self, keys: BTreeSet<String>) -> Self {
        self.keys = Some(keys);
        self
    }

    pub fn bypassing_thunk_lock(mut self) -> Self {
        self.bypass_thunk_lock = true;
        self
    }

    /// Assign an id if the dispatcher didn't supply one, and return it.
    pub fn ensure_id(&mut self) -> ActionId {
        *self.id.get_or_insert_with(ActionId::new)
    }
}
