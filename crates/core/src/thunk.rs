//! The `Thunk` value object (`spec.md` §3, §4.1).

use std::collections::BTreeSet;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::action::ClientId;

/// Opaque thunk identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ThunkId(Uuid);

impl ThunkId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ThunkId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ThunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Where a thunk's body runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThunkSource {
    Host,
    Client,
}

/// Monotonic thunk lifecycle state (`spec.md` invariant 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThunkState {
    Pending,
    Executing,
    Completed,
    Failed,
}

impl ThunkState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Options a dispatcher supplies when creating a thunk (`spec.md` §4.10).
#[derive(Debug, Clone, Default)]
pub struct ThunkOptions {
    pub keys: Option<BTreeSet<String>>,
    pub bypass_thunk_lock: bool,
    pub bypass_access_control: bool,
}

/// Error produced by an illegal state transition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IllegalTransition {
    pub from: ThunkState,
    pub attempted: &'static str,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot {} a thunk in state {:?}", self.attempted, self.from)
    }
}

impl std::error::Error for IllegalTransition {}

/// A suspendable unit of work dispatching actions and child thunks, held
/// under the global thunk lock while executing (`spec.md` §3/§4.1).
#[derive(Debug, Clone)]
pub struct Thunk {
    pub id: ThunkId,
    pub parent_id: Option<ThunkId>,
    pub source_client_id: Option<ClientId>,
    pub source: ThunkSource,
    state: ThunkState,
    pub keys: Option<BTreeSet<String>>,
    pub bypass_thunk_lock: bool,
    pub bypass_access_control: bool,
    children: BTreeSet<ThunkId>,
    pub created_at_ms: u64,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl Thunk {
    pub fn new(
        parent_id: Option<ThunkId>,
        source_client_id: Option<ClientId>,
        source: ThunkSource,
        options: ThunkOptions,
    ) -> Self {
        Self::with_id(ThunkId::new(), parent_id, source_client_id, source, options)
    }

    /// Like `new`, but for thunks whose id was minted by a client before
    /// the host ever saw them (`spec.md` §4.12: the client must stamp its
    /// own dispatched actions with `parentThunkId` before the host's
    /// `RegisterThunkAck` round-trips back).
    pub fn with_id(
        id: ThunkId,
        parent_id: Option<ThunkId>,
        source_client_id: Option<ClientId>,
        source: ThunkSource,
        options: ThunkOptions,
    ) -> Self {
        Self {
            id,
            parent_id,
            source_client_id,
            source,
            state: ThunkState::Pending,
            keys: options.keys,
            bypass_thunk_lock: options.bypass_thunk_lock,
            bypass_access_control: options.bypass_access_control,
            children: BTreeSet::new(),
            created_at_ms: now_ms(),
            result: None,
            error: None,
        }
    }

    pub fn state(&self) -> ThunkState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn children(&self) -> impl Iterator<Item = &ThunkId> {
        self.children.iter()
    }

    pub fn add_child(&mut self, child_id: ThunkId) {
        self.children.insert(child_id);
    }

    /// `Pending -> Executing`. Refuses any other source state.
    pub fn activate(&mut self) -> Result<(), IllegalTransition> {
        match self.state {
            ThunkState::Pending => {
                self.state = ThunkState::Executing;
                Ok(())
            }
            other => Err(IllegalTransition { from: other, attempted: "activate" }),
        }
    }

    /// `Executing -> Completed`. A `Completed`/`Failed` thunk is terminal
    /// and refuses re-activation (`spec.md` invariant 4); a duplicate
    /// `complete` on an already-completed thunk is treated as idempotent
    /// rather than an error, since `ThunkLifecycleManager::complete` is
    /// itself documented as idempotent.
    pub fn complete(&mut self, result: Option<serde_json::Value>) -> Result<(), IllegalTransition> {
        match self.state {
            ThunkState::Executing => {
                self.state = ThunkState::Completed;
                self.result = result;
                Ok(())
            }
            ThunkState::Completed => Ok(()),
            other => Err(IllegalTransition { from: other, attempted: "complete" }),
        }
    }

    /// `Executing -> Failed`, or Pending -> Failed for a thunk that never
    /// got to run (its `executeFn` threw before activation completed).
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), IllegalTransition> {
        match self.state {
            ThunkState::Executing | ThunkState::Pending => {
                self.state = ThunkState::Failed;
                self.error = Some(error.into());
                Ok(())
            }
            ThunkState::Failed => Ok(()),
            other => Err(IllegalTransition { from: other, attempted: "fail" }),
        }
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}
