//! `ThunkLifecycleManager` (`spec.md` §4.7).
//!
//! Owns the registry of all thunks, the identity of the current root, and
//! the thunk lock itself — the Design Notes §9 "ThunkLockManager" open
//! question is resolved by fusing the lock into this component rather
//! than splitting it out, since only one of the source's several
//! `ThunkManager` variants used a separate lock manager.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use tokio::sync::{Notify, RwLock};

use crate::events::{EventBus, ThunkEvent};
use crate::scheduler::ThunkScheduler;
use crate::thunk::{IllegalTransition, Thunk, ThunkId, ThunkOptions, ThunkSource, ThunkState};
use crate::action::ClientId;

struct Entry {
    thunk: Thunk,
    completion_requested: bool,
    failure: Option<String>,
}

/// Failure modes for `execute()`, the only lifecycle operation that can
/// be called against an id the registry has never seen (a late-arriving
/// `Dispatch` for a thunk the bridge hasn't registered yet, per `spec.md`
/// §4.11 "Action intake path").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecuteError {
    UnknownThunk(ThunkId),
    IllegalTransition(IllegalTransition),
}

impl fmt::Display for ExecuteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownThunk(id) => write!(f, "no such thunk: {id}"),
            Self::IllegalTransition(err) => fmt::Display::fmt(err, f),
        }
    }
}

impl std::error::Error for ExecuteError {}

impl From<IllegalTransition> for ExecuteError {
    fn from(err: IllegalTransition) -> Self {
        Self::IllegalTransition(err)
    }
}

/// Registry, current-root tracker, and lock for all thunks in a single
/// `CoreRuntime`.
pub struct ThunkLifecycleManager {
    thunks: RwLock<IndexMap<ThunkId, Entry>>,
    current_root: RwLock<Option<ThunkId>>,
    events: EventBus,
    /// Signalled whenever any thunk reaches full completion, so
    /// `MainThunkProcessor`/`ThunkRegistrationQueue` can wait without
    /// polling (Design Notes §9's "signalled completion" resolution).
    completion_notify: Notify,
    /// Purged of a thunk's remaining lane on finalization (`spec.md`
    /// §4.7 "remove tasks from scheduler").
    scheduler: Arc<ThunkScheduler>,
}

impl ThunkLifecycleManager {
    pub fn new(events: EventBus, scheduler: Arc<ThunkScheduler>) -> Self {
        Self {
            thunks: RwLock::new(IndexMap::new()),
            current_root: RwLock::new(None),
            events,
            completion_notify: Notify::new(),
            scheduler,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub async fn current_root(&self) -> Option<ThunkId> {
        *self.current_root.read().await
    }

    /// Every live descendant of `thunk_id`, used by the scheduler's
    /// lock-gating rule (`spec.md` §4.6).
    pub async fn descendants(&self, thunk_id: ThunkId) -> Vec<ThunkId> {
        let thunks = self.thunks.read().await;
        let mut out = Vec::new();
        let mut frontier = vec![thunk_id];
        while let Some(id) = frontier.pop() {
            if let Some(entry) = thunks.get(&id) {
                for child in entry.thunk.children() {
                    out.push(*child);
                    frontier.push(*child);
                }
            }
        }
        out
    }

    /// `register(thunk, ...)` — inserts in `Pending`, links to parent,
    /// emits `ThunkRegistered`.
    pub async fn register(
        &self,
        parent_id: Option<ThunkId>,
        source_client_id: Option<ClientId>,
        source: ThunkSource,
        options: ThunkOptions,
    ) -> ThunkId {
        self.register_with_id(ThunkId::new(), parent_id, source_client_id, source, options).await
    }

    /// Like `register`, but for a thunk id minted by the caller rather
    /// than here — the client-sourced thunk flow (`spec.md` §4.12) needs
    /// the id before the host has registered anything. Registering twice
    /// under the same id is idempotent: the second call is a no-op and
    /// returns the existing id.
    pub async fn register_with_id(
        &self,
        id: ThunkId,
        parent_id: Option<ThunkId>,
        source_client_id: Option<ClientId>,
        source: ThunkSource,
        options: ThunkOptions,
    ) -> ThunkId {
        if self.thunks.read().await.contains_key(&id) {
            return id;
        }

        let thunk = Thunk::with_id(id, parent_id, source_client_id, source, options);
        let thunk_id = thunk.id;

        {
            let mut thunks = self.thunks.write().await;
            if let Some(parent_id) = parent_id {
                if let Some(parent) = thunks.get_mut(&parent_id) {
                    parent.thunk.add_child(thunk_id);
                }
            }
            thunks.insert(thunk_id, Entry { thunk, completion_requested: false, failure: None });
        }

        self.events.emit(ThunkEvent::Registered { thunk_id, parent_id }).await;
        thunk_id
    }

    /// `execute(thunkId)` — `Pending -> Executing`; claims the root slot
    /// if none is held and the thunk does not bypass the lock.
    pub async fn execute(&self, thunk_id: ThunkId) -> Result<(), ExecuteError> {
        let (is_root_candidate, bypass) = {
            let mut thunks = self.thunks.write().await;
            let entry = thunks.get_mut(&thunk_id).ok_or(ExecuteError::UnknownThunk(thunk_id))?;
            entry.thunk.activate()?;
            (entry.thunk.is_root(), entry.thunk.bypass_thunk_lock)
        };

        self.events.emit(ThunkEvent::Started { thunk_id }).await;

        if is_root_candidate && !bypass {
            let mut root = self.current_root.write().await;
            if root.is_none() {
                *root = Some(thunk_id);
                drop(root);
                self.events.emit(ThunkEvent::RootChanged { thunk_id: Some(thunk_id) }).await;
            }
        }

        Ok(())
    }

    /// `complete(thunkId, result?)` — a *request*. Finalizes immediately
    /// if there is nothing else outstanding; otherwise the request is
    /// recorded and `try_finalize` (invoked from `handle_action_complete`/
    /// `on_state_acknowledged`) drives it to completion later.
    pub async fn complete(
        self: &Arc<Self>,
        thunk_id: ThunkId,
        result: Option<serde_json::Value>,
        still_pending: impl Fn() -> bool,
    ) {
        {
            let mut thunks = self.thunks.write().await;
            let Some(entry) = thunks.get_mut(&thunk_id) else { return };
            if entry.thunk.is_terminal() {
                return; // idempotent
            }
            entry.completion_requested = true;
            entry.thunk.result = result;
        }

        if !still_pending() {
            self.try_finalize(thunk_id).await;
        }
    }

    /// `fail(thunkId, error)` — immediate, does not cascade to children
    /// (`spec.md` §9 resolved open question).
    pub async fn fail(self: &Arc<Self>, thunk_id: ThunkId, error: impl Into<String>) {
        let error = error.into();
        let was_root = {
            let mut thunks = self.thunks.write().await;
            let Some(entry) = thunks.get_mut(&thunk_id) else { return };
            if entry.thunk.fail(error.clone()).is_err() {
                return; // already terminal; idempotent
            }
            entry.failure = Some(error.clone());
            *self.current_root.read().await == Some(thunk_id)
        };

        self.scheduler.remove_tasks(thunk_id).await;
        self.events.emit(ThunkEvent::Failed { thunk_id, error }).await;
        self.finish_root_if_applicable(thunk_id, was_root).await;
        self.completion_notify.notify_waiters();
    }

    /// Re-evaluate whether `thunk_id` can now finalize — called after an
    /// action drains or a state update acks (`spec.md` §4.7, §4.8).
    pub async fn try_finalize(self: &Arc<Self>, thunk_id: ThunkId) {
        let was_root = {
            let mut thunks = self.thunks.write().await;
            let Some(entry) = thunks.get_mut(&thunk_id) else { return };
            if !entry.completion_requested || entry.thunk.is_terminal() {
                return;
            }
            let result = entry.thunk.result.clone();
            if entry.thunk.complete(result).is_err() {
                return;
            }
            *self.current_root.read().await == Some(thunk_id)
        };

        self.scheduler.remove_tasks(thunk_id).await;
        self.events.emit(ThunkEvent::Completed { thunk_id }).await;
        self.finish_root_if_applicable(thunk_id, was_root).await;
        self.completion_notify.notify_waiters();
    }

    async fn finish_root_if_applicable(&self, thunk_id: ThunkId, was_root: bool) {
        if was_root {
            *self.current_root.write().await = None;
            self.events.emit(ThunkEvent::RootChanged { thunk_id: None }).await;
            self.events.emit(ThunkEvent::RootCompleted { thunk_id }).await;
        }
    }

    /// `isFullyComplete(thunkId)` (`spec.md` invariant 5): terminal, no
    /// pending actions, no pending state updates. The action/update
    /// predicates are injected since those queues live in sibling
    /// components (`ActionQueueManager`, `StateUpdateTracker`).
    pub async fn is_fully_complete(
        &self,
        thunk_id: ThunkId,
        has_pending_actions: impl Fn() -> bool,
        has_pending_updates: impl Fn() -> bool,
    ) -> bool {
        let terminal = self.thunks.read().await.get(&thunk_id).map(|e| e.thunk.is_terminal()).unwrap_or(false);
        terminal && !has_pending_actions() && !has_pending_updates()
    }

    /// `canProcessImmediately(a)` — true when the action bypasses the
    /// lock, or nothing is queued.
    pub async fn can_process_immediately(&self, bypass_thunk_lock: bool, queue_is_idle: bool) -> bool {
        bypass_thunk_lock || queue_is_idle
    }

    pub async fn thunk_exists(&self, thunk_id: ThunkId) -> bool {
        self.thunks.read().await.contains_key(&thunk_id)
    }

    pub async fn thunk_state(&self, thunk_id: ThunkId) -> Option<ThunkState> {
        self.thunks.read().await.get(&thunk_id).map(|e| e.thunk.state())
    }

    pub async fn snapshot(&self, thunk_id: ThunkId) -> Option<Thunk> {
        self.thunks.read().await.get(&thunk_id).map(|e| e.thunk.clone())
    }

    /// All thunks with `state = Executing`, for `GetThunkState` (`spec.md`
    /// §6).
    pub async fn active_thunks(&self) -> Vec<Thunk> {
        self.thunks
            .read()
            .await
            .values()
            .filter(|e| matches!(e.thunk.state(), ThunkState::Executing | ThunkState::Pending))
            .map(|e| e.thunk.clone())
            .collect()
    }

    /// Wait until `notified()` observes a completion signal, bounded by
    /// an external timeout applied by the caller (`MainThunkProcessor`).
    pub async fn wait_for_completion_signal(&self) {
        self.completion_notify.notified().await;
    }

    pub async fn evict(&self, thunk_id: ThunkId) {
        self.thunks.write().await.shift_remove(&thunk_id);
    }

    #[cfg(test)]
    pub(crate) async fn is_terminal(&self, thunk_id: ThunkId) -> bool {
        self.thunks.read().await.get(&thunk_id).map(|e| e.thunk.is_terminal()).unwrap_or(false)
    }
}

/// Children collected via breadth-first traversal all terminal, used by
/// callers assembling `isFullyComplete` predicates that must also check
/// descendants (parents stay `Executing` while descendants run, per
/// `spec.md` §4.7 tie-break).
pub async fn all_descendants_terminal(manager: &ThunkLifecycleManager, thunk_id: ThunkId) -> bool {
    let descendants = manager.descendants(thunk_id).await;
    for id in descendants {
        if let Some(state) = manager.thunk_state(id).await {
            if !state.is_terminal() {
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
