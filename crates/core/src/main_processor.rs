//! `MainThunkProcessor` (`spec.md` §4.10) — executes thunks dispatched
//! inside the host process.

use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{oneshot, Mutex};

use crate::action::Action;
use crate::action_queue::{ActionQueueManager, OnActionComplete};
use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::lifecycle::{all_descendants_terminal, ThunkLifecycleManager};
use crate::registration_queue::{ExecuteFn, ThunkRegistrationQueue};
use crate::state_manager::StateManager;
use crate::state_update_tracker::StateUpdateTracker;
use crate::thunk::{ThunkId, ThunkOptions, ThunkSource};

/// A thunk body: receives a state reader and a dispatch closure, resolves
/// to the thunk's result value.
pub type ThunkBody = Box<
    dyn FnOnce(GetStateFn, DispatchFn) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, String>> + Send>>
        + Send,
>;
pub type GetStateFn = Arc<dyn Fn() -> serde_json::Value + Send + Sync>;
pub type DispatchFn =
    Arc<dyn Fn(Dispatchable) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, String>> + Send>> + Send + Sync>;

/// What a thunk body's `dispatch` closure can forward — a plain action or
/// a nested thunk, recursively (`spec.md` §4.10 step 3).
pub enum Dispatchable {
    Action(Action),
    Thunk(ThunkBody),
}

#[derive(Debug, Clone, Default)]
pub struct ProcessActionOptions {
    pub keys: Option<BTreeSet<String>>,
    pub bypass_thunk_lock: bool,
}

pub struct MainThunkProcessor {
    registration_queue: Arc<ThunkRegistrationQueue>,
    action_queue: Arc<ActionQueueManager>,
    lifecycle: Arc<ThunkLifecycleManager>,
    tracker: Arc<StateUpdateTracker>,
    state_manager: Arc<dyn StateManager>,
    config: Arc<CoreConfig>,
    /// Thunk ids whose first action has already been tagged
    /// `starts_thunk = true` (`spec.md` §4.10).
    started_thunks: Mutex<HashSet<ThunkId>>,
}

impl MainThunkProcessor {
    pub fn new(
        registration_queue: Arc<ThunkRegistrationQueue>,
        action_queue: Arc<ActionQueueManager>,
        lifecycle: Arc<ThunkLifecycleManager>,
        tracker: Arc<StateUpdateTracker>,
        state_manager: Arc<dyn StateManager>,
        config: Arc<CoreConfig>,
    ) -> Self {
        Self {
            registration_queue,
            action_queue,
            lifecycle,
            tracker,
            state_manager,
            config,
            started_thunks: Mutex::new(HashSet::new()),
        }
    }

    /// `executeThunk(fn, options?, parentId?)`.
    pub async fn execute_thunk(
        self: &Arc<Self>,
        body: ThunkBody,
        options: ThunkOptions,
        parent_id: Option<ThunkId>,
    ) -> Result<serde_json::Value, CoreError> {
        let (value_tx, value_rx) = oneshot::channel::<Result<serde_json::Value, String>>();
        let this = Arc::clone(self);

        let execute_fn: ExecuteFn = Box::new(move |thunk_id| {
            Box::pin(async move {
                let outcome = this.run_thunk_body(thunk_id, body).await;
                let ack = outcome.as_ref().map(|_| ()).map_err(Clone::clone);
                let _ = value_tx.send(outcome);
                ack
            })
        });

        let (thunk_id, registration_result) = self
            .registration_queue
            .register_thunk(parent_id, None, None, ThunkSource::Host, options, execute_fn, None)
            .await;

        registration_result.map_err(|err| CoreError::thunk_execution(thunk_id, err))?;

        let value = value_rx
            .await
            .unwrap_or_else(|_| Err("thunk dropped before producing a result".to_owned()))
            .map_err(|err| CoreError::thunk_execution(thunk_id, err))?;

        self.wait_for_full_completion(thunk_id).await?;
        Ok(value)
    }

    async fn run_thunk_body(
        self: &Arc<Self>,
        thunk_id: ThunkId,
        body: ThunkBody,
    ) -> Result<serde_json::Value, String> {
        let state_manager = Arc::clone(&self.state_manager);
        let get_state: GetStateFn = Arc::new(move || state_manager.get_state());

        let this = Arc::clone(self);
        let dispatch: DispatchFn = Arc::new(move |dispatchable| {
            let this = Arc::clone(&this);
            Box::pin(async move { this.dispatch_within(thunk_id, dispatchable).await })
        });

        let result = body(get_state, dispatch).await;
        if let Ok(value) = &result {
            let still_pending = self.still_pending(thunk_id).await;
            let value = value.clone();
            self.lifecycle.complete(thunk_id, Some(value), move || still_pending).await;
        }
        result
    }

    async fn dispatch_within(
        self: &Arc<Self>,
        parent_id: ThunkId,
        dispatchable: Dispatchable,
    ) -> Result<serde_json::Value, String> {
        match dispatchable {
            Dispatchable::Thunk(body) => {
                self.execute_thunk(body, ThunkOptions::default(), Some(parent_id))
                    .await
                    .map_err(|err| err.to_string())
            }
            Dispatchable::Action(mut action) => {
                action.parent_thunk_id = Some(parent_id);
                action.is_from_host = true;
                action.starts_thunk = self.mark_starts_thunk_if_first(parent_id).await;

                let (tx, rx) = oneshot::channel();
                let on_complete: OnActionComplete = Box::new(move |_id, error| {
                    let _ = tx.send(error);
                });

                self.action_queue
                    .enqueue_action(action, None, Some(parent_id), Some(on_complete))
                    .await
                    .map_err(|err| err.to_string())?;

                match rx.await {
                    Ok(Some(error)) => Err(error),
                    _ => Ok(serde_json::Value::Null),
                }
            }
        }
    }

    /// `processAction(a, options?)` — the non-thunk helper for
    /// host-initiated actions.
    pub async fn process_action(&self, mut action: Action, options: ProcessActionOptions) -> Result<(), CoreError> {
        action.is_from_host = true;
        action.bypass_thunk_lock = options.bypass_thunk_lock;
        if options.keys.is_some() {
            action.keys = options.keys;
        }
        self.action_queue.enqueue_action(action, None, None, None).await?;
        Ok(())
    }

    async fn still_pending(&self, thunk_id: ThunkId) -> bool {
        self.action_queue.has_pending_actions(thunk_id).await
            || !all_descendants_terminal(&self.lifecycle, thunk_id).await
            || self.tracker.has_pending_for(thunk_id).await
    }

    async fn mark_starts_thunk_if_first(&self, thunk_id: ThunkId) -> bool {
        self.started_thunks.lock().await.insert(thunk_id)
    }

    /// Waits for `isFullyComplete(thunkId)`, signalled rather than polled,
    /// bounded by `actionCompletionTimeoutMs`.
    async fn wait_for_full_completion(&self, thunk_id: ThunkId) -> Result<(), CoreError> {
        let deadline = tokio::time::Instant::now() + self.config.action_completion_timeout();

        loop {
            if self.check_fully_complete(thunk_id).await {
                return Ok(());
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                self.lifecycle
                    .fail(thunk_id, "thunk did not fully complete before actionCompletionTimeoutMs elapsed")
                    .await;
                return Err(CoreError::timeout(format!(
                    "thunk {thunk_id} did not fully complete in time"
                )));
            }
            let _ = tokio::time::timeout(remaining, self.lifecycle.wait_for_completion_signal()).await;
        }
    }

    async fn check_fully_complete(&self, thunk_id: ThunkId) -> bool {
        let pending_actions = self.action_queue.has_pending_actions(thunk_id).await;
        let pending_updates = self.tracker.has_pending_for(thunk_id).await;
        self.lifecycle.is_fully_complete(thunk_id, || pending_actions, || pending_updates).await
    }
}

#[cfg(test)]
#[path = "main_processor_tests.rs"]
mod tests;
