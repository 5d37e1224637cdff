//! `ActionQueueManager` (`spec.md` §4.8) — the single entry point for
//! every dispatched action.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

use tokio::sync::mpsc::UnboundedReceiver;

use crate::action::{Action, ActionId, ClientId};
use crate::action_executor::ActionExecutor;
use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::lifecycle::ThunkLifecycleManager;
use crate::scheduler::{LockState, Priority, TaskOutcome, ThunkScheduler, ThunkTask};
use crate::thunk::ThunkId;

/// Called once an action has finished executing, with its final
/// (possibly adapter-reported) error, if any.
pub type OnActionComplete = Box<dyn FnOnce(ActionId, Option<String>) + Send>;

pub struct ActionQueueManager {
    executor: Arc<ActionExecutor>,
    scheduler: Arc<ThunkScheduler>,
    lifecycle: Arc<ThunkLifecycleManager>,
    pending_by_thunk: RwLock<HashMap<ThunkId, HashSet<ActionId>>>,
    total_pending: AtomicUsize,
    config: Arc<CoreConfig>,
}

impl ActionQueueManager {
    /// Spawns a background drain loop over the scheduler's outcome
    /// channel so a lane freed by one finished task is re-dispatched
    /// without waiting for some unrelated caller to enqueue next.
    pub async fn new(
        executor: Arc<ActionExecutor>,
        scheduler: Arc<ThunkScheduler>,
        scheduler_outcomes: UnboundedReceiver<TaskOutcome>,
        lifecycle: Arc<ThunkLifecycleManager>,
        config: Arc<CoreConfig>,
    ) -> Arc<Self> {
        let this = Arc::new(Self {
            executor,
            scheduler,
            lifecycle,
            pending_by_thunk: RwLock::new(HashMap::new()),
            total_pending: AtomicUsize::new(0),
            config,
        });

        let drainer = Arc::clone(&this);
        tokio::spawn(async move {
            let mut outcomes = scheduler_outcomes;
            while outcomes.recv().await.is_some() {
                drainer.process_queue().await;
            }
        });

        this
    }

    /// Whether `thunk_id` still has actions in flight — the predicate
    /// `ThunkLifecycleManager::complete`/`is_fully_complete` need.
    pub async fn has_pending_actions(&self, thunk_id: ThunkId) -> bool {
        self.pending_by_thunk.read().await.get(&thunk_id).map(|set| !set.is_empty()).unwrap_or(false)
    }

    /// `enqueueAction(a, sourceClientId, parentThunkId?, onComplete?)`.
    pub async fn enqueue_action(
        self: &Arc<Self>,
        mut action: Action,
        source_client_id: Option<ClientId>,
        parent_thunk_id: Option<ThunkId>,
        on_complete: Option<OnActionComplete>,
    ) -> Result<ActionId, CoreError> {
        if self.total_pending.load(Ordering::Acquire) >= self.config.max_queue_size {
            return Err(CoreError::queue_overflow(format!(
                "queue is at capacity ({} pending)",
                self.config.max_queue_size
            )));
        }

        let action_id = action.ensure_id();
        action.source_client_id = source_client_id;
        if action.parent_thunk_id.is_none() {
            action.parent_thunk_id = parent_thunk_id;
        }

        // Bypass: run immediately, outside the queue entirely.
        if action.bypass_thunk_lock {
            self.run_now(action, None, on_complete).await;
            return Ok(action_id);
        }

        // Thunk-owned: the referenced thunk must exist and still be active.
        if let Some(thunk_id) = action.parent_thunk_id {
            if !self.lifecycle.thunk_exists(thunk_id).await {
                return Err(CoreError::validation(format!(
                    "action references unknown thunk {thunk_id}"
                )));
            }
            self.mark_pending(thunk_id, action_id).await;
            self.enqueue_task(action, thunk_id, Priority::Normal, on_complete).await;
            return Ok(action_id);
        }

        // Orphan action: run directly if the lock is free, else queue it
        // behind whoever holds it.
        let queue_is_idle = self.scheduler.get_queue_status().await.is_idle;
        let current_root = self.lifecycle.current_root().await;
        if current_root.is_none() && queue_is_idle {
            self.run_now(action, None, on_complete).await;
        } else {
            // Orphan tasks park in their own lane keyed by a fresh id so
            // they queue independently of whichever thunk holds the lock.
            let parking_lane = ThunkId::new();
            self.enqueue_task(action, parking_lane, Priority::Normal, on_complete).await;
        }
        Ok(action_id)
    }

    async fn mark_pending(&self, thunk_id: ThunkId, action_id: ActionId) {
        self.pending_by_thunk.write().await.entry(thunk_id).or_default().insert(action_id);
        self.total_pending.fetch_add(1, Ordering::AcqRel);
    }

    async fn run_now(self: &Arc<Self>, mut action: Action, thunk_id: Option<ThunkId>, on_complete: Option<OnActionComplete>) {
        let action_id = action.id.unwrap_or_else(|| action.ensure_id());
        if let Some(thunk_id) = thunk_id {
            self.mark_pending(thunk_id, action_id).await;
        }
        let executor = Arc::clone(&self.executor);
        let this = Arc::clone(self);
        let deadline = self.config.action_completion_timeout();
        tokio::spawn(async move {
            let error = Self::run_with_deadline(&executor, &mut action, deadline).await.err();
            this.finish(action_id, thunk_id, error, on_complete).await;
        });
    }

    /// The executor has no timeout of its own (an adapter whose
    /// completion never resolves would hang it forever) — every path
    /// that calls it wraps the call in `actionCompletionTimeoutMs`.
    async fn run_with_deadline(
        executor: &ActionExecutor,
        action: &mut Action,
        deadline: std::time::Duration,
    ) -> Result<(), String> {
        match tokio::time::timeout(deadline, executor.execute_action(action)).await {
            Ok(result) => result,
            Err(_) => Err(format!("action exceeded actionCompletionTimeoutMs ({}ms)", deadline.as_millis())),
        }
    }

    async fn enqueue_task(
        self: &Arc<Self>,
        action: Action,
        lane_thunk_id: ThunkId,
        priority: Priority,
        on_complete: Option<OnActionComplete>,
    ) {
        let task_id = self.scheduler.next_task_id();
        let seq = self.scheduler.next_seq();
        let executor = Arc::clone(&self.executor);
        let this = Arc::clone(self);
        let action_id = action.id.unwrap_or_default();
        let bypass = action.bypass_thunk_lock;
        let mut action = action;
        let deadline = self.config.action_completion_timeout();

        let handler: crate::scheduler::TaskHandler = Box::new(move || {
            Box::pin(async move {
                let result = Self::run_with_deadline(&executor, &mut action, deadline).await;
                this.finish(action_id, Some(lane_thunk_id), result.clone().err(), on_complete).await;
                result
            })
        });

        self.scheduler
            .enqueue(ThunkTask {
                task_id,
                thunk_id: lane_thunk_id,
                priority,
                can_run_concurrently: bypass,
                handler,
                created_at_seq: seq,
            })
            .await;

        // `enqueue` only appends to the lane; drive dispatch immediately
        // so a task bound to an already-admitted thunk (or one the lock
        // is free for) doesn't sit idle until some unrelated caller
        // happens to call `process_queue`.
        self.process_queue().await;
    }

    async fn finish(
        self: &Arc<Self>,
        action_id: ActionId,
        thunk_id: Option<ThunkId>,
        error: Option<String>,
        on_complete: Option<OnActionComplete>,
    ) {
        self.total_pending.fetch_sub(1, Ordering::AcqRel);
        let drained = if let Some(thunk_id) = thunk_id {
            let mut pending = self.pending_by_thunk.write().await;
            if let Some(set) = pending.get_mut(&thunk_id) {
                set.remove(&action_id);
                if set.is_empty() {
                    pending.remove(&thunk_id);
                    true
                } else {
                    false
                }
            } else {
                false
            }
        } else {
            false
        };

        if drained {
            if let Some(thunk_id) = thunk_id {
                self.lifecycle.try_finalize(thunk_id).await;
            }
        }

        if let Some(on_complete) = on_complete {
            on_complete(action_id, error);
        }
    }

    /// Drive the scheduler's eligible lanes given the current lock state.
    /// Callers (the bridge, `MainThunkProcessor`) invoke this after every
    /// lifecycle transition that might have changed eligibility.
    pub async fn process_queue(self: &Arc<Self>) {
        let lock_state = match self.lifecycle.current_root().await {
            None => LockState::default(),
            Some(root) => {
                LockState { current_root: Some(root), descendants_of_root: self.lifecycle.descendants(root).await }
            }
        };
        self.scheduler.process_queue(&lock_state).await;
    }
}

#[cfg(test)]
#[path = "action_queue_tests.rs"]
mod tests;
