//! `ThunkScheduler` (`spec.md` §4.6).
//!
//! A priority queue of `ThunkTask`s gated by whichever thunk currently
//! holds the lock. Priorities order only across independent thunk trees;
//! within one thunk, enqueue order (FIFO) is preserved regardless of
//! priority, so each thunk gets its own FIFO lane and priority only picks
//! which thunk's head-of-line task runs next.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use tokio::sync::RwLock;

use crate::thunk::ThunkId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low,
    Normal,
    High,
}

pub type TaskHandler =
    Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = Result<(), String>> + Send>> + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

/// One unit of scheduled work bound to a thunk.
pub struct ThunkTask {
    pub task_id: TaskId,
    pub thunk_id: ThunkId,
    pub priority: Priority,
    pub can_run_concurrently: bool,
    pub handler: TaskHandler,
    pub created_at_seq: u64,
}

#[derive(Debug, Default)]
pub struct QueueStatus {
    pub is_idle: bool,
}

/// Outcome of one dispatched task, delivered via the scheduler's
/// completion channel (`on('taskCompleted'|'taskFailed', h)` in
/// `spec.md`, modelled here as an mpsc stream rather than a generic event
/// emitter since every consumer wants exactly this one message shape).
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Completed { task_id: TaskId, thunk_id: ThunkId },
    Failed { task_id: TaskId, thunk_id: ThunkId, error: String },
}

struct Lane {
    tasks: VecDeque<ThunkTask>,
    running: bool,
}

/// Current root-lock state as seen by the scheduler. The scheduler does
/// not own the lock itself (`ThunkLifecycleManager` does, per Design
/// Notes §9) — it only needs to know who holds it and who descends from
/// them to decide eligibility.
#[derive(Debug, Clone, Default)]
pub struct LockState {
    pub current_root: Option<ThunkId>,
    pub descendants_of_root: Vec<ThunkId>,
}

impl LockState {
    fn admits(&self, thunk_id: ThunkId, can_run_concurrently: bool) -> bool {
        match self.current_root {
            None => true,
            Some(root) => {
                can_run_concurrently || thunk_id == root || self.descendants_of_root.contains(&thunk_id)
            }
        }
    }
}

pub struct ThunkScheduler {
    lanes: RwLock<IndexMap<ThunkId, Lane>>,
    next_task_id: AtomicU64,
    next_seq: AtomicU64,
    outcomes: tokio::sync::mpsc::UnboundedSender<TaskOutcome>,
}

impl ThunkScheduler {
    pub fn new() -> (Self, tokio::sync::mpsc::UnboundedReceiver<TaskOutcome>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (
            Self {
                lanes: RwLock::new(IndexMap::new()),
                next_task_id: AtomicU64::new(1),
                next_seq: AtomicU64::new(1),
                outcomes: tx,
            },
            rx,
        )
    }

    pub fn next_task_id(&self) -> TaskId {
        TaskId(self.next_task_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    /// `enqueue(task)` — appends to the task's thunk lane, preserving
    /// FIFO order within that lane.
    pub async fn enqueue(&self, task: ThunkTask) {
        let mut lanes = self.lanes.write().await;
        lanes.entry(task.thunk_id).or_insert_with(|| Lane { tasks: VecDeque::new(), running: false }).tasks.push_back(task);
    }

    /// `removeTasks(thunkId)` — drop a terminated thunk's remaining lane.
    pub async fn remove_tasks(&self, thunk_id: ThunkId) {
        self.lanes.write().await.shift_remove(&thunk_id);
    }

    pub async fn get_queue_status(&self) -> QueueStatus {
        let lanes = self.lanes.read().await;
        QueueStatus { is_idle: lanes.values().all(|lane| lane.tasks.is_empty() && !lane.running) }
    }

    /// `processQueue()` — idempotent dispatch of every eligible lane's
    /// head-of-line task, highest priority first, `created_at_seq` as the
    /// tie-break across lanes of equal priority.
    pub async fn process_queue(self: &Arc<Self>, lock_state: &LockState) {
        let mut lanes = self.lanes.write().await;

        let mut candidates: Vec<(ThunkId, Priority, u64)> = lanes
            .iter()
            .filter(|(_, lane)| !lane.running)
            .filter_map(|(thunk_id, lane)| {
                let head = lane.tasks.front()?;
                lock_state
                    .admits(*thunk_id, head.can_run_concurrently)
                    .then_some((*thunk_id, head.priority, head.created_at_seq))
            })
            .collect();
        candidates.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

        for (thunk_id, _, _) in candidates {
            let Some(lane) = lanes.get_mut(&thunk_id) else { continue };
            let Some(task) = lane.tasks.pop_front() else { continue };
            lane.running = true;

            let scheduler = Arc::clone(self);
            tokio::spawn(async move {
                let task_id = task.task_id;
                let thunk_id = task.thunk_id;
                let result = (task.handler)().await;
                scheduler.on_task_finished(thunk_id).await;
                let outcome = match result {
                    Ok(()) => TaskOutcome::Completed { task_id, thunk_id },
                    Err(error) => TaskOutcome::Failed { task_id, thunk_id, error },
                };
                let _ = scheduler.outcomes.send(outcome);
            });
        }
    }

    async fn on_task_finished(&self, thunk_id: ThunkId) {
        let mut lanes = self.lanes.write().await;
        if let Some(lane) = lanes.get_mut(&thunk_id) {
            lane.running = false;
        }
    }

    pub async fn get_running_thunks(&self) -> Vec<ThunkId> {
        self.lanes.read().await.iter().filter(|(_, lane)| lane.running).map(|(id, _)| *id).collect()
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
