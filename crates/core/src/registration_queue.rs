//! `ThunkRegistrationQueue` (`spec.md` §4.9).
//!
//! Serializes root-thunk acquisition so cross-component races cannot
//! produce two concurrent roots. Child thunks register synchronously
//! inside the thunk that already holds the lock; root thunks queue FIFO
//! and are admitted one at a time, gated on both the lifecycle lock
//! clearing and the outgoing root's broadcasts draining from
//! `StateUpdateTracker`.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};

use crate::action::ClientId;
use crate::events::ThunkEvent;
use crate::lifecycle::ThunkLifecycleManager;
use crate::state_update_tracker::StateUpdateTracker;
use crate::thunk::{ThunkId, ThunkOptions, ThunkSource};

/// Receives the thunk's freshly assigned id, since the closure (built by
/// `MainThunkProcessor`/`ClientThunkProcessor`) needs it to scope nested
/// dispatches and to drive its own completion handshake.
pub type ExecuteFn =
    Box<dyn FnOnce(ThunkId) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send>> + Send>;
pub type ClientAckFn = Box<dyn FnOnce(ThunkId) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

struct QueuedRoot {
    thunk_id: ThunkId,
    execute_fn: ExecuteFn,
    client_ack_fn: Option<ClientAckFn>,
    result_tx: oneshot::Sender<Result<(), String>>,
}

async fn register_entry(
    lifecycle: &ThunkLifecycleManager,
    thunk_id: Option<ThunkId>,
    parent_id: Option<ThunkId>,
    source_client_id: Option<ClientId>,
    source: ThunkSource,
    options: ThunkOptions,
) -> ThunkId {
    match thunk_id {
        Some(id) => lifecycle.register_with_id(id, parent_id, source_client_id, source, options).await,
        None => lifecycle.register(parent_id, source_client_id, source, options).await,
    }
}

pub struct ThunkRegistrationQueue {
    lifecycle: Arc<ThunkLifecycleManager>,
    tracker: Arc<StateUpdateTracker>,
    pending_roots: Mutex<VecDeque<QueuedRoot>>,
    last_root: Mutex<Option<ThunkId>>,
}

impl ThunkRegistrationQueue {
    /// Builds the queue and wires it to fire on every `RootChanged(None)`/
    /// `RootCompleted` event so a queued root is admitted as soon as the
    /// lock clears, instead of requiring callers to poll.
    pub async fn new(lifecycle: Arc<ThunkLifecycleManager>, tracker: Arc<StateUpdateTracker>) -> Arc<Self> {
        let this = Arc::new(Self {
            lifecycle: Arc::clone(&lifecycle),
            tracker,
            pending_roots: Mutex::new(VecDeque::new()),
            last_root: Mutex::new(None),
        });

        let trigger = Arc::clone(&this);
        lifecycle
            .events()
            .subscribe(move |event| {
                if matches!(
                    event,
                    ThunkEvent::RootChanged { thunk_id: None } | ThunkEvent::RootCompleted { .. }
                ) {
                    let queue = Arc::clone(&trigger);
                    tokio::spawn(async move {
                        queue.pump().await;
                    });
                }
            })
            .await;

        this
    }

    /// `registerThunk(thunk, executeFn?, clientAckFn?)`. `thunk_id`
    /// overrides the generated id when the caller already minted one —
    /// the client-sourced thunk flow (`spec.md` §4.12) needs this so the
    /// client can stamp its own dispatches with `parentThunkId` before the
    /// host's ack arrives.
    pub async fn register_thunk(
        self: &Arc<Self>,
        parent_id: Option<ThunkId>,
        thunk_id: Option<ThunkId>,
        source_client_id: Option<ClientId>,
        source: ThunkSource,
        options: ThunkOptions,
        execute_fn: ExecuteFn,
        client_ack_fn: Option<ClientAckFn>,
    ) -> (ThunkId, Result<(), String>) {
        match parent_id {
            Some(parent_id) => {
                self.register_child(parent_id, thunk_id, source_client_id, source, options, execute_fn, client_ack_fn)
                    .await
            }
            None => self.register_root(thunk_id, source_client_id, source, options, execute_fn, client_ack_fn).await,
        }
    }

    async fn register_child(
        &self,
        parent_id: ThunkId,
        thunk_id: Option<ThunkId>,
        source_client_id: Option<ClientId>,
        source: ThunkSource,
        options: ThunkOptions,
        execute_fn: ExecuteFn,
        client_ack_fn: Option<ClientAckFn>,
    ) -> (ThunkId, Result<(), String>) {
        let thunk_id = register_entry(&self.lifecycle, thunk_id, Some(parent_id), source_client_id, source, options).await;

        if let Err(err) = self.lifecycle.execute(thunk_id).await {
            return (thunk_id, Err(err.to_string()));
        }

        if let Some(client_ack_fn) = client_ack_fn {
            client_ack_fn(thunk_id).await;
        }

        let result = execute_fn(thunk_id).await;
        if let Err(ref err) = result {
            self.lifecycle.fail(thunk_id, err.clone()).await;
        }
        (thunk_id, result)
    }

    async fn register_root(
        self: &Arc<Self>,
        thunk_id: Option<ThunkId>,
        source_client_id: Option<ClientId>,
        source: ThunkSource,
        options: ThunkOptions,
        execute_fn: ExecuteFn,
        client_ack_fn: Option<ClientAckFn>,
    ) -> (ThunkId, Result<(), String>) {
        let thunk_id = register_entry(&self.lifecycle, thunk_id, None, source_client_id, source, options).await;
        let (result_tx, result_rx) = oneshot::channel();

        self.pending_roots.lock().await.push_back(QueuedRoot { thunk_id, execute_fn, client_ack_fn, result_tx });

        Arc::clone(self).pump().await;

        let result = result_rx.await.unwrap_or_else(|_| Err("registration queue dropped its sender".to_owned()));
        (thunk_id, result)
    }

    /// Admits the head of the root queue if the lock is free and the
    /// previous root's broadcasts have drained; otherwise retries shortly.
    /// `StateUpdateTracker` has no completion signal of its own, so this
    /// corner (lock clear, acks still outstanding) is the one place in the
    /// core that polls rather than waits on a notification.
    async fn pump(self: Arc<Self>) {
        let mut queue = self.pending_roots.lock().await;
        if queue.is_empty() {
            return;
        }
        if self.lifecycle.current_root().await.is_some() {
            return;
        }
        if let Some(prev) = *self.last_root.lock().await {
            if self.tracker.has_pending_for(prev).await {
                drop(queue);
                let this = Arc::clone(&self);
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    this.pump().await;
                });
                return;
            }
        }

        let head = match queue.pop_front() {
            Some(head) => head,
            None => return,
        };
        drop(queue);

        self.dispatch_root(head).await;
    }

    async fn dispatch_root(&self, mut queued: QueuedRoot) {
        if let Err(err) = self.lifecycle.execute(queued.thunk_id).await {
            let _ = queued.result_tx.send(Err(err.to_string()));
            return;
        }

        if let Some(client_ack_fn) = queued.client_ack_fn.take() {
            client_ack_fn(queued.thunk_id).await;
        }

        *self.last_root.lock().await = Some(queued.thunk_id);

        let thunk_id = queued.thunk_id;
        let lifecycle = Arc::clone(&self.lifecycle);
        let execute_fn = queued.execute_fn;
        let result_tx = queued.result_tx;
        tokio::spawn(async move {
            let result = execute_fn(thunk_id).await;
            if let Err(ref err) = result {
                lifecycle.fail(thunk_id, err.clone()).await;
            }
            let _ = result_tx.send(result);
        });
    }

    #[cfg(test)]
    pub(crate) async fn queue_len(&self) -> usize {
        self.pending_roots.lock().await.len()
    }
}

#[cfg(test)]
#[path = "registration_queue_tests.rs"]
mod tests;
