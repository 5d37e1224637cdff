//! `CoreRuntime` — the explicit struct wiring every component together
//! (Design Notes §9 "Global state"), replacing the source's module-level
//! singletons. One instance per bridged store; the host/client façades
//! construct one and drive it from their own transport integration.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::action::{Action, ClientId};
use crate::action_executor::ActionExecutor;
use crate::action_queue::{ActionQueueManager, OnActionComplete};
use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::lifecycle::{all_descendants_terminal, ThunkLifecycleManager};
use crate::main_processor::{MainThunkProcessor, ProcessActionOptions, ThunkBody};
use crate::registration_queue::{ClientAckFn, ExecuteFn, ThunkRegistrationQueue};
use crate::scheduler::ThunkScheduler;
use crate::state_manager::StateManager;
use crate::state_update_tracker::StateUpdateTracker;
use crate::subscription::SubscriptionRegistry;
use crate::thunk::{ThunkId, ThunkOptions, ThunkSource};

/// Owns every coordinator component for one bridged store and the
/// background tasks that keep them self-driving.
pub struct CoreRuntime {
    lifecycle: Arc<ThunkLifecycleManager>,
    scheduler: Arc<ThunkScheduler>,
    tracker: Arc<StateUpdateTracker>,
    subscriptions: Arc<SubscriptionRegistry>,
    action_queue: Arc<ActionQueueManager>,
    registration_queue: Arc<ThunkRegistrationQueue>,
    main_processor: Arc<MainThunkProcessor>,
    state_manager: Arc<dyn StateManager>,
    config: Arc<CoreConfig>,
    reaper: CancellationToken,
}

impl CoreRuntime {
    /// Assembles the full component graph and, if
    /// `resourceManagement.enablePeriodicCleanup` is set, spawns the
    /// `StateUpdateTracker` reaper task (`spec.md` §5 "Scoped resource
    /// release"): a periodic sweep that evicts entries past their
    /// deadline, the same shape as a client liveness checker.
    pub async fn new(state_manager: Arc<dyn StateManager>, config: CoreConfig) -> Arc<Self> {
        let config = Arc::new(config);
        let events = crate::events::EventBus::new();
        let (scheduler, outcomes) = ThunkScheduler::new();
        let scheduler = Arc::new(scheduler);
        let lifecycle = Arc::new(ThunkLifecycleManager::new(events, Arc::clone(&scheduler)));
        let tracker = Arc::new(StateUpdateTracker::new());
        let subscriptions = Arc::new(SubscriptionRegistry::new());
        let executor = Arc::new(ActionExecutor::new(Arc::clone(&state_manager)));

        let action_queue = ActionQueueManager::new(
            executor,
            Arc::clone(&scheduler),
            outcomes,
            Arc::clone(&lifecycle),
            Arc::clone(&config),
        )
        .await;
        let registration_queue = ThunkRegistrationQueue::new(Arc::clone(&lifecycle), Arc::clone(&tracker)).await;
        let main_processor = Arc::new(MainThunkProcessor::new(
            Arc::clone(&registration_queue),
            Arc::clone(&action_queue),
            Arc::clone(&lifecycle),
            Arc::clone(&tracker),
            Arc::clone(&state_manager),
            Arc::clone(&config),
        ));

        let reaper = CancellationToken::new();
        if config.resource_management.enable_periodic_cleanup {
            spawn_reaper(Arc::clone(&tracker), Arc::clone(&config), reaper.clone());
        }

        Arc::new(Self {
            lifecycle,
            scheduler,
            tracker,
            subscriptions,
            action_queue,
            registration_queue,
            main_processor,
            state_manager,
            config,
            reaper,
        })
    }

    /// `executeThunk(fn, options?)` (`spec.md` §4.10) — host-initiated,
    /// i.e. has no parent; nested dispatches register as children
    /// automatically via `MainThunkProcessor::dispatch_within`.
    pub async fn execute_thunk(
        self: &Arc<Self>,
        body: ThunkBody,
        options: ThunkOptions,
    ) -> Result<serde_json::Value, CoreError> {
        self.main_processor.execute_thunk(body, options, None).await
    }

    /// `processAction(a, options?)` (`spec.md` §4.10) — a plain
    /// host-dispatched action outside of any thunk.
    pub async fn process_action(&self, action: Action, options: ProcessActionOptions) -> Result<(), CoreError> {
        self.main_processor.process_action(action, options).await
    }

    /// The client-facing counterpart of `executeThunk`/`dispatchAction`:
    /// registers a thunk whose body runs entirely on the client side, with
    /// the host only holding the lock and forwarding dispatched actions
    /// (`spec.md` §4.12). `ClientThunkProcessor` supplies `execute_fn`; the
    /// client also supplies `thunk_id`, since it mints the id itself
    /// before the host's `RegisterThunkAck` round-trips back.
    pub async fn register_client_thunk(
        self: &Arc<Self>,
        thunk_id: ThunkId,
        parent_id: Option<ThunkId>,
        source_client_id: ClientId,
        options: ThunkOptions,
        execute_fn: ExecuteFn,
        client_ack_fn: ClientAckFn,
    ) -> (ThunkId, Result<(), String>) {
        self.registration_queue
            .register_thunk(
                parent_id,
                Some(thunk_id),
                Some(source_client_id),
                ThunkSource::Client,
                options,
                execute_fn,
                Some(client_ack_fn),
            )
            .await
    }

    /// Insert a placeholder entry for a `Dispatch` that raced ahead of its
    /// own `RegisterThunk` (`spec.md` §4.12 "the host tolerates late
    /// arrivals"). The action only needs `thunkExists` to hold, not the
    /// lock, so this skips the registration queue entirely; the later
    /// `RegisterThunk` for the same id finds the entry already `Pending`
    /// and proceeds through `execute()` as normal.
    pub async fn ensure_thunk_placeholder(&self, thunk_id: ThunkId, source_client_id: ClientId) {
        if !self.lifecycle.thunk_exists(thunk_id).await {
            self.lifecycle
                .register_with_id(thunk_id, None, Some(source_client_id), ThunkSource::Client, ThunkOptions::default())
                .await;
        }
    }

    /// `enqueueAction` for a client-dispatched plain action (`spec.md`
    /// §4.8/§4.11).
    pub async fn enqueue_client_action(
        self: &Arc<Self>,
        action: Action,
        source_client_id: ClientId,
        parent_thunk_id: Option<ThunkId>,
        on_complete: Option<OnActionComplete>,
    ) -> Result<crate::action::ActionId, CoreError> {
        self.action_queue.enqueue_action(action, Some(source_client_id), parent_thunk_id, on_complete).await
    }

    /// `subscribe(clientId, keys)` (`spec.md` §4.3), seeding the reply with
    /// a snapshot of the current store state.
    pub async fn subscribe(
        &self,
        client_id: ClientId,
        keys: impl IntoIterator<Item = String>,
    ) -> serde_json::Value {
        self.subscriptions.subscribe(client_id, keys).await;
        self.state_manager.get_state()
    }

    pub async fn unsubscribe(&self, client_id: ClientId, keys: Option<&[String]>) {
        self.subscriptions.unsubscribe(client_id, keys).await;
    }

    /// Drops all subscriptions and any active thunks a disconnected
    /// client owned; callers (the bridge façade's `ClientTracker`) invoke
    /// this on channel destruction (`spec.md` §3 Lifecycle, §5 "Scoped
    /// resource release").
    pub async fn remove_client(&self, client_id: ClientId) {
        self.subscriptions.remove_client(client_id).await;
    }

    pub async fn is_subscribed_to_key(&self, client_id: ClientId, key: &str) -> bool {
        self.subscriptions.is_subscribed_to_key(client_id, key).await
    }

    pub async fn subscribed_clients(&self, state_keys: &[String]) -> Vec<ClientId> {
        self.subscriptions.subscribed_clients(state_keys).await
    }

    /// The thunk currently holding the global lock, if any. Under the
    /// single-lock concurrency model (`spec.md` §5) this is, barring a
    /// `bypassThunkLock` action running alongside it, whichever thunk is
    /// responsible for the mutation a store adapter just reported.
    pub async fn current_root(&self) -> Option<ThunkId> {
        self.lifecycle.current_root().await
    }

    /// Every client subscribed to anything at all, for broadcasts of a
    /// mutation that carries no specific `keys` (`spec.md` §4.11): an
    /// untargeted update is treated as touching the whole store, so it
    /// goes to every subscriber rather than none.
    pub async fn all_subscribed_clients(&self) -> Vec<ClientId> {
        self.subscriptions.all_clients().await
    }

    /// `getClientSubscriptions(clientId)` (`spec.md` §6).
    pub async fn client_subscriptions(&self, client_id: ClientId) -> Vec<String> {
        self.subscriptions.subscriptions(client_id).await
    }

    pub fn get_state(&self) -> serde_json::Value {
        self.state_manager.get_state()
    }

    /// `getThunkState(thunkId?)` (`spec.md` §6) — one thunk, or every
    /// currently active one.
    pub async fn thunk_state(&self, thunk_id: Option<ThunkId>) -> Vec<crate::thunk::Thunk> {
        match thunk_id {
            Some(thunk_id) => self.lifecycle.snapshot(thunk_id).await.into_iter().collect(),
            None => self.lifecycle.active_thunks().await,
        }
    }

    /// Open a `PendingStateUpdate` for a broadcast the bridge is about to
    /// send out (`spec.md` §4.4/§4.11): mints a fresh `updateId`, records
    /// the recipient set, and returns the id to stamp on every
    /// `StateUpdate` message.
    pub async fn begin_state_update(
        &self,
        thunk_id: Option<ThunkId>,
        client_ids: impl IntoIterator<Item = ClientId>,
    ) -> crate::state_update_tracker::UpdateId {
        let update_id = crate::state_update_tracker::UpdateId::new();
        self.tracker.register_update(update_id, thunk_id, client_ids).await;
        update_id
    }

    /// Acknowledge a broadcast (`spec.md` §4.4) and re-check whether that
    /// clears the lock for a waiting root or lets a thunk pending only on
    /// this update finalize (invariant 5: `isFullyComplete` checks
    /// `hasPendingFor`, so the last ack draining must re-trigger it rather
    /// than leaving a caller blocked on `wait_for_completion_signal`).
    pub async fn acknowledge_state_update(
        self: &Arc<Self>,
        update_id: crate::state_update_tracker::UpdateId,
        client_id: ClientId,
    ) {
        let outcome = self.tracker.acknowledge(update_id, client_id).await;
        if outcome.done {
            self.action_queue.process_queue().await;
            if let Some(thunk_id) = outcome.thunk_id {
                self.lifecycle.try_finalize(thunk_id).await;
            }
        }
    }

    /// A client-sourced thunk's body runs entirely on the client; this is
    /// the host-side completion signal its `CompleteThunk` message drives
    /// (`spec.md` §4.12), mirroring what `MainThunkProcessor::run_thunk_body`
    /// does for host thunks once their body future resolves.
    pub async fn complete_thunk(self: &Arc<Self>, thunk_id: ThunkId, result: Option<serde_json::Value>) {
        let has_pending_actions = self.action_queue.has_pending_actions(thunk_id).await;
        let has_pending_descendants = !all_descendants_terminal(&self.lifecycle, thunk_id).await;
        let has_pending_updates = self.tracker.has_pending_for(thunk_id).await;
        let still_pending = has_pending_actions || has_pending_descendants || has_pending_updates;
        self.lifecycle.complete(thunk_id, result, move || still_pending).await;
    }

    pub async fn fail_thunk(self: &Arc<Self>, thunk_id: ThunkId, error: impl Into<String>) {
        self.lifecycle.fail(thunk_id, error).await;
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// `scheduler.getQueueStatus()` (`spec.md` §4.6), surfaced for
    /// diagnostics/introspection by whatever binds this runtime to a
    /// transport.
    pub async fn queue_status(&self) -> crate::scheduler::QueueStatus {
        self.scheduler.get_queue_status().await
    }
}

impl Drop for CoreRuntime {
    fn drop(&mut self) {
        self.reaper.cancel();
    }
}

fn spawn_reaper(tracker: Arc<StateUpdateTracker>, config: Arc<CoreConfig>, cancel: CancellationToken) {
    let interval = config.resource_management.cleanup_interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let expired = tracker.cleanup_expired(interval).await;
                    if !expired.is_empty() {
                        tracing::warn!(count = expired.len(), "reaped expired state updates");
                    }
                }
            }
        }
    });
}

#[cfg(test)]
#[path = "runtime_tests.rs"]
mod tests;
