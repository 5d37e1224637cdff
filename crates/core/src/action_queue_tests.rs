use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::events::EventBus;
use crate::state_manager::{ProcessResult, StateManager};
use crate::testing::CounterStateManager;
use crate::thunk::{ThunkOptions, ThunkSource};

async fn queue(
    state_manager: Arc<CounterStateManager>,
    max_queue_size: usize,
) -> (Arc<ActionQueueManager>, Arc<ThunkLifecycleManager>, Arc<ThunkScheduler>) {
    let executor = Arc::new(ActionExecutor::new(state_manager));
    let (scheduler, rx) = ThunkScheduler::new();
    let scheduler = Arc::new(scheduler);
    let lifecycle = Arc::new(ThunkLifecycleManager::new(EventBus::new(), Arc::clone(&scheduler)));
    let config = Arc::new(CoreConfig { max_queue_size, ..CoreConfig::default() });
    let manager = ActionQueueManager::new(executor, Arc::clone(&scheduler), rx, Arc::clone(&lifecycle), config).await;
    (manager, lifecycle, scheduler)
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

#[tokio::test]
async fn orphan_action_runs_immediately_when_the_lock_is_free() {
    let state_manager = Arc::new(CounterStateManager::new(0));
    let (manager, _lifecycle, _scheduler) = queue(state_manager.clone(), 100).await;

    manager.enqueue_action(Action::new("increment"), None, None, None).await.unwrap_or_default();
    settle().await;

    assert_eq!(state_manager.get_state()["count"], 1);
}

#[tokio::test]
async fn bypassing_action_runs_even_though_it_skips_bookkeeping() {
    let state_manager = Arc::new(CounterStateManager::new(0));
    let (manager, _lifecycle, _scheduler) = queue(state_manager.clone(), 100).await;

    let action = Action::new("increment").bypassing_thunk_lock();
    manager.enqueue_action(action, None, None, None).await.unwrap_or_default();
    settle().await;

    assert_eq!(state_manager.get_state()["count"], 1);
}

#[tokio::test]
async fn action_for_unknown_thunk_is_rejected() {
    let state_manager = Arc::new(CounterStateManager::new(0));
    let (manager, _lifecycle, _scheduler) = queue(state_manager, 100).await;

    let result = manager.enqueue_action(Action::new("increment"), None, Some(ThunkId::new()), None).await;

    assert!(matches!(result, Err(CoreError::Validation { .. })));
}

#[tokio::test]
async fn queue_at_capacity_rejects_new_actions() {
    let state_manager = Arc::new(CounterStateManager::new(0));
    let (manager, _lifecycle, _scheduler) = queue(state_manager, 0).await;

    let result = manager.enqueue_action(Action::new("increment"), None, None, None).await;

    assert!(matches!(result, Err(CoreError::QueueOverflow { .. })));
}

#[tokio::test]
async fn action_scoped_to_an_active_thunk_completes_and_drains_it() {
    let state_manager = Arc::new(CounterStateManager::new(0));
    let (manager, lifecycle, scheduler) = queue(state_manager.clone(), 100).await;

    let thunk_id = lifecycle.register(None, None, ThunkSource::Host, ThunkOptions::default()).await;
    lifecycle.execute(thunk_id).await.unwrap_or_default();

    manager.enqueue_action(Action::new("increment"), None, Some(thunk_id), None).await.unwrap_or_default();

    settle().await;

    assert_eq!(state_manager.get_state()["count"], 1);
    assert!(!manager.has_pending_actions(thunk_id).await);
    assert!(scheduler.get_queue_status().await.is_idle);
}

#[tokio::test]
async fn two_actions_on_one_thunk_lane_both_run_without_a_second_enqueue() {
    let state_manager = Arc::new(CounterStateManager::new(0));
    let (manager, lifecycle, _scheduler) = queue(state_manager.clone(), 100).await;

    let thunk_id = lifecycle.register(None, None, ThunkSource::Host, ThunkOptions::default()).await;
    lifecycle.execute(thunk_id).await.unwrap_or_default();

    manager.enqueue_action(Action::new("increment"), None, Some(thunk_id), None).await.unwrap_or_default();
    manager.enqueue_action(Action::new("increment"), None, Some(thunk_id), None).await.unwrap_or_default();

    settle().await;

    assert_eq!(state_manager.get_state()["count"], 2);
    assert!(!manager.has_pending_actions(thunk_id).await);
}

#[tokio::test]
async fn on_complete_callback_reports_adapter_errors() {
    struct AlwaysFails;
    impl StateManager for AlwaysFails {
        fn process_action(&self, _action: &Action) -> ProcessResult {
            ProcessResult::async_from(async { Err("nope".to_owned()) })
        }
        fn get_state(&self) -> serde_json::Value {
            serde_json::json!({})
        }
        fn subscribe(
            &self,
            _listener: crate::state_manager::StateListener,
        ) -> Box<dyn crate::state_manager::SubscriptionHandle> {
            struct H;
            impl crate::state_manager::SubscriptionHandle for H {}
            Box::new(H)
        }
    }

    let executor = Arc::new(ActionExecutor::new(Arc::new(AlwaysFails)));
    let (scheduler, rx) = ThunkScheduler::new();
    let scheduler = Arc::new(scheduler);
    let lifecycle = Arc::new(ThunkLifecycleManager::new(EventBus::new(), Arc::clone(&scheduler)));
    let manager = ActionQueueManager::new(executor, scheduler, rx, lifecycle, Arc::new(CoreConfig::default())).await;

    let seen_error = Arc::new(AtomicUsize::new(0));
    let seen_error_clone = Arc::clone(&seen_error);
    let on_complete: OnActionComplete = Box::new(move |_id, error| {
        if error.is_some() {
            seen_error_clone.fetch_add(1, Ordering::SeqCst);
        }
    });

    manager.enqueue_action(Action::new("anything"), None, None, Some(on_complete)).await.unwrap_or_default();
    settle().await;

    assert_eq!(seen_error.load(Ordering::SeqCst), 1);
}
