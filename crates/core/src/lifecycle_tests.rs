use std::sync::Arc;

use super::*;
use crate::scheduler::ThunkScheduler;
use crate::thunk::ThunkOptions;

fn manager() -> Arc<ThunkLifecycleManager> {
    let (scheduler, _outcomes) = ThunkScheduler::new();
    Arc::new(ThunkLifecycleManager::new(EventBus::new(), Arc::new(scheduler)))
}

#[tokio::test]
async fn root_thunk_claims_the_lock_on_execute() {
    let manager = self::manager();
    let thunk_id =
        manager.register(None, None, ThunkSource::Host, ThunkOptions::default()).await;

    manager.execute(thunk_id).await.unwrap_or_default();

    assert_eq!(manager.current_root().await, Some(thunk_id));
}

#[tokio::test]
async fn bypassing_root_never_becomes_current_root() {
    let manager = self::manager();
    let options = ThunkOptions { bypass_thunk_lock: true, ..Default::default() };
    let thunk_id = manager.register(None, None, ThunkSource::Host, options).await;

    manager.execute(thunk_id).await.unwrap_or_default();

    assert_eq!(manager.current_root().await, None);
}

#[tokio::test]
async fn second_root_does_not_preempt_the_first() {
    let manager = self::manager();
    let first = manager.register(None, None, ThunkSource::Host, ThunkOptions::default()).await;
    let second = manager.register(None, None, ThunkSource::Host, ThunkOptions::default()).await;

    manager.execute(first).await.unwrap_or_default();
    manager.execute(second).await.unwrap_or_default();

    assert_eq!(manager.current_root().await, Some(first));
}

#[tokio::test]
async fn complete_with_no_outstanding_work_finalizes_immediately() {
    let manager = self::manager();
    let thunk_id = manager.register(None, None, ThunkSource::Host, ThunkOptions::default()).await;
    manager.execute(thunk_id).await.unwrap_or_default();

    manager.complete(thunk_id, None, || false).await;

    assert!(manager.is_terminal(thunk_id).await);
    assert_eq!(manager.current_root().await, None);
}

#[tokio::test]
async fn complete_with_outstanding_work_stays_executing_until_try_finalize() {
    let manager = self::manager();
    let thunk_id = manager.register(None, None, ThunkSource::Host, ThunkOptions::default()).await;
    manager.execute(thunk_id).await.unwrap_or_default();

    manager.complete(thunk_id, None, || true).await;
    assert!(!manager.is_terminal(thunk_id).await);

    manager.try_finalize(thunk_id).await;
    assert!(manager.is_terminal(thunk_id).await);
}

#[tokio::test]
async fn duplicate_complete_calls_are_idempotent() {
    let manager = self::manager();
    let thunk_id = manager.register(None, None, ThunkSource::Host, ThunkOptions::default()).await;
    manager.execute(thunk_id).await.unwrap_or_default();

    manager.complete(thunk_id, None, || false).await;
    manager.complete(thunk_id, None, || false).await;

    assert!(manager.is_terminal(thunk_id).await);
}

#[tokio::test]
async fn failing_a_parent_does_not_cascade_to_children() {
    let manager = self::manager();
    let parent = manager.register(None, None, ThunkSource::Host, ThunkOptions::default()).await;
    manager.execute(parent).await.unwrap_or_default();
    let child =
        manager.register(Some(parent), None, ThunkSource::Host, ThunkOptions::default()).await;
    manager.execute(child).await.unwrap_or_default();

    manager.fail(parent, "boom").await;

    assert!(manager.is_terminal(parent).await);
    assert!(!manager.is_terminal(child).await);
}

#[tokio::test]
async fn all_descendants_terminal_reflects_child_completion() {
    let manager = self::manager();
    let parent = manager.register(None, None, ThunkSource::Host, ThunkOptions::default()).await;
    manager.execute(parent).await.unwrap_or_default();
    let child =
        manager.register(Some(parent), None, ThunkSource::Host, ThunkOptions::default()).await;
    manager.execute(child).await.unwrap_or_default();

    assert!(!all_descendants_terminal(&manager, parent).await);

    manager.complete(child, None, || false).await;

    assert!(all_descendants_terminal(&manager, parent).await);
}

#[tokio::test]
async fn execute_on_unknown_thunk_is_an_error() {
    let manager = self::manager();
    let result = manager.execute(ThunkId::new()).await;
    assert!(matches!(result, Err(ExecuteError::UnknownThunk(_))));
}

#[tokio::test]
async fn registered_thunk_is_linked_to_its_parents_children() {
    let manager = self::manager();
    let parent = manager.register(None, None, ThunkSource::Host, ThunkOptions::default()).await;
    let child =
        manager.register(Some(parent), None, ThunkSource::Host, ThunkOptions::default()).await;

    assert_eq!(manager.descendants(parent).await, vec![child]);
}
