use std::sync::Arc;

use super::*;

fn task(scheduler: &ThunkScheduler, thunk_id: ThunkId, priority: Priority, order: &Arc<tokio::sync::Mutex<Vec<u64>>>) -> ThunkTask {
    let task_id = scheduler.next_task_id();
    let seq = scheduler.next_seq();
    let order = Arc::clone(order);
    ThunkTask {
        task_id,
        thunk_id,
        priority,
        can_run_concurrently: false,
        created_at_seq: seq,
        handler: Box::new(move || {
            Box::pin(async move {
                order.lock().await.push(seq);
                Ok(())
            })
        }),
    }
}

#[tokio::test]
async fn idle_queue_admits_any_thunk() {
    let (scheduler, _rx) = ThunkScheduler::new();
    let scheduler = Arc::new(scheduler);
    let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));
    let thunk_id = ThunkId::new();

    scheduler.enqueue(task(&scheduler, thunk_id, Priority::Normal, &order)).await;
    scheduler.process_queue(&LockState::default()).await;

    // Give the spawned task a chance to run.
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    assert_eq!(*order.lock().await, vec![1]);
}

#[tokio::test]
async fn locked_queue_rejects_unrelated_thunk_unless_concurrent() {
    let (scheduler, _rx) = ThunkScheduler::new();
    let scheduler = Arc::new(scheduler);
    let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));
    let root = ThunkId::new();
    let other = ThunkId::new();

    scheduler.enqueue(task(&scheduler, other, Priority::Normal, &order)).await;
    let lock_state = LockState { current_root: Some(root), descendants_of_root: vec![] };
    scheduler.process_queue(&lock_state).await;

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    assert!(order.lock().await.is_empty(), "non-descendant task must stay gated while the lock is held");
}

#[tokio::test]
async fn bypass_flag_runs_even_while_locked() {
    let (scheduler, _rx) = ThunkScheduler::new();
    let scheduler = Arc::new(scheduler);
    let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));
    let root = ThunkId::new();
    let other = ThunkId::new();

    let mut t = task(&scheduler, other, Priority::Normal, &order);
    t.can_run_concurrently = true;
    scheduler.enqueue(t).await;

    let lock_state = LockState { current_root: Some(root), descendants_of_root: vec![] };
    scheduler.process_queue(&lock_state).await;

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    assert_eq!(*order.lock().await, vec![1]);
}

#[tokio::test]
async fn fifo_preserved_within_one_thunk_lane_regardless_of_priority() {
    let (scheduler, _rx) = ThunkScheduler::new();
    let scheduler = Arc::new(scheduler);
    let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));
    let thunk_id = ThunkId::new();

    scheduler.enqueue(task(&scheduler, thunk_id, Priority::Low, &order)).await;
    scheduler.enqueue(task(&scheduler, thunk_id, Priority::High, &order)).await;

    // First dispatch only picks the lane's head (seq 1); the High-priority
    // second task stays queued behind it in the same lane.
    scheduler.process_queue(&LockState::default()).await;
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    scheduler.process_queue(&LockState::default()).await;
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;

    assert_eq!(*order.lock().await, vec![1, 2]);
}

#[tokio::test]
async fn remove_tasks_drops_a_terminated_thunks_lane() {
    let (scheduler, _rx) = ThunkScheduler::new();
    let scheduler = Arc::new(scheduler);
    let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));
    let thunk_id = ThunkId::new();

    scheduler.enqueue(task(&scheduler, thunk_id, Priority::Normal, &order)).await;
    scheduler.remove_tasks(thunk_id).await;
    scheduler.process_queue(&LockState::default()).await;

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    assert!(order.lock().await.is_empty());
}

#[tokio::test]
async fn queue_status_reports_idle_when_nothing_pending_or_running() {
    let (scheduler, _rx) = ThunkScheduler::new();
    assert!(scheduler.get_queue_status().await.is_idle);
}
