use std::time::Duration;

use super::*;
use crate::action::ClientId;

#[tokio::test]
async fn register_then_ack_all_clears_pending() {
    let tracker = StateUpdateTracker::new();
    let update_id = UpdateId::new();
    let a = ClientId::new();
    let b = ClientId::new();
    tracker.register_update(update_id, None, [a, b]).await;

    assert!(!tracker.acknowledge(update_id, a).await.done);
    assert!(tracker.acknowledge(update_id, b).await.done);
    assert_eq!(tracker.pending_count().await, 0);
}

#[tokio::test]
async fn has_pending_for_thunk_tracks_outstanding_updates() {
    let tracker = StateUpdateTracker::new();
    let thunk_id = ThunkId::new();
    let update_id = UpdateId::new();
    let client = ClientId::new();
    tracker.register_update(update_id, Some(thunk_id), [client]).await;

    assert!(tracker.has_pending_for(thunk_id).await);
    let outcome = tracker.acknowledge(update_id, client).await;
    assert!(outcome.done);
    assert_eq!(outcome.thunk_id, Some(thunk_id));
    assert!(!tracker.has_pending_for(thunk_id).await);
}

#[tokio::test]
async fn cleanup_expired_is_idempotent() {
    let tracker = StateUpdateTracker::new();
    let update_id = UpdateId::new();
    tracker.register_update(update_id, None, [ClientId::new()]).await;

    // max_age = 0 means "anything registered so far is expired".
    let reaped_once = tracker.cleanup_expired(Duration::from_millis(0)).await;
    assert_eq!(reaped_once, vec![update_id]);

    let reaped_twice = tracker.cleanup_expired(Duration::from_millis(0)).await;
    assert!(reaped_twice.is_empty());
}

#[tokio::test]
async fn acknowledge_unknown_update_is_treated_as_fully_acked() {
    let tracker = StateUpdateTracker::new();
    assert!(tracker.acknowledge(UpdateId::new(), ClientId::new()).await.done);
}
