use std::time::Duration;

use tokio::sync::Mutex;

use zubridge_core::prelude::{Action, CoreConfig};
use zubridge_core::testing::CounterStateManager;

use super::*;
use crate::messages::HostMessage;

struct RecordingChannel {
    sent: Arc<Mutex<Vec<HostMessage>>>,
}

impl RecordingChannel {
    fn new() -> Arc<Self> {
        Arc::new(Self { sent: Arc::new(Mutex::new(Vec::new())) })
    }

    async fn drain(&self) -> Vec<HostMessage> {
        std::mem::take(&mut *self.sent.lock().await)
    }
}

impl ClientChannel for RecordingChannel {
    fn send(&self, message: HostMessage) -> crate::channel::SendFuture {
        let sent = Arc::clone(&self.sent);
        Box::pin(async move {
            sent.lock().await.push(message);
            Ok(())
        })
    }

    fn is_destroyed(&self) -> bool {
        false
    }
}

fn config() -> CoreConfig {
    let mut config = CoreConfig::default();
    config.resource_management.enable_periodic_cleanup = false;
    config
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

#[tokio::test]
async fn subscribe_seeds_the_current_state() {
    let bridge = Bridge::new(Arc::new(CounterStateManager::new(7)), config()).await;
    let channel = RecordingChannel::new();
    let client_id = bridge.connect_client(channel).await;

    let snapshot = bridge.handle_subscribe(client_id, vec!["*".to_owned()]).await;
    assert_eq!(snapshot["count"], 7);
}

#[tokio::test]
async fn dispatch_acks_the_action_and_broadcasts_to_subscribers() {
    let bridge = Bridge::new(Arc::new(CounterStateManager::new(0)), config()).await;
    let channel = RecordingChannel::new();
    let client_id = bridge.connect_client(Arc::clone(&channel) as Arc<dyn ClientChannel>).await;
    bridge.handle_subscribe(client_id, vec!["*".to_owned()]).await;

    bridge.handle_dispatch(client_id, Action::new("increment"), None).await.unwrap();
    settle().await;

    let sent = channel.drain().await;
    assert!(matches!(sent.iter().find(|m| matches!(m, HostMessage::DispatchAck { .. })), Some(_)));
    let update = sent.iter().find_map(|m| match m {
        HostMessage::StateUpdate { state, .. } => Some(state.clone()),
        _ => None,
    });
    assert_eq!(update.expect("expected a StateUpdate")["count"], 1);
}

#[tokio::test]
async fn dispatch_with_an_unsubscribed_key_is_denied() {
    let bridge = Bridge::new(Arc::new(CounterStateManager::new(0)), config()).await;
    let channel = RecordingChannel::new();
    let client_id = bridge.connect_client(Arc::clone(&channel) as Arc<dyn ClientChannel>).await;
    bridge.handle_subscribe(client_id, vec!["theme".to_owned()]).await;

    let mut action = Action::new("increment");
    action.keys = Some(std::collections::BTreeSet::from(["counter".to_owned()]));

    let result = bridge.handle_dispatch(client_id, action, None).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn register_thunk_acks_then_complete_thunk_resolves_it() {
    let bridge = Bridge::new(Arc::new(CounterStateManager::new(0)), config()).await;
    let channel = RecordingChannel::new();
    let client_id = bridge.connect_client(Arc::clone(&channel) as Arc<dyn ClientChannel>).await;

    let thunk_id = ThunkId::new();
    bridge.handle_register_thunk(client_id, thunk_id, None, false, false).await;
    settle().await;

    let acked = channel.drain().await;
    assert!(matches!(
        acked.as_slice(),
        [HostMessage::RegisterThunkAck { success: true, .. }]
    ));

    bridge.handle_complete_thunk(thunk_id, None).await;
    settle().await;

    let active = bridge.get_thunk_state(Some(thunk_id)).await;
    assert!(active.iter().all(|t| t.id != thunk_id) || active.iter().any(|t| t.is_terminal()));
}

#[tokio::test]
async fn disconnect_fails_a_thunk_the_client_never_completed() {
    let bridge = Bridge::new(Arc::new(CounterStateManager::new(0)), config()).await;
    let channel = RecordingChannel::new();
    let client_id = bridge.connect_client(Arc::clone(&channel) as Arc<dyn ClientChannel>).await;

    let thunk_id = ThunkId::new();
    bridge.handle_register_thunk(client_id, thunk_id, None, false, false).await;
    settle().await;

    bridge.disconnect_client(client_id).await;
    settle().await;

    let subs = bridge.get_client_subscriptions(client_id).await;
    assert!(subs.is_empty());
}
