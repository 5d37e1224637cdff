use std::time::Duration;

use tokio::sync::Mutex;

use zubridge_core::prelude::{Action, ThunkOptions, UpdateId};

use super::*;
use crate::channel::{ClientIdFuture, SendFuture, StateFuture, SubscriptionsFuture, ThunkStateFuture};

/// Records every `send`d message into an `Arc<Mutex<_>>` cloned into the
/// returned `'static` future, the same pattern `zubridge_host`'s own test
/// double uses for its outbound channel.
struct RecordingHostChannel {
    sent: Arc<Mutex<Vec<ClientMessage>>>,
    client_id: ClientId,
}

impl RecordingHostChannel {
    fn new() -> Arc<Self> {
        Arc::new(Self { sent: Arc::new(Mutex::new(Vec::new())), client_id: ClientId::new() })
    }

    async fn find_dispatch(&self) -> Option<ActionId> {
        self.sent.lock().await.iter().find_map(|m| match m {
            ClientMessage::Dispatch { action, .. } => action.id,
            _ => None,
        })
    }

    async fn find_register(&self) -> Option<ThunkId> {
        self.sent.lock().await.iter().find_map(|m| match m {
            ClientMessage::RegisterThunk { thunk_id, .. } => Some(*thunk_id),
            _ => None,
        })
    }

    async fn completions(&self) -> Vec<(ThunkId, Option<String>)> {
        self.sent
            .lock()
            .await
            .iter()
            .filter_map(|m| match m {
                ClientMessage::CompleteThunk { thunk_id, error } => Some((*thunk_id, error.clone())),
                _ => None,
            })
            .collect()
    }
}

impl HostChannel for RecordingHostChannel {
    fn send(&self, message: ClientMessage) -> SendFuture {
        let sent = Arc::clone(&self.sent);
        Box::pin(async move {
            sent.lock().await.push(message);
            Ok(())
        })
    }

    fn request_state(&self) -> StateFuture {
        Box::pin(async { Ok(serde_json::json!({"count": 0})) })
    }

    fn request_client_id(&self) -> ClientIdFuture {
        let id = self.client_id;
        Box::pin(async move { Ok(id) })
    }

    fn request_thunk_state(&self) -> ThunkStateFuture {
        Box::pin(async { Ok(ThunkStateSnapshot { version: 0, thunks: Vec::new() }) })
    }

    fn request_client_subscriptions(&self, _client_id: ClientId) -> SubscriptionsFuture {
        Box::pin(async { Ok(Vec::new()) })
    }
}

async fn poll_until<T, F, Fut>(mut f: F) -> T
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Option<T>>,
{
    loop {
        if let Some(value) = f().await {
            return value;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn dispatch_action_resolves_once_the_ack_arrives() {
    let channel = RecordingHostChannel::new();
    let processor = ClientThunkProcessor::new(Arc::clone(&channel) as Arc<dyn HostChannel>);

    let handle = {
        let processor = Arc::clone(&processor);
        tokio::spawn(async move {
            processor.dispatch(Dispatchable::Action(Action::new("increment")), ThunkOptions::default()).await
        })
    };

    let action_id = poll_until(|| async { channel.find_dispatch().await }).await;
    processor
        .handle_host_message(HostMessage::DispatchAck {
            action_id,
            error: None,
            active_thunks: Vec::new(),
            version: 1,
        })
        .await;

    assert!(handle.await.expect("task panicked").is_ok());
}

#[tokio::test]
async fn dispatch_action_surfaces_a_host_rejection() {
    let channel = RecordingHostChannel::new();
    let processor = ClientThunkProcessor::new(Arc::clone(&channel) as Arc<dyn HostChannel>);

    let handle = {
        let processor = Arc::clone(&processor);
        tokio::spawn(async move {
            processor.dispatch(Dispatchable::Action(Action::new("increment")), ThunkOptions::default()).await
        })
    };

    let action_id = poll_until(|| async { channel.find_dispatch().await }).await;
    processor
        .handle_host_message(HostMessage::DispatchAck {
            action_id,
            error: Some("access denied".to_owned()),
            active_thunks: Vec::new(),
            version: 1,
        })
        .await;

    assert!(handle.await.expect("task panicked").is_err());
}

#[tokio::test]
async fn execute_thunk_runs_the_body_and_reports_completion() {
    let channel = RecordingHostChannel::new();
    let processor = ClientThunkProcessor::new(Arc::clone(&channel) as Arc<dyn HostChannel>);

    let handle = {
        let processor = Arc::clone(&processor);
        tokio::spawn(async move {
            let body: ThunkBody = Box::new(|get_state, _dispatch| {
                Box::pin(async move { Ok(get_state()) })
            });
            processor.execute_thunk(body, ThunkOptions::default(), None).await
        })
    };

    let thunk_id = poll_until(|| async { channel.find_register().await }).await;
    processor
        .handle_host_message(HostMessage::RegisterThunkAck { thunk_id, success: true, error: None })
        .await;

    let result = handle.await.expect("task panicked").expect("thunk failed");
    assert_eq!(result, serde_json::Value::Null);

    let completions = poll_until(|| async {
        let completions = channel.completions().await;
        (!completions.is_empty()).then_some(completions)
    })
    .await;
    assert_eq!(completions, vec![(thunk_id, None)]);
}

#[tokio::test]
async fn execute_thunk_fails_when_registration_is_rejected() {
    let channel = RecordingHostChannel::new();
    let processor = ClientThunkProcessor::new(Arc::clone(&channel) as Arc<dyn HostChannel>);

    let handle = {
        let processor = Arc::clone(&processor);
        tokio::spawn(async move {
            let body: ThunkBody = Box::new(|get_state, _dispatch| Box::pin(async move { Ok(get_state()) }));
            processor.execute_thunk(body, ThunkOptions::default(), None).await
        })
    };

    let thunk_id = poll_until(|| async { channel.find_register().await }).await;
    processor
        .handle_host_message(HostMessage::RegisterThunkAck {
            thunk_id,
            success: false,
            error: Some("thunk lock busy".to_owned()),
        })
        .await;

    assert!(handle.await.expect("task panicked").is_err());
}

#[tokio::test]
async fn state_update_folds_into_the_local_cache_and_is_acked() {
    let channel = RecordingHostChannel::new();
    let processor = ClientThunkProcessor::new(Arc::clone(&channel) as Arc<dyn HostChannel>);

    processor
        .handle_host_message(HostMessage::StateUpdate {
            update_id: UpdateId::new(),
            thunk_id: None,
            state: serde_json::json!({"count": 5}),
        })
        .await;

    assert_eq!(processor.get_state()["count"], 5);
    poll_until(|| async {
        let sent = channel.sent.lock().await;
        sent.iter().any(|m| matches!(m, ClientMessage::StateUpdateAck { .. })).then_some(true)
    })
    .await;
}
