use std::sync::Arc;

use super::*;
use crate::testing::{CounterStateManager, HangingStateManager};

#[tokio::test]
async fn executes_sync_action_and_mutates_state() {
    let state_manager = Arc::new(CounterStateManager::new(0));
    let executor = ActionExecutor::new(state_manager.clone());

    executor.execute_action(&mut Action::new("increment")).await.unwrap_or_default();

    assert_eq!(state_manager.get_state()["count"], 1);
}

#[tokio::test]
async fn async_adapter_error_is_reported_but_not_propagated_as_panic() {
    struct FailingAsync;
    impl StateManager for FailingAsync {
        fn process_action(&self, _action: &Action) -> ProcessResult {
            ProcessResult::async_from(async { Err("adapter exploded".to_owned()) })
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

    let executor = ActionExecutor::new(Arc::new(FailingAsync));
    let result = executor.execute_action(&mut Action::new("anything")).await;

    assert_eq!(result, Err("adapter exploded".to_owned()));
}

#[tokio::test(start_paused = true)]
async fn hanging_adapter_never_resolves_without_an_external_timeout() {
    let executor = ActionExecutor::new(Arc::new(HangingStateManager));
    let fut = executor.execute_action(&mut Action::new("increment"));

    let timed_out =
        tokio::time::timeout(std::time::Duration::from_millis(100), fut).await.is_err();
    assert!(timed_out, "executor has no timeout of its own; the caller must apply one");
}
