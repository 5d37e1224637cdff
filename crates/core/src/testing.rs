//! A minimal in-memory `StateManager` used by this crate's own tests and
//! by the `host`/`client` crates' integration tests. Not part of the
//! public contract `spec.md` describes — adapters are external
//! collaborators — but every test scenario in `spec.md` §8 needs *some*
//! adapter to drive, and this one keeps the examples self-contained.

use std::sync::Mutex;

use serde_json::{json, Value};

use crate::action::Action;
use crate::state_manager::{ProcessResult, StateListener, StateManager, SubscriptionHandle};

struct NoopHandle;
impl SubscriptionHandle for NoopHandle {}

/// A `{ count: i64 }` store driven by `"increment"` and `"double"`
/// action types, matching the literal scenarios in `spec.md` §8.
pub struct CounterStateManager {
    state: Mutex<Value>,
    listeners: Mutex<Vec<StateListener>>,
}

impl CounterStateManager {
    pub fn new(initial_count: i64) -> Self {
        Self {
            state: Mutex::new(json!({ "count": initial_count })),
            listeners: Mutex::new(Vec::new()),
        }
    }

    fn notify(&self) {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        for listener in listeners.iter() {
            listener(&state);
        }
    }
}

impl StateManager for CounterStateManager {
    fn process_action(&self, action: &Action) -> ProcessResult {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let count = state["count"].as_i64().unwrap_or(0);
            let next = match action.action_type.as_str() {
                "increment" => count + 1,
                "decrement" => count - 1,
                "double" => count * 2,
                _ => count,
            };
            *state = json!({ "count": next });
        }
        self.notify();
        ProcessResult::sync()
    }

    fn get_state(&self) -> Value {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn subscribe(&self, listener: StateListener) -> Box<dyn SubscriptionHandle> {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner()).push(listener);
        Box::new(NoopHandle)
    }
}

/// An adapter whose actions never complete, for exercising the timeout
/// path in `spec.md` §8 scenario 6.
pub struct HangingStateManager;

impl StateManager for HangingStateManager {
    fn process_action(&self, _action: &Action) -> ProcessResult {
        ProcessResult::async_from(std::future::pending())
    }

    fn get_state(&self) -> Value {
        json!({})
    }

    fn subscribe(&self, _listener: StateListener) -> Box<dyn SubscriptionHandle> {
        Box::new(NoopHandle)
    }
}
