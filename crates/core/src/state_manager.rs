//! `StateManager` — the external store-adapter contract (`spec.md` §4.2).
//!
//! Store adapters (mapping action types to mutations) are explicitly out
//! of scope (`spec.md` §1); this module only defines the boundary trait
//! the core's `ActionExecutor` drives.

use std::future::Future;
use std::pin::Pin;

use crate::action::Action;

/// Result of `processAction`. Synchronous adapters resolve immediately;
/// asynchronous ones hand back a future the executor awaits.
pub enum ProcessResult {
    Sync,
    Async(Pin<Box<dyn Future<Output = Result<(), String>> + Send>>),
}

impl ProcessResult {
    pub fn sync() -> Self {
        Self::Sync
    }

    pub fn async_from<F>(fut: F) -> Self
    where
        F: Future<Output = Result<(), String>> + Send + 'static,
    {
        Self::Async(Box::pin(fut))
    }
}

/// A listener invoked by the adapter on every store mutation.
pub type StateListener = Box<dyn Fn(&serde_json::Value) + Send + Sync>;

/// Dropping the handle unsubscribes the listener.
pub trait SubscriptionHandle: Send {}

/// One operation: apply an action to the store. After the synchronous
/// portion returns (or, for `Async`, after the completion future
/// resolves), `getState()` must reflect the action.
pub trait StateManager: Send + Sync {
    fn process_action(&self, action: &Action) -> ProcessResult;

    /// A JSON snapshot of the current store state, used for client seeding
    /// on `subscribe` and for `GetState` responses.
    fn get_state(&self) -> serde_json::Value;

    /// Register a listener called with the new state on every mutation.
    /// The bridge façade uses this to drive its broadcast path.
    fn subscribe(&self, listener: StateListener) -> Box<dyn SubscriptionHandle>;
}
