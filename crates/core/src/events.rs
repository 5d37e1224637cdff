//! In-process, synchronous event bus (Design Notes §9 "Event emitters").
//!
//! The source leans on a runtime-provided publish/subscribe primitive;
//! here that becomes a typed enum delivered synchronously to registered
//! listener closures under the bus's own lock. Listeners must not re-enter
//! the bus (e.g. by calling `subscribe`/`emit` from inside a callback) —
//! doing so deadlocks on the single-writer `RwLock<HashMap<..>>` backing
//! the listener table.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::thunk::ThunkId;

/// Lifecycle events emitted by `ThunkLifecycleManager` (`spec.md` §4.7).
#[derive(Debug, Clone)]
pub enum ThunkEvent {
    Registered { thunk_id: ThunkId, parent_id: Option<ThunkId> },
    Started { thunk_id: ThunkId },
    Completed { thunk_id: ThunkId },
    Failed { thunk_id: ThunkId, error: String },
    RootChanged { thunk_id: Option<ThunkId> },
    RootCompleted { thunk_id: ThunkId },
}

type Listener = Arc<dyn Fn(&ThunkEvent) + Send + Sync + 'static>;

/// Synchronous pub/sub hub for `ThunkEvent`s.
#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Arc<RwLock<Vec<Listener>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. Returned handle is currently advisory; there
    /// is no unsubscribe, as no component needs one (listeners live as
    /// long as the `CoreRuntime` that owns the bus).
    pub async fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&ThunkEvent) + Send + Sync + 'static,
    {
        self.listeners.write().await.push(Arc::new(listener));
    }

    /// Deliver `event` to every listener in registration order.
    pub async fn emit(&self, event: ThunkEvent) {
        tracing::debug!(?event, "thunk event");
        let listeners = self.listeners.read().await;
        for listener in listeners.iter() {
            listener(&event);
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").finish_non_exhaustive()
    }
}
