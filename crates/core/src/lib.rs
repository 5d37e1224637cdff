//! zubridge-core: the thunk and action coordinator sitting between
//! dispatchers (host-local or cross-process clients) and a state store.
//!
//! This crate owns no transport and no store. It exposes `CoreRuntime`,
//! an explicit struct wiring together the components below; callers
//! (the `zubridge-host` bridge façade, or a host-embedded thunk runner)
//! construct one `CoreRuntime` per bridged store and drive it from their
//! own IPC/event-loop integration.

pub mod action;
pub mod action_executor;
pub mod action_queue;
pub mod config;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod main_processor;
pub mod messages;
pub mod registration_queue;
pub mod runtime;
pub mod scheduler;
pub mod state_manager;
pub mod state_update_tracker;
pub mod subscription;
pub mod thunk;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub mod prelude {
    pub use crate::action::{Action, ActionId, ClientId};
    pub use crate::action_queue::OnActionComplete;
    pub use crate::config::CoreConfig;
    pub use crate::error::CoreError;
    pub use crate::main_processor::{Dispatchable, DispatchFn, GetStateFn, ProcessActionOptions, ThunkBody};
    pub use crate::messages::{ActiveThunkSummary, ClientMessage, HostMessage, ThunkStateSnapshot};
    pub use crate::registration_queue::{ClientAckFn, ExecuteFn};
    pub use crate::runtime::CoreRuntime;
    pub use crate::scheduler::QueueStatus;
    pub use crate::state_manager::{ProcessResult, StateManager};
    pub use crate::state_update_tracker::UpdateId;
    pub use crate::thunk::{Thunk, ThunkId, ThunkOptions, ThunkSource, ThunkState};
}
