//! Error kinds for the core coordinator (`spec.md` §7).
//!
//! A machine-readable code plus a one-line human message, no stack
//! traces, serde-tagged so the host/client façades can put it on the
//! wire unchanged (`spec.md` §6 "Error envelope").

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::thunk::ThunkId;

/// Errors surfaced by the coordinator to a dispatcher or the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CoreError {
    /// Malformed action, unknown state key, or access-denied read/write.
    Validation { message: String },
    /// An action or thunk exceeded its deadline.
    Timeout { message: String },
    /// `maxQueueSize` exceeded.
    QueueOverflow { message: String },
    /// The state manager adapter threw.
    StateManager { message: String },
    /// The thunk body threw.
    ThunkExecution { thunk_id: ThunkId, message: String },
    /// A client channel was found destroyed mid-operation.
    Channel { message: String },
}

impl CoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    pub fn access_denied(client: impl fmt::Display, key: &str) -> Self {
        Self::Validation { message: format!("access denied: {client} not subscribed to {key}") }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout { message: message.into() }
    }

    pub fn queue_overflow(message: impl Into<String>) -> Self {
        Self::QueueOverflow { message: message.into() }
    }

    pub fn state_manager(message: impl Into<String>) -> Self {
        Self::StateManager { message: message.into() }
    }

    pub fn thunk_execution(thunk_id: ThunkId, message: impl Into<String>) -> Self {
        Self::ThunkExecution { thunk_id, message: message.into() }
    }

    pub fn channel(message: impl Into<String>) -> Self {
        Self::Channel { message: message.into() }
    }

    /// The free-text, single-line message carried on the wire (`spec.md` §6).
    pub fn as_wire_message(&self) -> String {
        match self {
            Self::Validation { message }
            | Self::Timeout { message }
            | Self::QueueOverflow { message }
            | Self::StateManager { message }
            | Self::Channel { message } => message.clone(),
            Self::ThunkExecution { thunk_id, message } => {
                format!("thunk {thunk_id} failed: {message}")
            }
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_wire_message())
    }
}

impl std::error::Error for CoreError {}

/// Fatal, implementation-bug-only conditions (`spec.md` §7). These are
/// never produced by user actions or adapter misbehavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FatalError {
    LockCorruption { detail: String },
    StateManagerUninitialized,
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LockCorruption { detail } => write!(f, "core lock corruption detected: {detail}"),
            Self::StateManagerUninitialized => write!(f, "state manager not initialized"),
        }
    }
}

impl std::error::Error for FatalError {}
