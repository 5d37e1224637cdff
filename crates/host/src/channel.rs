//! The transport boundary a `Bridge` pushes messages through.
//!
//! Mirrors the shape of `zubridge_core`'s own boxed-future callbacks
//! (`ExecuteFn`, `DispatchFn`) rather than pulling in an async-trait
//! crate: one method returning a boxed future, one synchronous probe.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use crate::messages::HostMessage;

pub type SendFuture = Pin<Box<dyn Future<Output = Result<(), ChannelError>> + Send>>;

/// One connected client's outbound half. Implementations own whatever
/// framing/serialization the real transport needs; `Bridge` only ever
/// calls `send` with a logical `HostMessage`.
pub trait ClientChannel: Send + Sync {
    fn send(&self, message: HostMessage) -> SendFuture;

    /// True once the underlying connection is known gone. `ClientTracker`
    /// polls this to reap clients that disconnected without a clean
    /// `destroy` (`spec.md` §5 "Scoped resource release").
    fn is_destroyed(&self) -> bool;
}

#[derive(Debug, Clone)]
pub struct ChannelError(pub String);

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel error: {}", self.0)
    }
}

impl std::error::Error for ChannelError {}
