//! The transport boundary `ClientThunkProcessor` pushes `ClientMessage`s
//! through and runs the request/response half of `spec.md` §6 over.
//!
//! Mirrors `zubridge_host::channel::ClientChannel`'s shape: boxed-future
//! methods instead of an async-trait crate. Inbound `HostMessage`s are
//! not part of this trait — whatever owns the actual socket/pipe routes
//! them into `ClientThunkProcessor::handle_host_message`, the same way a
//! transport owns routing on the host side.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use zubridge_core::prelude::{ClientId, ClientMessage, ThunkStateSnapshot};

pub type SendFuture = Pin<Box<dyn Future<Output = Result<(), ChannelError>> + Send>>;
pub type StateFuture = Pin<Box<dyn Future<Output = Result<serde_json::Value, ChannelError>> + Send>>;
pub type ClientIdFuture = Pin<Box<dyn Future<Output = Result<ClientId, ChannelError>> + Send>>;
pub type ThunkStateFuture = Pin<Box<dyn Future<Output = Result<ThunkStateSnapshot, ChannelError>> + Send>>;
pub type SubscriptionsFuture = Pin<Box<dyn Future<Output = Result<Vec<String>, ChannelError>> + Send>>;

/// The host's side of one connection. `send` carries the fire-and-forget
/// `ClientMessage`s; the `request_*` methods are the request/response
/// half (`GetState`, `GetClientId`, `GetThunkState`,
/// `GetClientSubscriptions`) that `spec.md` §6 leaves to the transport's
/// own RPC framing.
pub trait HostChannel: Send + Sync {
    fn send(&self, message: ClientMessage) -> SendFuture;
    fn request_state(&self) -> StateFuture;
    fn request_client_id(&self) -> ClientIdFuture;
    fn request_thunk_state(&self) -> ThunkStateFuture;
    fn request_client_subscriptions(&self, client_id: ClientId) -> SubscriptionsFuture;
}

#[derive(Debug, Clone)]
pub struct ChannelError(pub String);

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel error: {}", self.0)
    }
}

impl std::error::Error for ChannelError {}
