//! zubridge-host: the Bridge façade (`spec.md` §4.11) that wires an
//! abstract `ClientChannel` transport to `zubridge_core::CoreRuntime`.
//!
//! This crate owns no wire framing — callers provide a `ClientChannel`
//! per connected client and route the logical `ClientMessage`s listed in
//! `spec.md` §6 to `Bridge`'s handlers however their transport parses
//! them off the wire.

pub mod bridge;
pub mod channel;
pub mod messages;
pub mod tracker;

pub use bridge::Bridge;
pub use channel::{ChannelError, ClientChannel};
pub use tracker::ClientTracker;
