//! zubridge-client: `ClientThunkProcessor` (`spec.md` §4.12), the
//! sandboxed-process counterpart to `zubridge_core::CoreRuntime` /
//! `zubridge_host::Bridge`. The store lives in the host process; this
//! crate runs thunk bodies locally and round-trips every dispatched
//! action and thunk registration over a `HostChannel`.
//!
//! This crate owns no wire framing — callers provide a `HostChannel` and
//! route whatever `HostMessage`s arrive off the wire into
//! `ClientThunkProcessor::handle_host_message`.

pub mod channel;
pub mod error;
pub mod processor;

pub use channel::{ChannelError, HostChannel};
pub use error::ClientError;
pub use processor::ClientThunkProcessor;
