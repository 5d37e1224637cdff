//! The host/client wire contract lives in `zubridge_core::messages` so
//! both sides of the bridge share one definition; re-exported here so
//! the rest of this crate can keep referring to `crate::messages::*`.

pub use zubridge_core::messages::{ActiveThunkSummary, ClientMessage, HostMessage};
