use std::fmt;

use crate::channel::ChannelError;

/// Why a `ClientThunkProcessor` call didn't resolve the way the caller
/// wanted: the channel itself failed, or the host answered with a
/// rejection (an access-control denial, a failed registration, ...).
#[derive(Debug, Clone)]
pub enum ClientError {
    Channel(ChannelError),
    Rejected(String),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Channel(err) => write!(f, "{err}"),
            Self::Rejected(reason) => write!(f, "{reason}"),
        }
    }
}

impl std::error::Error for ClientError {}
