use std::time::Duration;

use thiserror::Error;

use crate::util::mac::MacAddress;

/// Errors surfaced by the fan protocol core.
///
/// Malformed datagrams are never reported through this type; listeners drop
/// them and keep polling.
#[derive(Debug, Error)]
pub enum FanError {
    /// No beacon for the requested MAC arrived before the listen window closed.
    #[error("did not receive a beacon for MAC {mac} within {duration:?}")]
    NotFound { mac: MacAddress, duration: Duration },

    /// A caller-supplied value is outside its protocol domain.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize command: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl FanError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        FanError::InvalidArgument(message.into())
    }

    /// True if the error is the "nothing matched within the window" condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, FanError::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, FanError>;
