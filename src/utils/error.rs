//! The `error` module defines the error type shared across `mqgate`.
//!
//! Rejections (bad credentials, vetoed publishes, denied subscriptions) are
//! decision values, not errors. `Error` is reserved for conditions the host
//! has to act on: an unreadable retained record, storage I/O failures and
//! broken configuration.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The persisted retained record exists but cannot be trusted.
    #[error("retained state at {location} is corrupt: {reason}")]
    CorruptState { location: String, reason: String },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("failed to encode retained state: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid QoS level {0}, expected 0, 1 or 2")]
    InvalidQos(u8),
}

impl Error {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn corrupt(location: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CorruptState {
            location: location.into(),
            reason: reason.into(),
        }
    }

    pub fn is_corrupt_state(&self) -> bool {
        matches!(self, Self::CorruptState { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
