use std::str::Utf8Error;

use crate::protocol::Identity;

/// All error types that can occur while talking to lights on the LAN.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Failed to serialize a frame to JSON.
    #[error("failed to dump json: {0:?}")]
    JsonDump(serde_json::Error),

    /// Failed to deserialize a frame from JSON.
    #[error("failed to load json: {0:?}")]
    JsonLoad(serde_json::Error),

    /// A network socket operation failed.
    #[error("socket {action} error: {err:?}")]
    Socket { action: String, err: std::io::Error },

    /// An inbound datagram contained invalid UTF-8.
    #[error("utf8 decoding error: {0:?}")]
    Utf8Decode(Utf8Error),

    /// The transport has been closed.
    #[error("transport is closed")]
    Closed,

    /// A device did not answer a request in time.
    #[error("device {identity} did not answer {method}")]
    Timeout {
        identity: Identity,
        method: &'static str,
    },

    /// A device answered a request with the wrong kind of message.
    #[error("expected {expected} reply, got {got}")]
    UnexpectedReply {
        expected: &'static str,
        got: &'static str,
    },

    /// A device identity string could not be parsed.
    #[error("invalid device identity: {0}")]
    InvalidIdentity(String),
}

impl Error {
    /// Create a new socket error
    pub fn socket(action: &str, err: std::io::Error) -> Self {
        Error::Socket {
            action: action.to_string(),
            err,
        }
    }

    /// Create a new timeout error
    pub fn timeout(identity: &Identity, method: &'static str) -> Self {
        Error::Timeout {
            identity: *identity,
            method,
        }
    }
}

/// Hacky implementation of PartialEq for testing
#[cfg(test)]
impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}
