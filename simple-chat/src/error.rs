//! Error types shared by the client and server halves of the chat.
//!
//! Every error here is local to one connection or one console command. None of
//! them tear down the listener or other sessions; only the explicit `#quit` and
//! `#close` operator commands do that.

use std::io;

use thiserror::Error;

/// Minimum number of characters accepted as a login id.
pub const MIN_IDENTITY_LEN: usize = 3;

/// Failure to move a frame across a connection.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("not connected")]
    NotConnected,

    #[error("peer is not keeping up; outgoing queue is full")]
    Backlogged,
}

/// A peer broke the login protocol. The connection is always closed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("login attempted on an already identified connection")]
    AlreadyLoggedIn,

    #[error("login id has {len} characters, minimum is {MIN_IDENTITY_LEN}")]
    IdentityTooShort { len: usize },

    #[error("message received before login")]
    NotLoggedIn,
}

impl ProtocolViolation {
    /// Text sent to the offending peer right before its connection is closed.
    pub fn notice(&self) -> &'static str {
        match self {
            ProtocolViolation::AlreadyLoggedIn => {
                "Error: You are already connected to the server. Terminating the connection."
            }
            ProtocolViolation::IdentityTooShort { .. } => {
                "Error: Login id should have a minimum length of 3."
            }
            ProtocolViolation::NotLoggedIn => {
                "Error: You must log in before sending messages. Terminating the connection."
            }
        }
    }
}

/// A `#setport` argument that cannot be used as a port.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortError {
    #[error("{0} is not an integer. To set a new port, please try again.")]
    NotAnInteger(String),

    #[error("{0} is not a valid port number. To set a new port, please try again.")]
    OutOfRange(String),
}

/// Aggregated result of a fan-out where at least one target could not be reached.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to deliver message to {failed} of {attempted} connections")]
pub struct RelayError {
    pub failed: usize,
    pub attempted: usize,
}
