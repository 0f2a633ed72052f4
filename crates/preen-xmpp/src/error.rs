//! Error types for the client core.

use thiserror::Error;
use xmpp_parsers::stanza_error::StanzaError;

/// Errors surfaced by the public operations of the client core.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Invalid argument to a public operation. Never retried.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The remote entity lacks a required capability. Callers must not
    /// retry without renegotiating.
    #[error("{jid} does not support {feature}")]
    Unsupported {
        /// Entity the capability cache was asked about
        jid: String,
        /// Capability that was missing
        feature: String,
    },

    /// Well-formed but semantically invalid data: wrong namespace,
    /// missing required element, mismatched echo.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Explicit error-type reply from a peer or server.
    #[error("remote error: {condition}")]
    Remote {
        /// The peer's defined error condition
        condition: String,
        /// Optional human-readable text from the peer
        text: Option<String>,
    },

    /// A correlated request saw no reply within its timeout.
    #[error("request timed out")]
    Timeout,

    /// The connection closed while an operation was outstanding, or an
    /// operation was attempted after shutdown.
    #[error("connection closed")]
    ConnectionClosed,

    /// A request with this id is already outstanding.
    #[error("a request with id '{0}' is already outstanding")]
    DuplicateRequest(String),

    /// A callback is already registered for this pub/sub node.
    #[error("a callback is already subscribed to node '{0}'")]
    DuplicateSubscription(String),
}

impl ClientError {
    /// Translate an error-type IQ reply into a [`ClientError::Remote`].
    pub fn remote(error: &StanzaError) -> Self {
        let text = error
            .texts
            .get("en")
            .or_else(|| error.texts.values().next())
            .cloned();
        Self::Remote {
            condition: format!("{:?}", error.defined_condition),
            text,
        }
    }
}
