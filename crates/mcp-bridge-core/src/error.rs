//! Error taxonomy surfaced to bridge callers.

use std::time::Duration;

use thiserror::Error;

use crate::{RpcError, TransportError, UnsupportedMethod};

/// Bridge error.
///
/// Each variant is one kind callers can observe; layers add context through
/// logging but never change the kind of an error on its way up.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Malformed request: {0}")]
    MalformedRequest(String),
    #[error("Missing or invalid authorization: {0}")]
    Unauthorized(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error(transparent)]
    Unsupported(#[from] UnsupportedMethod),
    #[error("Failed to connect: {0}")]
    Connect(TransportError),
    #[error("Handshake failed: {0}")]
    Handshake(String),
    #[error("Transport failure: {0}")]
    Transport(TransportError),
    #[error("Remote error: {0}")]
    Remote(RpcError),
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Stable snake_case name of the kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::MalformedRequest(_) => "malformed_request",
            Self::Unauthorized(_) | Self::Forbidden(_) => "auth_failure",
            Self::Unsupported(_) => "unsupported",
            Self::Connect(_) => "connect_failure",
            Self::Handshake(_) => "handshake_failure",
            Self::Transport(_) => "transport_failure",
            Self::Remote(_) => "remote_failure",
            Self::Timeout(_) => "timeout",
            Self::Internal(_) => "internal",
        }
    }

    /// Caller mistake rather than a bridge or remote fault.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedRequest(_)
                | Self::Unauthorized(_)
                | Self::Forbidden(_)
                | Self::Unsupported(_)
        )
    }
}
