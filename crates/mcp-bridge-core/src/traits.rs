//! Core traits for transports.

use async_trait::async_trait;
use thiserror::Error;

use crate::{JsonRpcMessage, TargetSpec, TransportKind};

/// Transport error.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connect failed: {0}")]
    Connect(String),
    #[error("Executable not found: {0}")]
    ExecutableNotFound(String),
    #[error("Command build error: {0}")]
    CommandBuild(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("WebSocket error: {0}")]
    WebSocket(String),
    #[error("Transport closed")]
    Closed,
    #[error("Close failed: {0}")]
    Close(String),
}

impl TransportError {
    /// The control channel itself is gone (peer exited or stream ended).
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// A message channel to one remote peer.
///
/// A transport is owned by exactly one session and is never used from two
/// tasks at once, hence `&mut self` throughout.
#[async_trait]
pub trait Transport: Send {
    /// Which variant this is.
    fn kind(&self) -> TransportKind;

    /// Send one message.
    async fn send(&mut self, message: &JsonRpcMessage) -> Result<(), TransportError>;

    /// Receive the next message, or `None` once the peer has closed the stream.
    async fn receive(&mut self) -> Result<Option<JsonRpcMessage>, TransportError>;

    /// Release every resource held by the transport.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Creates transports for call targets.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Open a transport for `spec`.
    async fn create(&self, spec: &TargetSpec) -> Result<Box<dyn Transport>, TransportError>;
}
