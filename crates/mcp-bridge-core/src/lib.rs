//! Core abstractions for the MCP bridge session manager.
//!
//! This crate provides the fundamental building blocks:
//! - `TargetSpec` / `Identity` - What a call connects to, and its cache key
//! - `TransportKind` - Scheme-based transport classification
//! - `Method` - The fixed vocabulary of forwarded operations
//! - `JsonRpcMessage` - Wire model shared by every transport
//! - `Transport` / `TransportFactory` traits and the error taxonomy

pub mod error;
pub mod jsonrpc;
pub mod method;
pub mod target;
pub mod traits;

pub use error::BridgeError;
pub use jsonrpc::{JsonRpcMessage, RequestId, RpcError};
pub use method::{Method, UnsupportedMethod};
pub use target::{Identity, TargetSpec, TransportKind};
pub use traits::{Transport, TransportError, TransportFactory};
