//! Transports for the MCP bridge.
//!
//! Provides:
//! - `ProcessTransport` - Child process over piped stdio
//! - `SseTransport` - Server-sent events stream with POSTed requests
//! - `WebSocketTransport` - Bidirectional WebSocket
//! - `DefaultTransportFactory` - Scheme-based selection between them
//! - Command building and executable resolution utilities

pub mod command;
pub mod factory;
pub mod process;
pub mod shell;
pub mod sse;
pub mod websocket;

pub use command::{CommandBuilder, CommandParts};
pub use factory::DefaultTransportFactory;
pub use process::ProcessTransport;
pub use shell::resolve_executable_path;
pub use sse::SseTransport;
pub use websocket::WebSocketTransport;
