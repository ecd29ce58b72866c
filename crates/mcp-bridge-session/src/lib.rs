//! Session management for the MCP bridge.
//!
//! Provides:
//! - `Session` - Handshaken connection speaking the fixed method vocabulary
//! - `SessionRegistry` - Identity-keyed cache with TTL eviction and liveness probes
//! - `Dispatcher` - Validates inbound calls and routes them to sessions

pub mod dispatcher;
pub mod registry;
pub mod session;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use dispatcher::{CallEnvelope, Dispatcher, SessionMode, ValidCall};
pub use registry::{SessionHandle, SessionRegistry, open_session};
pub use session::{Session, SessionConfig, SessionError, default_capabilities};
