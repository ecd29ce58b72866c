//! HTTP surface for the MCP bridge.
//!
//! Provides:
//! - `POST /bridge` - Forward one call to a remote MCP server
//! - `GET /health` - Liveness endpoint, also polled by the watchdog
//! - Bearer-token middleware, configuration and the self-health watchdog

pub mod auth;
pub mod config;
pub mod protocol;
pub mod routes;
pub mod watchdog;

use std::sync::Arc;

use mcp_bridge_session::Dispatcher;

pub use config::Args;
pub use protocol::{ApiError, ErrorBody, HealthStatus};
pub use routes::router;
pub use watchdog::RestartSignal;

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    /// Required bearer token; `None` disables authentication.
    pub auth_token: Option<Arc<str>>,
}
