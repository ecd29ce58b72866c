//! Command-line and environment configuration.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use clap::{Parser, ValueEnum};
use mcp_bridge_session::{SessionConfig, SessionMode};

/// Session lifetime policy as spelled on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Cached,
    PerRequest,
}

impl From<ModeArg> for SessionMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Cached => Self::Cached,
            ModeArg::PerRequest => Self::PerRequest,
        }
    }
}

/// HTTP bridge to MCP servers over stdio, SSE and WebSocket.
#[derive(Debug, Clone, Parser)]
#[command(name = "mcp-bridge", version, about)]
pub struct Args {
    /// Address to listen on.
    #[arg(long, env = "MCP_BRIDGE_ADDR", default_value = "127.0.0.1:3000")]
    pub addr: SocketAddr,

    /// Bearer token required on /bridge. Empty disables authentication.
    #[arg(long, env = "MCP_BRIDGE_AUTH_TOKEN", default_value = "", hide_env_values = true)]
    pub auth_token: String,

    /// Reuse sessions across calls, or open one per call.
    #[arg(long, env = "MCP_BRIDGE_SESSION_MODE", value_enum, default_value_t = ModeArg::Cached)]
    pub session_mode: ModeArg,

    /// Idle seconds before a cached session is evicted.
    #[arg(
        long,
        env = "MCP_BRIDGE_SESSION_TTL",
        default_value_t = 300,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub session_ttl: u64,

    /// Seconds between eviction sweeps.
    #[arg(
        long,
        env = "MCP_BRIDGE_SWEEP_INTERVAL",
        default_value_t = 300,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub sweep_interval: u64,

    /// Seconds to wait for each remote call (0 waits indefinitely).
    #[arg(long, env = "MCP_BRIDGE_REQUEST_TIMEOUT", default_value_t = 0)]
    pub request_timeout: u64,

    /// Seconds allowed for transport creation plus handshake.
    #[arg(
        long,
        env = "MCP_BRIDGE_CONNECT_TIMEOUT",
        default_value_t = 30,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub connect_timeout: u64,

    /// Seconds between self health checks (0 disables the watchdog).
    #[arg(long, env = "MCP_BRIDGE_HEALTH_CHECK_INTERVAL", default_value_t = 0)]
    pub health_check_interval: u64,

    /// Output logs as JSON.
    #[arg(long)]
    pub log_json: bool,
}

impl Args {
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            request_timeout: (self.request_timeout > 0)
                .then(|| Duration::from_secs(self.request_timeout)),
            connect_timeout: Duration::from_secs(self.connect_timeout),
            ..SessionConfig::default()
        }
    }

    #[must_use]
    pub fn session_mode(&self) -> SessionMode {
        self.session_mode.into()
    }

    #[must_use]
    pub const fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl)
    }

    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval)
    }

    #[must_use]
    pub fn health_check_interval(&self) -> Option<Duration> {
        (self.health_check_interval > 0).then(|| Duration::from_secs(self.health_check_interval))
    }

    /// The configured token, or `None` when authentication is disabled.
    #[must_use]
    pub fn auth_token(&self) -> Option<Arc<str>> {
        let token = self.auth_token.trim();
        (!token.is_empty()).then(|| Arc::from(token))
    }
}
