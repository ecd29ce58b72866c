//! Call targets and the identity derived from them.

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

/// Which concrete transport a target maps onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Child process speaking newline-delimited JSON-RPC over stdio.
    Process,
    /// Server-sent events stream plus POSTed outbound messages.
    Sse,
    /// Bidirectional WebSocket.
    WebSocket,
}

impl TransportKind {
    /// Classify a target by its URL scheme.
    ///
    /// `http`/`https` select SSE, `ws`/`wss` select WebSocket, and anything
    /// that is not one of those URLs is treated as a local command.
    #[must_use]
    pub fn classify(target: &str) -> Self {
        match Url::parse(target.trim()) {
            Ok(url) => match url.scheme() {
                "http" | "https" => Self::Sse,
                "ws" | "wss" => Self::WebSocket,
                _ => Self::Process,
            },
            Err(_) => Self::Process,
        }
    }

    /// Stable lowercase name, used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Process => "process",
            Self::Sse => "sse",
            Self::WebSocket => "websocket",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a call connects to.
///
/// `env` is a `BTreeMap` so that iteration order, and therefore the derived
/// [`Identity`], does not depend on how the caller ordered the overlay.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSpec {
    /// URL or local command line.
    pub target: String,
    /// Extra arguments appended to a local command.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment overlay applied on top of the inherited environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl TargetSpec {
    /// Create a spec with no arguments and no environment overlay.
    #[must_use]
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    /// Replace the argument list.
    #[must_use]
    pub fn with_args<I>(mut self, args: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Add one environment overlay entry.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Transport this spec resolves to.
    #[must_use]
    pub fn kind(&self) -> TransportKind {
        TransportKind::classify(&self.target)
    }

    /// Cache identity of this spec.
    #[must_use]
    pub fn identity(&self) -> Identity {
        Identity::derive(self)
    }
}

// Env values may carry secrets, so only keys are ever printed.
impl fmt::Debug for TargetSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetSpec")
            .field("target", &self.target)
            .field("args", &self.args)
            .field("env_keys", &self.env.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Deterministic cache key for a [`TargetSpec`].
///
/// A SHA-256 digest over a length-prefixed encoding of target, arguments and
/// the key-sorted environment overlay. Displays as a short hex prefix.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity([u8; 32]);

impl Identity {
    /// Derive the identity of a spec.
    #[must_use]
    pub fn derive(spec: &TargetSpec) -> Self {
        let mut hasher = Sha256::new();
        write_field(&mut hasher, spec.target.as_bytes());
        hasher.update((spec.args.len() as u64).to_le_bytes());
        for arg in &spec.args {
            write_field(&mut hasher, arg.as_bytes());
        }
        hasher.update((spec.env.len() as u64).to_le_bytes());
        for (key, value) in &spec.env {
            write_field(&mut hasher, key.as_bytes());
            write_field(&mut hasher, value.as_bytes());
        }

        let digest = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    /// Full lowercase hex digest.
    #[must_use]
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

fn write_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0[..6] {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_by_scheme() {
        assert_eq!(TransportKind::classify("http://localhost:8080/sse"), TransportKind::Sse);
        assert_eq!(TransportKind::classify("https://example.com/mcp"), TransportKind::Sse);
        assert_eq!(TransportKind::classify("ws://localhost:9000"), TransportKind::WebSocket);
        assert_eq!(TransportKind::classify("wss://example.com/ws"), TransportKind::WebSocket);
        assert_eq!(
            TransportKind::classify("npx -y @modelcontextprotocol/server-everything"),
            TransportKind::Process
        );
        assert_eq!(TransportKind::classify("/usr/local/bin/echo-server"), TransportKind::Process);
        assert_eq!(TransportKind::classify("file:///tmp/server"), TransportKind::Process);
    }

    #[test]
    fn test_identity_is_stable_across_env_order() {
        let a = TargetSpec::new("echo-server")
            .with_env("B", "2")
            .with_env("A", "1");
        let b = TargetSpec::new("echo-server")
            .with_env("A", "1")
            .with_env("B", "2");
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn test_identity_distinguishes_inputs() {
        let base = TargetSpec::new("echo-server").with_args(["--a", "--b"]);
        let reordered = TargetSpec::new("echo-server").with_args(["--b", "--a"]);
        let joined = TargetSpec::new("echo-server").with_args(["--a--b"]);
        let with_env = base.clone().with_env("TOKEN", "x");

        assert_ne!(base.identity(), reordered.identity());
        assert_ne!(base.identity(), joined.identity());
        assert_ne!(base.identity(), with_env.identity());
    }

    #[test]
    fn test_secrets_stay_out_of_formatting() {
        let spec = TargetSpec::new("echo-server").with_env("API_KEY", "hunter2");
        let id = spec.identity();

        assert!(!format!("{spec:?}").contains("hunter2"));
        assert!(format!("{spec:?}").contains("API_KEY"));
        assert!(!format!("{id}").contains("hunter2"));
        assert_eq!(format!("{id}").len(), 12);
        assert_eq!(id.to_hex().len(), 64);
    }

    #[test]
    fn test_spec_deserializes_with_defaults() {
        let spec: TargetSpec = serde_json::from_str(r#"{"target":"echo-server"}"#).unwrap();
        assert!(spec.args.is_empty());
        assert!(spec.env.is_empty());
        assert_eq!(spec.kind(), TransportKind::Process);
    }
}
