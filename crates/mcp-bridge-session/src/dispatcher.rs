//! Maps inbound calls onto session operations.

use std::{collections::BTreeMap, fmt, str::FromStr, sync::Arc};

use mcp_bridge_core::{BridgeError, Method, TargetSpec};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::Instrument;

use crate::{
    registry::SessionRegistry,
    session::{Session, SessionError},
};

/// One inbound call as posted by a client.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallEnvelope {
    /// URL or local command of the remote peer.
    #[serde(default, alias = "target")]
    pub server_path: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
    /// Accept legacy `toolResult` shapes from `callTool`.
    #[serde(default)]
    pub compatibility: bool,
}

// Same redaction as `TargetSpec`: env values never reach logs.
impl fmt::Debug for CallEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallEnvelope")
            .field("server_path", &self.server_path)
            .field("args", &self.args)
            .field("env_keys", &self.env.keys().collect::<Vec<_>>())
            .field("method", &self.method)
            .field("params", &self.params)
            .field("compatibility", &self.compatibility)
            .finish()
    }
}

/// A call that passed validation.
#[derive(Debug, Clone)]
pub struct ValidCall {
    pub spec: TargetSpec,
    pub method: Method,
    pub params: Value,
    pub compatibility: bool,
}

impl CallEnvelope {
    /// Check required fields and the method name without touching any session.
    ///
    /// # Errors
    /// Returns `MalformedRequest` for a missing field and `Unsupported` for a
    /// method outside the fixed vocabulary.
    pub fn validate(self) -> Result<ValidCall, BridgeError> {
        let target = self
            .server_path
            .filter(|target| !target.trim().is_empty())
            .ok_or_else(|| BridgeError::MalformedRequest("serverPath is required".to_string()))?;
        let method = self
            .method
            .ok_or_else(|| BridgeError::MalformedRequest("method is required".to_string()))?;
        let params = match self.params {
            None | Some(Value::Null) => {
                return Err(BridgeError::MalformedRequest("params is required".to_string()));
            }
            Some(params) => params,
        };
        let method = Method::from_str(&method)?;

        let mut spec = TargetSpec::new(target).with_args(self.args);
        spec.env = self.env;

        Ok(ValidCall {
            spec,
            method,
            params,
            compatibility: self.compatibility,
        })
    }
}

/// Whether sessions outlive the call that opened them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionMode {
    /// Reuse sessions through the registry.
    #[default]
    Cached,
    /// Open a session per call and always close it afterwards.
    PerRequest,
}

impl SessionMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cached => "cached",
            Self::PerRequest => "per-request",
        }
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Routes validated calls to sessions.
pub struct Dispatcher {
    registry: Arc<SessionRegistry>,
    mode: SessionMode,
}

impl Dispatcher {
    #[must_use]
    pub const fn new(registry: Arc<SessionRegistry>, mode: SessionMode) -> Self {
        Self { registry, mode }
    }

    #[must_use]
    pub const fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    #[must_use]
    pub const fn mode(&self) -> SessionMode {
        self.mode
    }

    /// Validate `envelope`, resolve its session and run the operation.
    ///
    /// The result is the peer's structured result, unchanged.
    ///
    /// # Errors
    /// Any [`BridgeError`] kind; see [`CallEnvelope::validate`] for the ones
    /// raised before a session is involved.
    pub async fn handle(&self, envelope: CallEnvelope) -> Result<Value, BridgeError> {
        let call = envelope.validate()?;
        let span = tracing::info_span!(
            "dispatch",
            method = %call.method,
            identity = %call.spec.identity(),
            mode = %self.mode,
        );
        self.dispatch(call).instrument(span).await
    }

    async fn dispatch(&self, call: ValidCall) -> Result<Value, BridgeError> {
        match self.mode {
            SessionMode::Cached => self.dispatch_cached(call).await,
            SessionMode::PerRequest => self.dispatch_once(call).await,
        }
    }

    async fn dispatch_cached(&self, call: ValidCall) -> Result<Value, BridgeError> {
        let mut handle = self.registry.resolve(&call.spec).await?;

        match invoke(&mut handle, &call).await {
            Ok(result) => Ok(result),
            Err(SessionError::Transport(e)) if e.is_closed() => {
                tracing::warn!("Peer closed the session during the call");
                self.registry.invalidate(handle).await;
                Err(BridgeError::Transport(e))
            }
            Err(e) => {
                tracing::debug!("Call failed: {e}");
                Err(e.into())
            }
        }
    }

    async fn dispatch_once(&self, call: ValidCall) -> Result<Value, BridgeError> {
        let mut session = self.registry.open_detached(&call.spec).await?;
        let outcome = invoke(&mut session, &call).await;

        if let Err(e) = session.close().await {
            tracing::warn!(session_id = %session.id(), "Failed to close per-request session: {e}");
        }
        Ok(outcome?)
    }
}

async fn invoke(session: &mut Session, call: &ValidCall) -> Result<Value, SessionError> {
    if call.method == Method::CallTool {
        session
            .call_tool(call.params.clone(), call.compatibility)
            .await
    } else {
        session.invoke(call.method, call.params.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::{session::SessionConfig, testing::MockFactory};

    fn dispatcher(factory: &MockFactory, mode: SessionMode) -> Dispatcher {
        let registry = SessionRegistry::new(
            Arc::new(factory.clone()),
            SessionConfig::default(),
            Duration::from_secs(300),
        );
        Dispatcher::new(Arc::new(registry), mode)
    }

    fn envelope(value: Value) -> CallEnvelope {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_envelope_debug_hides_env_values() {
        let call = envelope(json!({
            "serverPath": "npx server",
            "env": {"API_TOKEN": "sk-live-123"},
            "method": "listTools",
            "params": {},
        }));

        let printed = format!("{call:?}");
        assert!(printed.contains("API_TOKEN"));
        assert!(!printed.contains("sk-live-123"));

        let printed = format!("{:?}", call.validate().unwrap());
        assert!(!printed.contains("sk-live-123"));
    }

    #[test]
    fn test_envelope_accepts_target_alias() {
        let call = envelope(json!({
            "target": "npx server",
            "args": ["--stdio"],
            "env": {"KEY": "v"},
            "method": "listTools",
            "params": {}
        }))
        .validate()
        .unwrap();

        assert_eq!(call.spec.target, "npx server");
        assert_eq!(call.spec.args, vec!["--stdio"]);
        assert_eq!(call.spec.env.get("KEY").map(String::as_str), Some("v"));
        assert_eq!(call.method, Method::ListTools);
    }

    #[test]
    fn test_validation_rejects_missing_fields() {
        let cases = [
            json!({"method": "ping", "params": {}}),
            json!({"serverPath": "  ", "method": "ping", "params": {}}),
            json!({"serverPath": "echo-server", "params": {}}),
            json!({"serverPath": "echo-server", "method": "ping"}),
            json!({"serverPath": "echo-server", "method": "ping", "params": null}),
        ];
        for case in cases {
            let err = envelope(case.clone()).validate().unwrap_err();
            assert_eq!(err.kind(), "malformed_request", "{case}");
        }
    }

    #[tokio::test]
    async fn test_first_call_creates_and_caches_session() {
        let factory = MockFactory::new();
        let dispatcher = dispatcher(&factory, SessionMode::Cached);

        let result = dispatcher
            .handle(envelope(json!({"target": "echo-server", "method": "ping", "params": {}})))
            .await
            .unwrap();

        assert_eq!(result, json!({}));
        assert_eq!(factory.creates(), 1);
        assert_eq!(&factory.sent_methods()[..2], ["initialize", "notifications/initialized"]);
        assert_eq!(dispatcher.registry().len(), 1);
        assert_eq!(factory.closes(), 0);

        dispatcher.registry().close_all().await;
    }

    #[tokio::test]
    async fn test_repeat_call_hits_cache() {
        let factory = MockFactory::new();
        let dispatcher = dispatcher(&factory, SessionMode::Cached);
        let call = json!({
            "target": "echo-server",
            "args": ["-v"],
            "env": {"A": "1"},
            "method": "tools/list",
            "params": {}
        });

        let first = dispatcher.handle(envelope(call.clone())).await.unwrap();
        let second = dispatcher.handle(envelope(call)).await.unwrap();

        assert_eq!(first["instance"], second["instance"]);
        assert_eq!(factory.creates(), 1);
        dispatcher.registry().close_all().await;
    }

    #[tokio::test]
    async fn test_unsupported_method_has_no_side_effects() {
        let factory = MockFactory::new();
        let dispatcher = dispatcher(&factory, SessionMode::Cached);

        let err = dispatcher
            .handle(envelope(json!({"target": "echo-server", "method": "not/real", "params": {}})))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "unsupported");
        assert_eq!(factory.creates(), 0);
        assert!(dispatcher.registry().is_empty());
    }

    #[tokio::test]
    async fn test_dead_cached_session_is_replaced_transparently() {
        let factory = MockFactory::new();
        let dispatcher = dispatcher(&factory, SessionMode::Cached);
        let call = json!({"target": "echo-server", "method": "listPrompts", "params": {}});

        let first = dispatcher.handle(envelope(call.clone())).await.unwrap();
        factory.kill_existing();
        let second = dispatcher.handle(envelope(call)).await.unwrap();

        assert_ne!(first["instance"], second["instance"]);
        assert_eq!(factory.creates(), 2);
        assert_eq!(factory.closes(), 1);
        dispatcher.registry().close_all().await;
    }

    #[tokio::test]
    async fn test_remote_failure_keeps_cached_session() {
        let factory = MockFactory::new();
        let dispatcher = dispatcher(&factory, SessionMode::Cached);

        let err = dispatcher
            .handle(envelope(json!({
                "target": "echo-server",
                "method": "callTool",
                "params": {"name": "fail"}
            })))
            .await
            .unwrap_err();

        match err {
            BridgeError::Remote(rpc) => assert_eq!(rpc.code, -32000),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(factory.closes(), 0);
        assert_eq!(dispatcher.registry().len(), 1);
        dispatcher.registry().close_all().await;
    }

    #[tokio::test]
    async fn test_compatibility_flag_reaches_call_tool() {
        let factory = MockFactory::new();
        let dispatcher = dispatcher(&factory, SessionMode::Cached);

        let result = dispatcher
            .handle(envelope(json!({
                "target": "echo-server",
                "method": "callTool",
                "params": {"name": "legacy"},
                "compatibility": true
            })))
            .await
            .unwrap();

        assert_eq!(result["toolResult"], "legacy");
        dispatcher.registry().close_all().await;
    }

    #[tokio::test]
    async fn test_closed_control_channel_invalidates_entry() {
        let factory = MockFactory::new();
        let dispatcher = dispatcher(&factory, SessionMode::Cached);
        let crash = json!({
            "target": "echo-server",
            "method": "tools/call",
            "params": {"name": "crash"}
        });

        let err = dispatcher.handle(envelope(crash)).await.unwrap_err();

        assert_eq!(err.kind(), "transport_failure");
        assert!(dispatcher.registry().is_empty());
        assert_eq!(factory.closes(), 1);
    }

    #[tokio::test]
    async fn test_request_timeout_leaves_entry_for_probe() {
        let factory = MockFactory::new();
        let registry = SessionRegistry::new(
            Arc::new(factory.clone()),
            SessionConfig {
                request_timeout: Some(Duration::from_millis(50)),
                ..SessionConfig::default()
            },
            Duration::from_secs(300),
        );
        let dispatcher = Dispatcher::new(Arc::new(registry), SessionMode::Cached);
        let call = json!({"target": "echo-server", "method": "listResources", "params": {}});
        dispatcher.handle(envelope(call.clone())).await.unwrap();

        factory.set_silent(true);
        let err = dispatcher.handle(envelope(call)).await.unwrap_err();

        assert_eq!(err.kind(), "timeout");
        assert_eq!(dispatcher.registry().len(), 1);
        assert_eq!(factory.closes(), 0);
        factory.set_silent(false);
        dispatcher.registry().close_all().await;
    }

    #[tokio::test]
    async fn test_per_request_mode_always_closes() {
        let factory = MockFactory::new();
        let dispatcher = dispatcher(&factory, SessionMode::PerRequest);
        let ok = json!({"target": "echo-server", "method": "ping", "params": {}});
        let failing = json!({
            "target": "echo-server",
            "method": "callTool",
            "params": {"name": "fail"}
        });

        dispatcher.handle(envelope(ok.clone())).await.unwrap();
        dispatcher.handle(envelope(ok)).await.unwrap();
        assert!(dispatcher.handle(envelope(failing)).await.is_err());

        assert_eq!(factory.creates(), 3);
        assert_eq!(factory.closes(), 3);
        assert!(dispatcher.registry().is_empty());
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        let factory = MockFactory::new();
        factory.set_create_fails(true);
        let dispatcher = dispatcher(&factory, SessionMode::Cached);

        let err = dispatcher
            .handle(envelope(json!({"target": "echo-server", "method": "ping", "params": {}})))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "connect_failure");
        assert!(dispatcher.registry().is_empty());
    }
}
