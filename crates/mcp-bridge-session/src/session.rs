//! A live, handshaken connection to one remote peer.

use std::time::Duration;

use mcp_bridge_core::{
    Identity, JsonRpcMessage, Method, RequestId, RpcError, Transport, TransportError,
    TransportKind, jsonrpc::MCP_PROTOCOL_VERSION,
};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::time::Instant;
use uuid::Uuid;

/// Session error.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Handshake failed: {0}")]
    Handshake(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("Remote error: {0}")]
    Remote(RpcError),
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
}

/// Settings shared by every session the bridge opens.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Name announced in `clientInfo`.
    pub client_name: String,
    /// Version announced in `clientInfo`.
    pub client_version: String,
    /// Capabilities advertised during the handshake.
    pub capabilities: Value,
    /// Bound on each remote round-trip; `None` waits indefinitely.
    pub request_timeout: Option<Duration>,
    /// Bound on transport creation, on the handshake, and on liveness probes.
    pub connect_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            client_name: "mcp-bridge".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            capabilities: default_capabilities(),
            request_timeout: None,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// Capabilities the bridge declares: prompts, tools, resource subscriptions
/// and logging.
#[must_use]
pub fn default_capabilities() -> Value {
    json!({
        "prompts": {},
        "tools": {},
        "resources": { "subscribe": true },
        "logging": {},
    })
}

/// A live session over one owned transport.
///
/// Never shared between tasks: every operation takes `&mut self`.
pub struct Session {
    id: Uuid,
    identity: Identity,
    transport: Box<dyn Transport>,
    local_capabilities: Value,
    remote_capabilities: Value,
    server_info: Value,
    created_at: Instant,
    last_used: Instant,
    next_id: i64,
    request_timeout: Option<Duration>,
    closed: bool,
}

impl Session {
    /// Handshake over `transport` and return the ready session.
    ///
    /// The transport is closed before a handshake failure is returned.
    ///
    /// # Errors
    /// Returns `SessionError::Handshake` if `initialize` fails or times out.
    pub async fn open(
        identity: Identity,
        transport: Box<dyn Transport>,
        config: &SessionConfig,
    ) -> Result<Self, SessionError> {
        let now = Instant::now();
        let mut session = Self {
            id: Uuid::new_v4(),
            identity,
            transport,
            local_capabilities: config.capabilities.clone(),
            remote_capabilities: json!({}),
            server_info: Value::Null,
            created_at: now,
            last_used: now,
            next_id: 1,
            request_timeout: config.request_timeout,
            closed: false,
        };

        let limit = config.connect_timeout;
        let outcome = match tokio::time::timeout(limit, session.handshake(config)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SessionError::Handshake(e.to_string())),
            Err(_) => Err(SessionError::Handshake(format!("timed out after {limit:?}"))),
        };

        if let Err(e) = outcome {
            if let Err(close_err) = session.close().await {
                tracing::warn!(session_id = %session.id, "Failed to close after handshake failure: {close_err}");
            }
            return Err(e);
        }

        tracing::debug!(
            session_id = %session.id,
            identity = %session.identity,
            transport = %session.kind(),
            server = %session.server_info,
            "Session opened"
        );
        Ok(session)
    }

    async fn handshake(&mut self, config: &SessionConfig) -> Result<(), SessionError> {
        let params = json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": self.local_capabilities,
            "clientInfo": {
                "name": config.client_name,
                "version": config.client_version,
            },
        });
        let result = self.request("initialize", Some(params)).await?;

        if let Some(version) = result.get("protocolVersion").and_then(Value::as_str) {
            if version != MCP_PROTOCOL_VERSION {
                tracing::debug!(session_id = %self.id, version, "Peer negotiated a different protocol version");
            }
        }
        self.remote_capabilities = result
            .get("capabilities")
            .cloned()
            .unwrap_or_else(|| json!({}));
        self.server_info = result.get("serverInfo").cloned().unwrap_or(Value::Null);

        self.transport
            .send(&JsonRpcMessage::notification("notifications/initialized", None))
            .await?;
        Ok(())
    }

    /// Perform one operation from the fixed vocabulary.
    ///
    /// `callTool` goes through [`Session::call_tool`] with the strict result
    /// shape. The last-used time is bumped only on success.
    ///
    /// # Errors
    /// Returns `Remote` for a logical error from the peer, `Transport` or
    /// `Timeout` when the round-trip itself fails.
    pub async fn invoke(&mut self, method: Method, params: Value) -> Result<Value, SessionError> {
        if method == Method::CallTool {
            return self.call_tool(params, false).await;
        }
        let result = self.request(method.wire_name(), Some(params)).await?;
        self.touch();
        Ok(result)
    }

    /// Call a tool.
    ///
    /// A result must carry a `content` array unless `compatibility` is set,
    /// in which case the legacy `{ "toolResult": ... }` shape is accepted too.
    ///
    /// # Errors
    /// As [`Session::invoke`], plus `Remote` when the result has the wrong shape.
    pub async fn call_tool(
        &mut self,
        params: Value,
        compatibility: bool,
    ) -> Result<Value, SessionError> {
        let result = self
            .request(Method::CallTool.wire_name(), Some(params))
            .await?;

        let has_content = result.get("content").is_some_and(Value::is_array);
        let is_legacy = compatibility && result.get("toolResult").is_some();
        if !has_content && !is_legacy {
            return Err(SessionError::Remote(RpcError {
                code: -32603,
                message: "tool result has no content array".to_string(),
                data: Some(result),
            }));
        }

        self.touch();
        Ok(result)
    }

    /// Liveness probe.
    ///
    /// # Errors
    /// Returns error if the peer does not answer the `ping`.
    pub async fn ping(&mut self) -> Result<(), SessionError> {
        self.request(Method::Ping.wire_name(), None).await.map(|_| ())
    }

    /// Close the transport. Closing twice is a no-op.
    ///
    /// # Errors
    /// Returns the transport's close error on the first call only.
    pub async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        tracing::debug!(session_id = %self.id, identity = %self.identity, "Closing session");
        self.transport.close().await
    }

    async fn request(
        &mut self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, SessionError> {
        if self.closed {
            return Err(TransportError::Closed.into());
        }

        let id = RequestId::Number(self.next_id);
        self.next_id += 1;

        // The deadline covers the send too: a peer that stops reading blocks it.
        let response = match self.request_timeout {
            Some(limit) => tokio::time::timeout(limit, self.exchange(id, method, params))
                .await
                .map_err(|_| SessionError::Timeout(limit))??,
            None => self.exchange(id, method, params).await?,
        };
        response.into_outcome().map_err(SessionError::Remote)
    }

    async fn exchange(
        &mut self,
        id: RequestId,
        method: &str,
        params: Option<Value>,
    ) -> Result<JsonRpcMessage, SessionError> {
        self.transport
            .send(&JsonRpcMessage::request(id.clone(), method, params))
            .await?;
        self.await_response(&id).await
    }

    async fn await_response(&mut self, id: &RequestId) -> Result<JsonRpcMessage, SessionError> {
        loop {
            let message = self.transport.receive().await?.ok_or(TransportError::Closed)?;

            if message.is_response() {
                if message.id.as_ref() == Some(id) {
                    return Ok(message);
                }
                tracing::debug!(session_id = %self.id, id = ?message.id, "Discarding stale response");
            } else if message.is_request() {
                self.answer_peer_request(message).await?;
            } else if let Some(method) = &message.method {
                tracing::debug!(session_id = %self.id, method, "Notification from peer");
            } else {
                tracing::warn!(session_id = %self.id, error = ?message.error, "Uncorrelated message from peer");
            }
        }
    }

    async fn answer_peer_request(&mut self, message: JsonRpcMessage) -> Result<(), TransportError> {
        let (Some(id), Some(method)) = (message.id, message.method) else {
            return Ok(());
        };

        let reply = if method == Method::Ping.wire_name() {
            JsonRpcMessage::response(id, json!({}))
        } else {
            tracing::debug!(session_id = %self.id, method, "Rejecting request from peer");
            JsonRpcMessage::error_response(id, RpcError::method_not_found(&method))
        };
        self.transport.send(&reply).await
    }

    pub(crate) fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    /// Instance id, distinct for every session ever opened.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub const fn identity(&self) -> Identity {
        self.identity
    }

    #[must_use]
    pub fn kind(&self) -> TransportKind {
        self.transport.kind()
    }

    /// Capabilities declared by the bridge.
    #[must_use]
    pub const fn local_capabilities(&self) -> &Value {
        &self.local_capabilities
    }

    /// Capabilities the peer returned from `initialize`.
    #[must_use]
    pub const fn remote_capabilities(&self) -> &Value {
        &self.remote_capabilities
    }

    #[must_use]
    pub const fn server_info(&self) -> &Value {
        &self.server_info
    }

    #[must_use]
    pub const fn created_at(&self) -> Instant {
        self.created_at
    }

    #[must_use]
    pub const fn last_used(&self) -> Instant {
        self.last_used
    }

    /// Time since the last successful operation.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_used.elapsed()
    }

    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.closed {
            tracing::warn!(session_id = %self.id, identity = %self.identity, "Session dropped without close");
        }
    }
}

#[cfg(test)]
mod tests {
    use mcp_bridge_core::{TargetSpec, TransportFactory};

    use super::*;
    use crate::testing::MockFactory;

    async fn open(factory: &MockFactory) -> Session {
        let spec = TargetSpec::new("echo-server");
        let transport = factory.create(&spec).await.unwrap();
        Session::open(spec.identity(), transport, &SessionConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_handshake_stores_negotiated_capabilities() {
        let factory = MockFactory::new();
        let mut session = open(&factory).await;

        assert_eq!(
            session.remote_capabilities(),
            &json!({"tools": {}, "resources": {"subscribe": true}})
        );
        assert_eq!(session.server_info()["name"], "mock");
        assert_eq!(session.local_capabilities()["resources"]["subscribe"], true);
        assert_eq!(factory.sent_methods(), vec!["initialize", "notifications/initialized"]);

        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_invoke_uses_wire_name_and_passes_result_through() {
        let factory = MockFactory::new();
        let mut session = open(&factory).await;

        let result = session
            .invoke(Method::ListTools, json!({"cursor": "c1"}))
            .await
            .unwrap();
        assert_eq!(result["method"], "tools/list");
        assert_eq!(result["params"], json!({"cursor": "c1"}));

        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_remote_error_is_passed_through() {
        let factory = MockFactory::new();
        let mut session = open(&factory).await;

        let err = session
            .invoke(Method::CallTool, json!({"name": "fail"}))
            .await
            .unwrap_err();
        match err {
            SessionError::Remote(rpc) => assert_eq!(rpc.message, "tool failed"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!session.is_closed());
        session.ping().await.unwrap();

        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_tool_result_shape_depends_on_compatibility() {
        let factory = MockFactory::new();
        let mut session = open(&factory).await;

        let strict = session.call_tool(json!({"name": "legacy"}), false).await;
        assert!(matches!(strict, Err(SessionError::Remote(_))));

        let compat = session.call_tool(json!({"name": "legacy"}), true).await.unwrap();
        assert_eq!(compat["toolResult"], "legacy");

        let modern = session.call_tool(json!({"name": "echo"}), false).await.unwrap();
        assert!(modern["content"].is_array());

        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_peer_traffic_during_a_call_is_handled() {
        let factory = MockFactory::new();
        let mut session = open(&factory).await;

        // The mock interleaves a notification and a roots/list request before
        // answering resources/read.
        let result = session
            .invoke(Method::ReadResource, json!({"uri": "file:///a"}))
            .await
            .unwrap();
        assert_eq!(result["method"], "resources/read");
        assert_eq!(factory.rejected_peer_requests(), 1);

        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let factory = MockFactory::new();
        let mut session = open(&factory).await;

        tokio_test::assert_ok!(session.close().await);
        tokio_test::assert_ok!(session.close().await);
        assert_eq!(factory.closes(), 1);
        assert!(matches!(
            session.ping().await,
            Err(SessionError::Transport(TransportError::Closed))
        ));
    }

    #[tokio::test]
    async fn test_failed_close_is_not_retried() {
        let factory = MockFactory::new();
        factory.set_close_fails(true);
        let mut session = open(&factory).await;

        tokio_test::assert_err!(session.close().await);
        tokio_test::assert_ok!(session.close().await);
        assert_eq!(factory.closes(), 1);
    }

    #[tokio::test]
    async fn test_handshake_failure_closes_transport() {
        let factory = MockFactory::new();
        factory.set_handshake_fails(true);
        let spec = TargetSpec::new("echo-server");
        let transport = factory.create(&spec).await.unwrap();

        let result = Session::open(spec.identity(), transport, &SessionConfig::default()).await;
        assert!(matches!(result, Err(SessionError::Handshake(_))));
        assert_eq!(factory.closes(), 1);
    }

    #[tokio::test]
    async fn test_dead_peer_surfaces_as_closed_transport() {
        let factory = MockFactory::new();
        let mut session = open(&factory).await;

        factory.kill_existing();
        let err = session.invoke(Method::ListPrompts, json!({})).await.unwrap_err();
        assert!(matches!(err, SessionError::Transport(TransportError::Closed)));

        session.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout() {
        let factory = MockFactory::new();
        let spec = TargetSpec::new("echo-server");
        let transport = factory.create(&spec).await.unwrap();
        let config = SessionConfig {
            request_timeout: Some(Duration::from_secs(5)),
            ..SessionConfig::default()
        };
        let mut session = Session::open(spec.identity(), transport, &config).await.unwrap();

        factory.set_silent(true);
        let err = session.invoke(Method::ListTools, json!({})).await.unwrap_err();
        assert!(matches!(err, SessionError::Timeout(d) if d == Duration::from_secs(5)));

        session.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout_covers_stalled_send() {
        let factory = MockFactory::new();
        let spec = TargetSpec::new("echo-server");
        let transport = factory.create(&spec).await.unwrap();
        let config = SessionConfig {
            request_timeout: Some(Duration::from_secs(5)),
            ..SessionConfig::default()
        };
        let mut session = Session::open(spec.identity(), transport, &config).await.unwrap();

        factory.set_send_stalls(true);
        let err = session.invoke(Method::ListTools, json!({})).await.unwrap_err();
        assert!(matches!(err, SessionError::Timeout(d) if d == Duration::from_secs(5)));

        factory.set_send_stalls(false);
        session.ping().await.unwrap();
        session.close().await.unwrap();
    }
}
